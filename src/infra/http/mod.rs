//! HTTP boundary: the render endpoint plus the bridge/data endpoints the
//! rendering engine fetches back from this service mid-render.

mod middleware;

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Path, State, rejection::BytesRejection},
    http::{
        StatusCode,
        header::{CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use metrics::counter;
use url::Url;

use crate::application::{
    bridge,
    error::AppError,
    pipeline,
    pool::SessionPool,
    staging::{SVG_CONTENT_TYPE, StagingStore, derive_key},
};

pub use middleware::RequestContext;

#[derive(Clone)]
pub struct BridgeState {
    pub staging: Arc<StagingStore>,
    pub pool: Arc<SessionPool>,
    pub bridge_base: Url,
}

pub fn build_router(state: BridgeState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/render", post(render))
        .route("/bridge/{key}", get(bridge_document))
        .route("/data/{key}", get(staged_data))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
        .layer(axum::middleware::from_fn(middleware::log_responses))
        .layer(axum::middleware::from_fn(middleware::set_request_context))
}

/// Render uploaded SVG markup to PNG.
///
/// The staged entry is removed when this handler returns, on every exit
/// path; the session goes back to the pool as soon as the pipeline call
/// returns, before the response is written.
async fn render(
    State(state): State<BridgeState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, AppError> {
    let body = body.map_err(|err| AppError::UploadRead(err.body_text()))?;

    let key = derive_key(&body);
    let staged = state.staging.stage(key, body);
    let bridge_url = bridge::bridge_url(&state.bridge_base, staged.key())?;

    let mut checkout = state.pool.acquire().await;
    let image = pipeline::run(&mut checkout, &bridge_url).await;
    drop(checkout);

    let image = image?;
    counter!("svgsnap_renders_total").increment(1);

    Ok(([(CONTENT_TYPE, "image/png")], image).into_response())
}

/// Minimal document embedding the staged item so the rendering engine
/// has something addressable to navigate to. Touches no store state.
async fn bridge_document(Path(key): Path<String>) -> Response {
    (
        [(CONTENT_TYPE, "text/html; charset=utf-8")],
        bridge::bridge_document(&key),
    )
        .into_response()
}

/// Staged bytes for the rendering engine's fetch back into this service.
async fn staged_data(
    State(state): State<BridgeState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let bytes = state.staging.get(&key).ok_or(AppError::StoreMiss)?;

    // Explicit length so a short write surfaces as a transport error
    // instead of a silently truncated body.
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, SVG_CONTENT_TYPE)
        .header(CONTENT_LENGTH, bytes.len())
        .body(Body::from(bytes))
        .map_err(|err| AppError::IncompleteWrite(err.to_string()))
}

async fn healthz() -> &'static str {
    "OK"
}
