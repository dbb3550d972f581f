use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, Bytes},
    http::{Request, StatusCode, header::CONTENT_TYPE},
};
use http_body_util::BodyExt;
use tower::ServiceExt;
use url::Url;

use svgsnap::application::{
    pool::SessionPool,
    session::{RenderSession, SessionCommand, SessionConnector, SessionError},
    staging::StagingStore,
};
use svgsnap::infra::http::{BridgeState, build_router};

const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nstub";
const SVG_BODY: &str = r#"<svg id="svg"><rect/></svg>"#;
const MAX_BODY: usize = 1024 * 1024;

/// Records every command batch executed on any session from this
/// connector, optionally failing at a chosen step.
#[derive(Default)]
struct RecordingConnector {
    batches: Arc<Mutex<Vec<Vec<SessionCommand>>>>,
    fail_at: Option<&'static str>,
}

impl RecordingConnector {
    fn failing_at(step: &'static str) -> Self {
        Self {
            batches: Arc::default(),
            fail_at: Some(step),
        }
    }

    fn recorded(&self) -> Vec<Vec<SessionCommand>> {
        self.batches.lock().unwrap().clone()
    }
}

struct RecordingSession {
    batches: Arc<Mutex<Vec<Vec<SessionCommand>>>>,
    fail_at: Option<&'static str>,
}

#[async_trait]
impl RenderSession for RecordingSession {
    async fn run(&mut self, commands: &[SessionCommand]) -> Result<Bytes, SessionError> {
        self.batches.lock().unwrap().push(commands.to_vec());
        for command in commands {
            if self.fail_at == Some(command.step_name()) {
                return Err(SessionError::Step {
                    step: command.step_name(),
                    reason: "stub failure".to_string(),
                });
            }
        }
        Ok(Bytes::from_static(PNG_BYTES))
    }
}

#[async_trait]
impl SessionConnector for RecordingConnector {
    async fn connect(&self, _address: &str) -> Result<Box<dyn RenderSession>, SessionError> {
        Ok(Box::new(RecordingSession {
            batches: Arc::clone(&self.batches),
            fail_at: self.fail_at,
        }))
    }
}

async fn build_app(connector: Arc<RecordingConnector>, pool_size: usize) -> (Router, BridgeState) {
    let targets: Vec<String> = (0..pool_size).map(|i| format!("stub-{i}")).collect();
    let pool = SessionPool::bootstrap(connector, &targets, Duration::from_secs(1))
        .await
        .expect("stub bootstrap succeeds");

    let state = BridgeState {
        staging: Arc::new(StagingStore::new()),
        pool,
        bridge_base: Url::parse("http://svgsnap.test/").unwrap(),
    };
    (build_router(state.clone(), MAX_BODY), state)
}

fn render_request(body: &'static str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/render")
        .body(Body::from(body))
        .unwrap()
}

fn get_request(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

fn navigated_key(batch: &[SessionCommand]) -> String {
    let SessionCommand::Navigate(url) = &batch[0] else {
        panic!("first command must navigate, got {batch:?}");
    };
    url.rsplit('/').next().unwrap().to_string()
}

#[tokio::test]
async fn render_round_trip_with_single_session() {
    let connector = Arc::new(RecordingConnector::default());
    let (app, state) = build_app(Arc::clone(&connector), 1).await;

    let response = app.clone().oneshot(render_request(SVG_BODY)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(CONTENT_TYPE).unwrap(),
        "image/png"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, Bytes::from_static(PNG_BYTES));

    // Exactly one pipeline invocation with the expected ordered batch.
    let batches = connector.recorded();
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(batch.len(), 3);
    assert_eq!(batch[1], SessionCommand::WaitVisible("#svg".to_string()));
    assert_eq!(batch[2], SessionCommand::Screenshot("#svg".to_string()));

    let key = navigated_key(batch);
    let SessionCommand::Navigate(url) = &batch[0] else {
        unreachable!()
    };
    assert!(url.starts_with("http://svgsnap.test/bridge/"));
    assert!(url.contains(&key));

    // No residual staged entry once the response is produced.
    assert!(state.staging.get(&key).is_none());
    let data = app.oneshot(get_request(&format!("/data/{key}"))).await.unwrap();
    assert_eq!(data.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn session_is_released_after_each_render() {
    let connector = Arc::new(RecordingConnector::default());
    let (app, _state) = build_app(Arc::clone(&connector), 1).await;

    for _ in 0..3 {
        let response = app.clone().oneshot(render_request(SVG_BODY)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(connector.recorded().len(), 3);
}

#[tokio::test]
async fn pipeline_failure_yields_server_error_and_cleans_up() {
    let connector = Arc::new(RecordingConnector::failing_at("wait-visible"));
    let (app, state) = build_app(Arc::clone(&connector), 1).await;

    let response = app.clone().oneshot(render_request(SVG_BODY)).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(!body.is_empty(), "failure must carry a plain-text message");

    let batches = connector.recorded();
    assert_eq!(batches.len(), 1);
    let key = navigated_key(&batches[0]);
    assert!(state.staging.get(&key).is_none());

    // The session went back to the pool despite the failure.
    let again = app.oneshot(render_request(SVG_BODY)).await.unwrap();
    assert_eq!(again.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(connector.recorded().len(), 2);
}

#[tokio::test]
async fn data_endpoint_serves_staged_bytes_with_svg_content_type() {
    let connector = Arc::new(RecordingConnector::default());
    let (app, state) = build_app(connector, 1).await;

    state.staging.put("known.svg", Bytes::from_static(b"<svg/>"));

    let response = app
        .clone()
        .oneshot(get_request("/data/known.svg"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(CONTENT_TYPE).unwrap(),
        "image/svg+xml"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, Bytes::from_static(b"<svg/>"));

    let missing = app.oneshot(get_request("/data/unknown.svg")).await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bridge_document_references_data_endpoint() {
    let connector = Arc::new(RecordingConnector::default());
    let (app, _state) = build_app(connector, 1).await;

    let response = app.oneshot(get_request("/bridge/abc.svg")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .get(CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/html")
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let html = String::from_utf8(body.to_vec()).unwrap();
    assert!(html.contains(r#"<img id="svg" src="/data/abc.svg" />"#));
}

#[tokio::test]
async fn healthz_succeeds_while_pool_is_fully_checked_out() {
    let connector = Arc::new(RecordingConnector::default());
    let (app, state) = build_app(connector, 1).await;

    let _checkout = state.pool.acquire().await;

    let response = app.oneshot(get_request("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, Bytes::from_static(b"OK"));
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let connector = Arc::new(RecordingConnector::default());
    let targets = vec!["stub-0".to_string()];
    let pool = SessionPool::bootstrap(connector, &targets, Duration::from_secs(1))
        .await
        .unwrap();
    let state = BridgeState {
        staging: Arc::new(StagingStore::new()),
        pool,
        bridge_base: Url::parse("http://svgsnap.test/").unwrap(),
    };
    let app = build_router(state, 8);

    let response = app.oneshot(render_request(SVG_BODY)).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
