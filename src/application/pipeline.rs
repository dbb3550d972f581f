//! One render attempt against one checked-out session: navigate to the
//! bridge document, wait for the embedded image to become visible, then
//! capture an element-scoped screenshot.

use bytes::Bytes;
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::time::Instant;
use url::Url;

use crate::application::{
    bridge::IMAGE_SELECTOR,
    pool::SessionCheckout,
    session::{SessionCommand, SessionError},
};

#[derive(Debug, Error)]
#[error("render pipeline failed at `{step}`: {source}")]
pub struct PipelineError {
    pub step: &'static str,
    #[source]
    pub source: SessionError,
}

/// Run the three-step batch with all-or-nothing semantics. The pipeline
/// performs no retries; retry policy, if any, belongs to the caller.
pub async fn run(
    checkout: &mut SessionCheckout,
    bridge_url: &Url,
) -> Result<Bytes, PipelineError> {
    let commands = [
        SessionCommand::Navigate(bridge_url.to_string()),
        SessionCommand::WaitVisible(IMAGE_SELECTOR.to_string()),
        SessionCommand::Screenshot(IMAGE_SELECTOR.to_string()),
    ];

    let started = Instant::now();
    let result = checkout.run(&commands).await;
    histogram!("svgsnap_render_duration_ms").record(started.elapsed().as_millis() as f64);

    result.map_err(|err| {
        let step = err.step().unwrap_or("session");
        counter!("svgsnap_render_failures_total", "step" => step).increment(1);
        PipelineError { step, source: err }
    })
}
