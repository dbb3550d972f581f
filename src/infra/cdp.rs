//! DevTools-protocol rendering sessions.
//!
//! A connector discovers a page target through the engine's `/json`
//! endpoint and keeps one WebSocket command channel open per session.
//! Commands are issued sequentially with id correlation; protocol events
//! arriving in between are skipped. Exclusive use of the channel is
//! guaranteed by the session pool, so no request multiplexing is needed.

use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::debug;

use crate::{
    application::session::{RenderSession, SessionCommand, SessionConnector, SessionError},
    config::EngineTargets,
    infra::error::InfraError,
};

const VISIBILITY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Expand the configured target form into one connectable endpoint URL
/// per pool slot. Hostnames resolve to one slot per A/AAAA record.
pub async fn resolve_targets(targets: &EngineTargets) -> Result<Vec<String>, InfraError> {
    match targets {
        EngineTargets::Endpoints(endpoints) => Ok(endpoints.clone()),
        EngineTargets::ResolveHosts(hosts) => {
            let mut endpoints = Vec::new();
            for host in hosts {
                let addrs = tokio::net::lookup_host(host.as_str())
                    .await
                    .map_err(|err| InfraError::resolve(host, err.to_string()))?;
                let before = endpoints.len();
                endpoints.extend(addrs.map(|addr| format!("http://{addr}")));
                if endpoints.len() == before {
                    return Err(InfraError::resolve(host, "no addresses returned"));
                }
            }
            Ok(endpoints)
        }
    }
}

#[derive(Debug, Deserialize)]
struct TargetInfo {
    #[serde(rename = "type")]
    target_type: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: Option<String>,
}

/// Connects DevTools sessions by discovering a page target per endpoint.
#[derive(Default)]
pub struct DevToolsConnector {
    http: reqwest::Client,
}

impl DevToolsConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionConnector for DevToolsConnector {
    async fn connect(&self, address: &str) -> Result<Box<dyn RenderSession>, SessionError> {
        let discovery_url = format!("{}/json", address.trim_end_matches('/'));
        let targets: Vec<TargetInfo> = self
            .http
            .get(&discovery_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| SessionError::connect(address, err.to_string()))?
            .json()
            .await
            .map_err(|err| SessionError::connect(address, err.to_string()))?;

        let ws_url = targets
            .into_iter()
            .find(|target| target.target_type == "page")
            .and_then(|target| target.web_socket_debugger_url)
            .ok_or_else(|| SessionError::connect(address, "no debuggable page target"))?;

        let (stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|err| SessionError::connect(address, err.to_string()))?;

        let mut session = DevToolsSession { stream, next_id: 1 };
        session
            .call("Page.enable", json!({}))
            .await
            .map_err(|err| SessionError::connect(address, err.to_string()))?;

        debug!(target = "svgsnap::cdp", address, "rendering session established");
        Ok(Box::new(session))
    }
}

#[derive(Debug, Deserialize)]
struct ElementRect {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

pub struct DevToolsSession {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: u64,
}

impl DevToolsSession {
    /// Issue one protocol command and wait for its id-matched response,
    /// skipping events and stale replies from an earlier cancelled call.
    async fn call(&mut self, method: &str, params: Value) -> Result<Value, SessionError> {
        let id = self.next_id;
        self.next_id += 1;

        let payload = json!({ "id": id, "method": method, "params": params });
        self.stream
            .send(Message::Text(payload.to_string()))
            .await
            .map_err(|err| SessionError::transport(err.to_string()))?;

        loop {
            let message = self
                .stream
                .next()
                .await
                .ok_or_else(|| SessionError::transport("connection closed"))?
                .map_err(|err| SessionError::transport(err.to_string()))?;

            let Message::Text(text) = message else {
                continue;
            };
            let value: Value = serde_json::from_str(&text)
                .map_err(|err| SessionError::protocol(format!("malformed frame: {err}")))?;
            if value.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }
            if let Some(error) = value.get("error") {
                return Err(SessionError::protocol(format!("{method}: {error}")));
            }
            return Ok(value.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        let result = self.call("Page.navigate", json!({ "url": url })).await?;
        if let Some(error_text) = result.get("errorText").and_then(Value::as_str) {
            return Err(SessionError::protocol(format!(
                "navigation to `{url}` failed: {error_text}"
            )));
        }
        Ok(())
    }

    /// Poll visibility of the selector until it has a non-empty bounding
    /// box. No deadline here: the render request's own cancellation is
    /// the only bound on the wait.
    async fn wait_visible(&mut self, selector: &str) -> Result<(), SessionError> {
        let expression = format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return false; \
             const r = el.getBoundingClientRect(); return r.width > 0 && r.height > 0; }})()",
            sel = Value::String(selector.to_string())
        );

        loop {
            let result = self
                .call(
                    "Runtime.evaluate",
                    json!({ "expression": expression, "returnByValue": true }),
                )
                .await?;
            if result.pointer("/result/value").and_then(Value::as_bool) == Some(true) {
                return Ok(());
            }
            tokio::time::sleep(VISIBILITY_POLL_INTERVAL).await;
        }
    }

    async fn screenshot(&mut self, selector: &str) -> Result<Bytes, SessionError> {
        let expression = format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return null; \
             const r = el.getBoundingClientRect(); \
             return JSON.stringify({{ x: r.x + window.scrollX, y: r.y + window.scrollY, \
             width: r.width, height: r.height }}); }})()",
            sel = Value::String(selector.to_string())
        );

        let result = self
            .call(
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": true }),
            )
            .await?;
        let rect_json = result
            .pointer("/result/value")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SessionError::protocol(format!("element `{selector}` has no bounding box"))
            })?;
        let rect: ElementRect = serde_json::from_str(rect_json)
            .map_err(|err| SessionError::protocol(format!("malformed bounding box: {err}")))?;

        let result = self
            .call(
                "Page.captureScreenshot",
                json!({
                    "format": "png",
                    "clip": {
                        "x": rect.x,
                        "y": rect.y,
                        "width": rect.width,
                        "height": rect.height,
                        "scale": 1,
                    },
                }),
            )
            .await?;
        let data = result
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| SessionError::protocol("screenshot response carried no data"))?;

        let png = BASE64
            .decode(data)
            .map_err(|err| SessionError::protocol(format!("invalid screenshot payload: {err}")))?;
        Ok(Bytes::from(png))
    }
}

#[async_trait]
impl RenderSession for DevToolsSession {
    async fn run(&mut self, commands: &[SessionCommand]) -> Result<Bytes, SessionError> {
        let mut captured = None;
        for command in commands {
            let result = match command {
                SessionCommand::Navigate(url) => self.navigate(url).await,
                SessionCommand::WaitVisible(selector) => self.wait_visible(selector).await,
                SessionCommand::Screenshot(selector) => match self.screenshot(selector).await {
                    Ok(bytes) => {
                        captured = Some(bytes);
                        Ok(())
                    }
                    Err(err) => Err(err),
                },
            };
            result.map_err(|err| err.at_step(command.step_name()))?;
        }

        captured.ok_or_else(|| SessionError::protocol("batch captured no screenshot"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn explicit_endpoints_pass_through_unresolved() {
        let targets = EngineTargets::Endpoints(vec!["http://chrome:9222".to_string()]);
        let resolved = resolve_targets(&targets).await.unwrap();
        assert_eq!(resolved, vec!["http://chrome:9222".to_string()]);
    }

    #[tokio::test]
    async fn loopback_host_resolves_to_at_least_one_slot() {
        let targets = EngineTargets::ResolveHosts(vec!["localhost:9222".to_string()]);
        let resolved = resolve_targets(&targets).await.unwrap();
        assert!(!resolved.is_empty());
        assert!(resolved.iter().all(|endpoint| endpoint.starts_with("http://")));
    }
}
