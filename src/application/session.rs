//! Contract between the render pipeline and a remote rendering session.
//!
//! A session is one persistent control channel to a document-rendering
//! engine. The pipeline hands it an ordered command batch; the session
//! executes the batch atomically from the caller's point of view and the
//! first failing step aborts the rest.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// One step of the ordered batch executed on a rendering session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Navigate the session to the given URL.
    Navigate(String),
    /// Suspend until the element matching the selector is visible.
    WaitVisible(String),
    /// Capture a screenshot scoped to the element matching the selector.
    Screenshot(String),
}

impl SessionCommand {
    pub fn step_name(&self) -> &'static str {
        match self {
            SessionCommand::Navigate(_) => "navigate",
            SessionCommand::WaitVisible(_) => "wait-visible",
            SessionCommand::Screenshot(_) => "screenshot",
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to connect to rendering engine at `{address}`: {reason}")]
    Connect { address: String, reason: String },
    #[error("session transport failure: {0}")]
    Transport(String),
    #[error("session protocol failure: {0}")]
    Protocol(String),
    #[error("step `{step}` failed: {reason}")]
    Step { step: &'static str, reason: String },
}

impl SessionError {
    pub fn connect(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connect {
            address: address.into(),
            reason: reason.into(),
        }
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport(reason.into())
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol(reason.into())
    }

    /// Attribute this error to a named batch step, keeping an existing
    /// attribution if one is already present.
    pub fn at_step(self, step: &'static str) -> Self {
        match self {
            err @ SessionError::Step { .. } => err,
            other => SessionError::Step {
                step,
                reason: other.to_string(),
            },
        }
    }

    /// Name of the batch step this error occurred in, if attributed.
    pub fn step(&self) -> Option<&'static str> {
        match self {
            SessionError::Step { step, .. } => Some(step),
            _ => None,
        }
    }
}

/// Exclusive use of one live rendering-engine connection.
///
/// Exclusivity is enforced by the session pool's checkout discipline, not
/// by the session itself.
#[async_trait]
pub trait RenderSession: Send {
    /// Execute the batch in order, returning the captured screenshot
    /// bytes. Any step's failure aborts the remaining steps; no partial
    /// result is produced.
    async fn run(&mut self, commands: &[SessionCommand]) -> Result<Bytes, SessionError>;
}

/// Establishes rendering sessions against one engine target address.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Box<dyn RenderSession>, SessionError>;
}
