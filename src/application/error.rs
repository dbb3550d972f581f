use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{application::pipeline::PipelineError, infra::error::InfraError};

/// Diagnostic attached to error responses so the logging middleware can
/// emit the full cause chain without leaking it to the client.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to read upload body: {0}")]
    UploadRead(String),
    #[error("failed to build bridge URL: {0}")]
    UrlConstruction(#[from] url::ParseError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("staged item not found")]
    StoreMiss,
    #[error("incomplete response write: {0}")]
    IncompleteWrite(String),
    #[error(transparent)]
    Infra(#[from] InfraError),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::StoreMiss => StatusCode::NOT_FOUND,
            AppError::UploadRead(_)
            | AppError::UrlConstruction(_)
            | AppError::Pipeline(_)
            | AppError::IncompleteWrite(_)
            | AppError::Infra(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self {
            AppError::StoreMiss => "Image not found",
            AppError::UploadRead(_) => "Upload could not be read",
            AppError::UrlConstruction(_) => "Service misconfigured",
            AppError::Pipeline(_) => "Rendering failed",
            AppError::IncompleteWrite(_) => "Response could not be written",
            AppError::Infra(_) => "Unexpected error occurred",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.presentation_message();
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, message).into_response();
        report.attach(&mut response);
        response
    }
}
