use std::error::Error as StdError;

use axum::{http::StatusCode, response::Response};
use thiserror::Error;

use crate::{application::repos::RepoError, infra::error::InfraError};

/// Diagnostic payload attached to error responses and consumed by the
/// response logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
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

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_collects_error_chain() {
        let inner = std::io::Error::other("socket closed");
        let error = InfraError::from(inner);
        let report = ErrorReport::from_error("test", StatusCode::SERVICE_UNAVAILABLE, &error);

        assert_eq!(report.messages[0], "io error: socket closed");
        assert_eq!(report.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn app_error_wraps_repository_errors() {
        let error = AppError::from(RepoError::Timeout);
        assert_eq!(error.to_string(), "database timeout");
    }
}
