use std::time::Duration;

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::error::ErrorReport;
use crate::cache::CacheError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const NOT_FOUND: &str = "not_found";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const UNKNOWN_DATA_TYPE: &str = "unknown_data_type";
    pub const SERIALIZATION: &str = "serialization_error";
    pub const CACHE_UNAVAILABLE: &str = "cache_unavailable";
    pub const CACHE_TIMEOUT: &str = "cache_timeout";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
        }
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 429 with a `Retry-After` header rounded up to whole seconds.
    pub fn rate_limited(retry_after: Duration) -> Response {
        let retry_after = retry_after_secs(retry_after);
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: codes::RATE_LIMITED.to_string(),
                message: "Rate limit exceeded".to_string(),
                hint: Some(format!("Retry after {retry_after} seconds")),
            },
        };
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        ErrorReport::from_message(
            "infra::http::rate_limit",
            StatusCode::TOO_MANY_REQUESTS,
            format!("rate_limited: retry_after={retry_after}"),
        )
        .attach(&mut response);
        response
    }
}

fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    let secs = if retry_after.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    };
    secs.max(1)
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::UnknownDataType(tag) => Self::new(
                StatusCode::BAD_REQUEST,
                codes::UNKNOWN_DATA_TYPE,
                "Unknown data type",
                Some(tag),
            ),
            CacheError::Serialization(err) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::SERIALIZATION,
                "Cached payload could not be decoded",
                Some(err.to_string()),
            ),
            CacheError::Store(err) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::CACHE_UNAVAILABLE,
                "Cache store unavailable",
                Some(err.to_string()),
            ),
            CacheError::Timeout => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::CACHE_TIMEOUT,
                "Cache store timed out",
                None,
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let hint = self.hint.clone();
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        ErrorReport::from_message(
            "infra::http::api",
            self.status,
            format!("{}: {}", self.code, hint.as_deref().unwrap_or(self.message)),
        )
        .attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use crate::application::repos::RepoError;

    use super::*;

    #[test]
    fn retry_after_rounds_up_to_a_whole_second() {
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1500)), 2);
        assert_eq!(retry_after_secs(Duration::from_secs(3)), 3);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
    }

    #[test]
    fn rate_limited_response_carries_header_and_report() {
        let response = ApiError::rate_limited(Duration::from_millis(400));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER),
            Some(&HeaderValue::from_static("1"))
        );
        assert!(response.extensions().get::<ErrorReport>().is_some());
    }

    #[test]
    fn cache_errors_map_to_statuses() {
        let store = ApiError::from(CacheError::Store(RepoError::from_persistence("down")));
        assert_eq!(store.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(store.code(), codes::CACHE_UNAVAILABLE);

        let unknown = ApiError::from(CacheError::UnknownDataType("insider".into()));
        assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
    }
}
