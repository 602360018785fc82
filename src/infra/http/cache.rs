//! Cache inspection and invalidation routes.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::Value;

use crate::application::error::ErrorReport;
use crate::cache::TieredCache;
use crate::infra::db::PostgresRepositories;

use super::error::ApiError;

pub const EFFECTIVE_TTL_HEADER: &str = "x-cache-effective-ttl";

#[derive(Clone)]
pub struct HttpState {
    pub cache: Arc<TieredCache>,
    /// Present when the cache is backed by Postgres; used by the health check.
    pub db: Option<Arc<PostgresRepositories>>,
}

pub async fn healthz(State(state): State<HttpState>) -> Response {
    let Some(db) = state.db.as_ref() else {
        return StatusCode::NO_CONTENT.into_response();
    };

    match db.health_check().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::healthz",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}

pub async fn get_cached(
    State(state): State<HttpState>,
    Path((data_type, key)): Path<(String, String)>,
) -> Response {
    match state.cache.get::<Value>(&data_type, &key).await {
        Ok(Some(payload)) => {
            let mut response = (StatusCode::OK, Json(payload)).into_response();
            if let Some(ttl) = state.cache.effective_ttl(&data_type) {
                response
                    .headers_mut()
                    .insert(EFFECTIVE_TTL_HEADER, HeaderValue::from(ttl.as_secs()));
            }
            response
        }
        Ok(None) => ApiError::not_found("No fresh cache entry").into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

pub async fn invalidate_cached(
    State(state): State<HttpState>,
    Path((data_type, key)): Path<(String, String)>,
) -> Response {
    match state.cache.invalidate(&data_type, &key).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}
