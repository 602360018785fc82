//! HTTP surface.
//!
//! Layer order, outermost first: request context, response logging, client
//! IP resolution, rate limiting, routes. Rate limiting reads the `ClientIp`
//! extension, so the resolver has to wrap it.

mod cache;
pub mod client_ip;
pub mod error;
mod middleware;
pub mod rate_limit;

pub use cache::{EFFECTIVE_TTL_HEADER, HttpState};
pub use client_ip::{ClientIp, ClientIpPolicy, normalize_ip};
pub use middleware::{REQUEST_ID_HEADER, RequestContext};
pub use rate_limit::{RateLimitConfig, RateLimitDecision, RateLimiter, SweeperHandle};

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::get,
};

use self::{
    cache::{get_cached, healthz, invalidate_cached},
    client_ip::resolve_client_ip,
    middleware::{log_responses, set_request_context},
    rate_limit::rate_limit,
};

pub fn build_router(
    state: HttpState,
    limiter: Arc<RateLimiter>,
    client_ip_policy: ClientIpPolicy,
) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/api/v1/cache/{data_type}/{key}",
            get(get_cached).delete(invalidate_cached),
        )
        .with_state(state)
        .layer(axum_middleware::from_fn_with_state(limiter, rate_limit))
        .layer(axum_middleware::from_fn_with_state(
            client_ip_policy,
            resolve_client_ip,
        ))
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
