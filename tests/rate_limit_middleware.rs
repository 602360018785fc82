use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{Method, Request, StatusCode, header},
};
use serde_json::Value;
use stockdesk::cache::{CacheConfig, MemoryCacheStore, TieredCache};
use stockdesk::infra::http::{
    self, ClientIpPolicy, HttpState, REQUEST_ID_HEADER, RateLimitConfig, RateLimiter,
};
use stockdesk::market::MarketCalendar;
use tower::ServiceExt;

fn router(limit: u32, policy: ClientIpPolicy) -> (Router, Arc<RateLimiter>) {
    let cache = Arc::new(TieredCache::new(
        CacheConfig::default_registry(),
        MarketCalendar::us_equities(),
        Arc::new(MemoryCacheStore::new()),
    ));
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
        requests_per_window: NonZeroU32::new(limit).expect("non-zero limit"),
        window: Duration::from_secs(60),
        ..RateLimitConfig::default()
    }));
    let router = http::build_router(HttpState { cache, db: None }, limiter.clone(), policy);
    (router, limiter)
}

fn request_from(peer: &str) -> Request<Body> {
    let addr: SocketAddr = peer.parse().expect("peer address");
    let mut request = Request::builder()
        .method(Method::GET)
        .uri("/healthz")
        .body(Body::empty())
        .expect("request should build");
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

async fn status_of(app: &Router, request: Request<Body>) -> StatusCode {
    app.clone()
        .oneshot(request)
        .await
        .expect("router should respond")
        .status()
}

#[tokio::test]
async fn over_limit_requests_get_429_with_retry_after() {
    let (app, _) = router(2, ClientIpPolicy::default());

    assert_eq!(
        status_of(&app, request_from("203.0.113.5:50000")).await,
        StatusCode::NO_CONTENT
    );
    assert_eq!(
        status_of(&app, request_from("203.0.113.5:50000")).await,
        StatusCode::NO_CONTENT
    );

    let response = app
        .clone()
        .oneshot(request_from("203.0.113.5:50000"))
        .await
        .expect("router should respond");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let body: Value = serde_json::from_slice(&bytes).expect("json body");
    assert_eq!(body["error"]["code"], "rate_limited");
    assert_eq!(body["error"]["message"], "Rate limit exceeded");
}

#[tokio::test]
async fn same_ip_on_different_ports_is_one_visitor() {
    let (app, limiter) = router(1, ClientIpPolicy::default());

    assert_eq!(
        status_of(&app, request_from("1.2.3.4:1000")).await,
        StatusCode::NO_CONTENT
    );
    assert_eq!(
        status_of(&app, request_from("1.2.3.4:1001")).await,
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(limiter.visitor_count(), 1);
}

#[tokio::test]
async fn different_ips_are_limited_independently() {
    let (app, limiter) = router(1, ClientIpPolicy::default());

    assert_eq!(
        status_of(&app, request_from("1.2.3.4:1000")).await,
        StatusCode::NO_CONTENT
    );
    assert_eq!(
        status_of(&app, request_from("5.6.7.8:1000")).await,
        StatusCode::NO_CONTENT
    );
    assert_eq!(limiter.visitor_count(), 2);
}

#[tokio::test]
async fn trusted_forwarded_for_identifies_the_client() {
    let policy = ClientIpPolicy {
        trust_proxy_headers: true,
    };
    let (app, limiter) = router(1, policy);

    // All requests arrive through the same proxy, which appends the peer it saw.
    let mut first = request_from("10.0.0.1:443");
    first
        .headers_mut()
        .insert("x-forwarded-for", "198.51.100.7".parse().expect("header"));
    let mut second = request_from("10.0.0.1:443");
    second
        .headers_mut()
        .insert("x-forwarded-for", "198.51.100.8".parse().expect("header"));

    assert_eq!(status_of(&app, first).await, StatusCode::NO_CONTENT);
    assert_eq!(status_of(&app, second).await, StatusCode::NO_CONTENT);
    assert_eq!(limiter.visitor_count(), 2);
}

#[tokio::test]
async fn rotating_client_supplied_forwarded_for_does_not_reset_allowance() {
    let policy = ClientIpPolicy {
        trust_proxy_headers: true,
    };
    let (app, limiter) = router(1, policy);

    let mut first = request_from("10.0.0.1:443");
    first
        .headers_mut()
        .insert("x-forwarded-for", "203.0.113.1, 198.51.100.7".parse().expect("header"));
    let mut second = request_from("10.0.0.1:443");
    second
        .headers_mut()
        .insert("x-forwarded-for", "203.0.113.2, 198.51.100.7".parse().expect("header"));

    assert_eq!(status_of(&app, first).await, StatusCode::NO_CONTENT);
    assert_eq!(status_of(&app, second).await, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limiter.visitor_count(), 1);
}

#[tokio::test]
async fn untrusted_forwarded_for_is_ignored() {
    let (app, limiter) = router(1, ClientIpPolicy::default());

    let mut first = request_from("10.0.0.1:443");
    first
        .headers_mut()
        .insert("x-forwarded-for", "198.51.100.7".parse().expect("header"));
    let mut second = request_from("10.0.0.1:444");
    second
        .headers_mut()
        .insert("x-forwarded-for", "198.51.100.8".parse().expect("header"));

    assert_eq!(status_of(&app, first).await, StatusCode::NO_CONTENT);
    assert_eq!(status_of(&app, second).await, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limiter.visitor_count(), 1);
}

#[tokio::test]
async fn requests_without_peer_share_the_unknown_bucket() {
    let (app, limiter) = router(1, ClientIpPolicy::default());

    let bare = || {
        Request::builder()
            .uri("/healthz")
            .body(Body::empty())
            .expect("request should build")
    };

    assert_eq!(status_of(&app, bare()).await, StatusCode::NO_CONTENT);
    assert_eq!(status_of(&app, bare()).await, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limiter.visitor_count(), 1);
}
