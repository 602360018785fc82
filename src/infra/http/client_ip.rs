//! Client identity for per-address policies.
//!
//! [`normalize_ip`] is the single canonicalization used by both the resolver
//! middleware and the rate limiter, so the two never disagree on who a client
//! is. The resolver must run before rate limiting.

use std::net::{IpAddr, SocketAddr};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

/// Key used when neither headers nor the socket identify the peer.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Canonical client address attached to each request by [`resolve_client_ip`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIp(pub String);

impl ClientIp {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClientIpPolicy {
    /// Honour `X-Forwarded-For` / `X-Real-IP`. Only enable behind exactly one
    /// proxy that appends to or overwrites them. The rightmost forwarded hop is
    /// used, since every entry left of it is client supplied.
    pub trust_proxy_headers: bool,
}

/// Reduce a remote address to a bare IP string.
///
/// Accepts `ip`, `ip:port`, `[v6]:port` and `[v6]`. IPv4-mapped IPv6
/// addresses collapse to their IPv4 form. Anything unparseable is returned
/// trimmed so it still works as a best-effort key.
pub fn normalize_ip(raw: &str) -> String {
    let trimmed = raw.trim();

    if let Ok(addr) = trimmed.parse::<SocketAddr>() {
        return addr.ip().to_canonical().to_string();
    }
    if let Ok(ip) = trimmed.parse::<IpAddr>() {
        return ip.to_canonical().to_string();
    }
    if let Some(inner) = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    {
        if let Ok(ip) = inner.parse::<IpAddr>() {
            return ip.to_canonical().to_string();
        }
    }

    trimmed.to_string()
}

pub async fn resolve_client_ip(
    State(policy): State<ClientIpPolicy>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = resolve(policy, request.headers(), peer);
    request.extensions_mut().insert(client.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(client);
    response
}

fn resolve(policy: ClientIpPolicy, headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientIp {
    if policy.trust_proxy_headers {
        if let Some(ip) = forwarded_for(headers).or_else(|| header_value(headers, X_REAL_IP)) {
            return ClientIp(normalize_ip(ip));
        }
    }

    match peer {
        Some(addr) => ClientIp(addr.ip().to_canonical().to_string()),
        None => ClientIp(UNKNOWN_CLIENT.to_string()),
    }
}

/// Last hop of `X-Forwarded-For`: the address the trusted proxy saw.
fn forwarded_for(headers: &HeaderMap) -> Option<&str> {
    header_value(headers, X_FORWARDED_FOR)?
        .rsplit(',')
        .map(str::trim)
        .find(|entry| !entry.is_empty())
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)?
        .to_str()
        .ok()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
