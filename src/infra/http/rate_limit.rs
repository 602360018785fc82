//! Per-client fixed-window rate limiting.
//!
//! Each normalized client IP gets one [`Visitor`] holding the start of its
//! current window and the number of admitted requests in it. The map is a
//! sharded [`DashMap`], so an admission only locks the shard owning that IP.
//! Visitors idle past the retention period are evicted by
//! [`RateLimiter::sweep_idle`], which a [`SweeperHandle`] task runs on a fixed
//! interval.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use metrics::{counter, gauge, histogram};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::client_ip::{ClientIp, UNKNOWN_CLIENT, normalize_ip};
use super::error::ApiError;

const TARGET: &str = "stockdesk::ratelimit";

const DEFAULT_REQUESTS_PER_WINDOW: NonZeroU32 = match NonZeroU32::new(100) {
    Some(limit) => limit,
    None => unreachable!(),
};

/// Longest sweep period the background task will wait between passes.
pub const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(86_400);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub requests_per_window: NonZeroU32,
    pub window: Duration,
    pub idle_retention: Duration,
    pub sweep_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: DEFAULT_REQUESTS_PER_WINDOW,
            window: Duration::from_secs(1),
            idle_retention: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl From<&crate::config::RateLimitSettings> for RateLimitConfig {
    fn from(settings: &crate::config::RateLimitSettings) -> Self {
        Self {
            requests_per_window: settings.requests_per_second,
            window: settings.window,
            idle_retention: settings.idle_retention,
            sweep_interval: settings.sweep_interval,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct Visitor {
    window_start: Instant,
    count: u32,
    last_seen: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    visitors: DashMap<String, Visitor>,
}

impl RateLimiter {
    /// Build an idle limiter. No background task is started; see
    /// [`RateLimiter::spawn_sweeper`].
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            visitors: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn admit(&self, remote_addr: &str) -> RateLimitDecision {
        self.admit_at(remote_addr, Instant::now())
    }

    /// Admission decision for `remote_addr` at `now`.
    ///
    /// Rejected requests refresh `last_seen` but never advance the count, so
    /// a client hammering a closed window cannot push its counter anywhere.
    pub fn admit_at(&self, remote_addr: &str, now: Instant) -> RateLimitDecision {
        let limit = self.config.requests_per_window.get();
        let window = self.config.window;

        let mut entry = self
            .visitors
            .entry(normalize_ip(remote_addr))
            .or_insert(Visitor {
                window_start: now,
                count: 0,
                last_seen: now,
            });
        let visitor = entry.value_mut();
        visitor.last_seen = visitor.last_seen.max(now);

        let elapsed = now.saturating_duration_since(visitor.window_start);
        if elapsed >= window {
            visitor.window_start = now;
            visitor.count = 0;
        }

        if visitor.count >= limit {
            let elapsed = now.saturating_duration_since(visitor.window_start);
            return RateLimitDecision::Limited {
                retry_after: window.saturating_sub(elapsed),
            };
        }

        visitor.count += 1;
        RateLimitDecision::Allowed {
            remaining: limit - visitor.count,
        }
    }

    pub fn sweep_idle(&self) -> usize {
        self.sweep_idle_at(Instant::now())
    }

    /// Drop visitors idle for at least the retention period. Returns the
    /// number evicted.
    pub fn sweep_idle_at(&self, now: Instant) -> usize {
        let started = std::time::Instant::now();
        let retention = self.config.idle_retention;
        let before = self.visitors.len();
        self.visitors
            .retain(|_, visitor| now.saturating_duration_since(visitor.last_seen) < retention);
        let remaining = self.visitors.len();
        let evicted = before.saturating_sub(remaining);

        gauge!("stockdesk_rate_limit_visitors").set(remaining as f64);
        histogram!("stockdesk_rate_limit_sweep_ms").record(started.elapsed().as_secs_f64() * 1000.0);
        if evicted > 0 {
            debug!(target = TARGET, evicted, remaining, "evicted idle visitors");
        }
        evicted
    }

    /// Number of tracked client addresses.
    pub fn visitor_count(&self) -> usize {
        self.visitors.len()
    }

    fn clear(&self) {
        self.visitors.clear();
        gauge!("stockdesk_rate_limit_visitors").set(0.0);
    }

    /// Start the idle sweep on the current tokio runtime.
    ///
    /// The task ends when [`SweeperHandle::stop`] is awaited or the handle is
    /// dropped, and clears the visitor map on its way out.
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let limiter = Arc::clone(self);
        let period = self
            .config
            .sweep_interval
            .clamp(Duration::from_millis(1), MAX_SWEEP_INTERVAL);

        let task = tokio::spawn(async move {
            let now = Instant::now();
            let first = now.checked_add(period).unwrap_or(now);
            let mut ticker = tokio::time::interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        limiter.sweep_idle();
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            limiter.clear();
            debug!(target = TARGET, "rate limit sweeper stopped");
        });

        SweeperHandle {
            stop_tx,
            task: Some(task),
        }
    }
}

/// Owner of a running sweep task.
#[derive(Debug)]
pub struct SweeperHandle {
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Signal the sweeper and wait for it to exit.
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(target = TARGET, error = %err, "rate limit sweeper ended abnormally");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

/// Reject requests from clients over their allowance with a 429.
///
/// Reads the [`ClientIp`] extension, so `resolve_client_ip` must be layered
/// outside this middleware.
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client = match request.extensions().get::<ClientIp>() {
        Some(ip) => ip.as_str().to_owned(),
        None => {
            warn!(
                target = TARGET,
                "missing client ip in rate limit middleware"
            );
            UNKNOWN_CLIENT.to_string()
        }
    };

    match limiter.admit(&client) {
        RateLimitDecision::Allowed { .. } => next.run(request).await,
        RateLimitDecision::Limited { retry_after } => {
            counter!("stockdesk_rate_limit_rejected_total").increment(1);
            info!(
                target = TARGET,
                client = %client,
                path = %request.uri().path(),
                retry_after_ms = retry_after.as_millis() as u64,
                "request rate limited"
            );
            ApiError::rate_limited(retry_after)
        }
    }
}
