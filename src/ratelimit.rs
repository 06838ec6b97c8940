// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ingress rate limiter (spec.md §4.7): per-source-address token bucket
//! that refills by full replacement, not continuous leak. Shaped like
//! `rustedclaw`'s gateway `RateLimiter` (a guarded per-key bucket map,
//! axum middleware, health-endpoint exemption) but backed by `DashMap`
//! instead of `Mutex<HashMap>` since that crate is already load-bearing
//! elsewhere in this gateway.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use tracing::info;

struct Bucket {
    tokens: u32,
    last_reset: Instant,
}

/// `rate` tokens available per `interval`. A newly seen source starts at
/// `rate - 1` (the request that created the bucket is counted against it).
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    rate: u32,
    interval: Duration,
}

impl RateLimiter {
    pub fn new(rate: u32, interval: Duration) -> Self {
        Self { buckets: DashMap::new(), rate, interval }
    }

    /// Returns `true` if the request is allowed.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut bucket = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket { tokens: self.rate.saturating_sub(1), last_reset: now });
        if now.duration_since(bucket.last_reset) >= self.interval {
            bucket.tokens = self.rate;
            bucket.last_reset = now;
        }
        if bucket.tokens == 0 {
            return false;
        }
        bucket.tokens -= 1;
        true
    }
}

/// Axum middleware wired in front of the health endpoint-exempt routes.
pub async fn rate_limit_layer(
    State(state): State<std::sync::Arc<crate::state::GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }
    if !state.rate_limiter.check(&addr.ip().to_string()) {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }
    next.run(request).await
}

/// Structured HTTP/WS access logging (spec.md §4.7 "Logging").
pub async fn trace_layer(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = std::time::Instant::now();
    let response = next.run(request).await;
    info!(%method, path, remote = %addr, duration_ms = started.elapsed().as_millis() as u64, "request complete");
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_source_starts_at_rate_minus_one() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check("a"));
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
    }

    #[test]
    fn refill_on_full_replacement() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10));
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
        std::thread::sleep(Duration::from_millis(15));
        assert!(limiter.check("a"));
    }

    #[test]
    fn independent_sources_have_independent_buckets() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check("a"));
        assert!(limiter.check("b"));
    }
}
