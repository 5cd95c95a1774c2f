// Admission gate: per-key request rate limiting ahead of the gateway.

use crate::config::ThrottleConfig;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use moka::sync::Cache;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

pub const HEADER_FORWARDED: &str = "X-Forwarded-For";
pub const HEADER_REAL_IP: &str = "X-Real-IP";

/// Body sent with every rejected request.
pub const DENIED_BODY: &str = "limit exceeded";

/// A key's allowance is `per_sec` requests in the window opened by its first
/// request. The limiter is dropped when the window closes.
const THROTTLE_WINDOW: Duration = Duration::from_secs(1);

/// Per-key rate limiter keyed by client address and selected headers.
pub struct Throttle {
    config: ThrottleConfig,
    limiters: Cache<String, Arc<DefaultDirectRateLimiter>>,
}

impl std::fmt::Debug for Throttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("config", &self.config)
            .field("tracked_keys", &self.limiters.entry_count())
            .finish()
    }
}

impl Throttle {
    /// Creates a new `Throttle`.
    ///
    /// At most `config.memory_store_size` keys are tracked; beyond that the
    /// cache evicts the least useful ones.
    pub fn new(config: ThrottleConfig) -> Self {
        let limiters = Cache::builder()
            .max_capacity(config.memory_store_size)
            .time_to_live(THROTTLE_WINDOW)
            .build();
        Self { config, limiters }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.per_sec > 0
    }

    /// Counts one request against `key`, returning whether it is admitted.
    pub fn check(&self, key: &str) -> bool {
        let Some(burst) = NonZeroU32::new(self.config.per_sec) else {
            return true;
        };

        // Replenishment is negligible inside a window; expiry of the cache
        // entry is what restores the allowance.
        let limiter = self.limiters.get_with_by_ref(key, || {
            Arc::new(RateLimiter::direct(
                Quota::per_hour(NonZeroU32::MIN).allow_burst(burst),
            ))
        });
        limiter.check().is_ok()
    }

    /// Builds the throttle key for a request from the configured dimensions.
    pub fn key_for(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        let mut parts = Vec::with_capacity(self.config.vary_by_headers.len() + 1);

        if self.config.vary_by_remote_addr {
            parts.push(client_ip(headers, peer));
        }

        for name in &self.config.vary_by_headers {
            let value = headers
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            parts.push(value.to_string());
        }

        parts.join("\n")
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> u64 {
        self.limiters.run_pending_tasks();
        self.limiters.entry_count()
    }
}

/// The client address: `X-Forwarded-For`, then `X-Real-IP`, then the peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').next().unwrap_or_default().trim().to_string())
            .filter(|v| !v.is_empty())
    };

    header_value(HEADER_FORWARDED)
        .or_else(|| header_value(HEADER_REAL_IP))
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_default()
}

/// Axum middleware that rejects requests over the configured rate before
/// any body is read.
pub async fn admission_gate(
    State(throttle): State<Arc<Throttle>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = throttle.key_for(request.headers(), peer);

    if !throttle.check(&key) {
        error!(
            "{}: code=429 ip={}",
            request.uri().path(),
            client_ip(request.headers(), peer)
        );
        return (StatusCode::TOO_MANY_REQUESTS, DENIED_BODY).into_response();
    }

    next.run(request).await
}
