// src/algorithms/sliding_window.rs

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::algorithms::RateLimitStatus;
use crate::client::KvClient;
use crate::config::RateLimiterConfig;
use crate::error::Result;
use crate::middleware::RequestContext;
use crate::rate_limit_event;
use crate::storage::ScoreRange;

/// Peer placeholder when neither a forwarded address nor a socket address is known
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Sliding-window rate limiter over a sorted set per key.
///
/// Every admitted request is stored as one member scored by its admission time.
/// A check trims members older than the window, counts the rest and admits
/// while the count is under the limit. The key's TTL equals the window, so idle
/// keys disappear on their own.
///
/// The trim/count/add sequence is not atomic: callers racing on one key can
/// overshoot the limit by up to the number of racers.
///
/// Store failures never block traffic. When the client is disconnected, or any
/// step errors, the request is allowed and the error text is reported in
/// [`RateLimitStatus::error`].
#[derive(Debug, Clone)]
pub struct RateLimiter {
    client: Arc<KvClient>,
    config: RateLimiterConfig,
}

impl RateLimiter {
    pub fn new(client: Arc<KvClient>, config: RateLimiterConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Checks and records one request for `key`.
    ///
    /// `None` or zero for `limit`/`window_secs` selects the configured defaults.
    pub async fn check_rate_limit(
        &self,
        key: &str,
        limit: Option<u64>,
        window_secs: Option<u64>,
    ) -> RateLimitStatus {
        self.check_at(key, limit, window_secs, now_secs()).await
    }

    /// Same as [`RateLimiter::check_rate_limit`] with an explicit clock reading
    /// in fractional Unix seconds.
    pub(crate) async fn check_at(
        &self,
        key: &str,
        limit: Option<u64>,
        window_secs: Option<u64>,
        now: f64,
    ) -> RateLimitStatus {
        let limit = limit
            .filter(|l| *l > 0)
            .unwrap_or(self.config.default_limit);
        let window = window_secs
            .filter(|w| *w > 0)
            .unwrap_or(self.config.default_window_secs);
        let fallback_reset = (now + window as f64) as i64;

        if !self.client.is_connected().await {
            debug!(key, "Store unavailable, rate limit check skipped");
            return RateLimitStatus::allowed(limit, limit, fallback_reset);
        }

        let status = match self.admit(key, limit, window, now).await {
            Ok(status) => status,
            Err(e) => {
                warn!(key, error = %e, "Rate limit check failed, allowing request");
                RateLimitStatus {
                    error: Some(e.to_string()),
                    ..RateLimitStatus::allowed(limit, limit, fallback_reset)
                }
            }
        };

        rate_limit_event!(key, status.allowed, limit, status.remaining, window);
        status
    }

    async fn admit(&self, key: &str, limit: u64, window: u64, now: f64) -> Result<RateLimitStatus> {
        let store_key = self.store_key(key);
        let window_start = now - window as f64;

        self.client
            .zremrangebyscore(&store_key, ScoreRange::below(window_start))
            .await?;
        let current = self.client.zcard(&store_key).await?;

        if current < limit {
            let member = format!("{:.3}-{}", now, Uuid::new_v4().simple());
            self.client.zadd(&store_key, &member, now).await?;
            self.client
                .expire(&store_key, Duration::from_secs(window))
                .await?;

            let remaining = limit - current - 1;
            return Ok(RateLimitStatus::allowed(
                limit,
                remaining,
                (now + window as f64) as i64,
            ));
        }

        let oldest = self.client.zrange_withscores(&store_key, 0, 0).await?;
        let reset = match oldest.first() {
            Some((_, score)) => (score + window as f64) as i64,
            None => (now + window as f64) as i64,
        };
        Ok(RateLimitStatus::denied(limit, reset))
    }

    /// Identity used as the rate-limit key for a request: the first
    /// `X-Forwarded-For` hop, else the peer address.
    pub fn client_identifier(&self, request: &RequestContext) -> String {
        client_identifier(request)
    }

    fn store_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }
}

pub fn client_identifier(request: &RequestContext) -> String {
    let forwarded = request
        .header("X-Forwarded-For")
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty());

    match (forwarded, request.peer_addr.as_deref()) {
        (Some(hop), _) => hop.to_string(),
        (None, Some(peer)) if !peer.is_empty() => peer.to_string(),
        _ => UNKNOWN_CLIENT.to_string(),
    }
}

/// Wall clock as fractional Unix seconds, millisecond precision
pub fn now_secs() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}
