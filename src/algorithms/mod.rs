// src/algorithms/mod.rs

pub mod sliding_window;

#[cfg(test)]
mod tests;

pub use sliding_window::RateLimiter;

use serde::Serialize;

/// Outcome of one admission check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitStatus {
    /// Whether the request was admitted
    pub allowed: bool,

    /// Effective limit for this check
    pub limit: u64,

    /// Requests still admissible in the current window
    pub remaining: u64,

    /// Unix timestamp (seconds) at which a slot frees up
    pub reset: i64,

    /// Backing-store error text when the check failed open
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RateLimitStatus {
    pub(crate) fn allowed(limit: u64, remaining: u64, reset: i64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset,
            error: None,
        }
    }

    pub(crate) fn denied(limit: u64, reset: i64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset,
            error: None,
        }
    }

    /// Seconds until `reset`, never negative
    pub fn retry_after(&self, now: i64) -> i64 {
        (self.reset - now).max(0)
    }

    /// `X-RateLimit-*` response headers
    pub fn headers(&self) -> [(&'static str, String); 3] {
        [
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset.to_string()),
        ]
    }
}
