//! Rate limit decision returned by the sliding-window limiter.

use axum::http::{HeaderMap, HeaderValue};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of a single rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Configured limit of the policy
    pub limit: u32,
    /// Requests left in the current window
    pub remaining: u32,
    /// End of the current window
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Write the `X-RateLimit-*` headers
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(
            "x-ratelimit-success",
            HeaderValue::from_static(if self.allowed { "true" } else { "false" }),
        );
        headers.insert("x-ratelimit-limit", HeaderValue::from(self.limit));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(self.remaining));
        headers.insert(
            "x-ratelimit-reset",
            HeaderValue::from(self.reset_at.timestamp_millis()),
        );
    }

    /// Whole seconds until the window resets, at least 1
    pub fn retry_after_secs(&self) -> i64 {
        let millis = (self.reset_at - Utc::now()).num_milliseconds();
        ((millis + 999) / 1000).max(1)
    }
}
