//! Sliding-window rate limiter.
//!
//! Each policy splits time into fixed windows of `window_seconds`. A check
//! increments the counter of the current window and weighs the previous
//! window by how much of it still overlaps the sliding window:
//!
//! ```text
//! effective = current + previous * (1 - elapsed / window)
//! ```
//!
//! Counters live behind [`CounterStore`] so a hosted store can replace the
//! in-process [`MemoryCounterStore`] without touching callers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::{RateLimitConfig, RateLimitPolicy};
use crate::error::{AppError, Result};
use crate::models::RateLimitDecision;

/// Atomic counters with expiry
#[async_trait]
pub trait CounterStore: Send + Sync + std::fmt::Debug {
    /// Add one to `key` and return the new value; the key expires after `ttl`
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64>;

    /// Current value of `key`, 0 when absent or expired
    async fn get(&self, key: &str) -> Result<u64>;

    /// Drop expired keys, returning how many were removed
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
}

#[derive(Debug)]
struct Counter {
    value: u64,
    expires_at: Instant,
}

/// In-process counter store
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, Counter>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64> {
        let now = Instant::now();

        // The entry guard holds the shard lock for the read-modify-write
        let mut counter = self.counters.entry(key.to_string()).or_insert(Counter {
            value: 0,
            expires_at: now + ttl,
        });

        if counter.expires_at <= now {
            counter.value = 0;
            counter.expires_at = now + ttl;
        }

        counter.value += 1;
        Ok(counter.value)
    }

    async fn get(&self, key: &str) -> Result<u64> {
        let now = Instant::now();

        Ok(self
            .counters
            .get(key)
            .filter(|c| c.expires_at > now)
            .map(|c| c.value)
            .unwrap_or(0))
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, c| c.expires_at > now);
        Ok(before.saturating_sub(self.counters.len()))
    }
}

/// Checks identifiers against named policies
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    policies: Arc<HashMap<String, RateLimitPolicy>>,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            policies: Arc::new(config.policies.clone()),
            enabled: config.enabled,
        }
    }

    /// Limiter backed by a fresh [`MemoryCounterStore`]
    pub fn in_memory(config: &RateLimitConfig) -> Self {
        Self::new(config, Arc::new(MemoryCounterStore::new()))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn policy(&self, name: &str) -> Option<RateLimitPolicy> {
        self.policies.get(name).copied()
    }

    /// Count one request of `identifier` against `policy`
    ///
    /// # Errors
    /// Unknown policy names are rejected as a validation error.
    pub async fn check(&self, policy: &str, identifier: &str) -> Result<RateLimitDecision> {
        self.check_at(policy, identifier, Utc::now()).await
    }

    /// [`RateLimiter::check`] with an explicit clock
    pub async fn check_at(
        &self,
        policy_name: &str,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision> {
        let policy = self.policy(policy_name).ok_or_else(|| {
            AppError::validation(format!("Unknown rate limit policy: {}", policy_name))
        })?;

        let window_ms = (policy.window_seconds as i64).saturating_mul(1000).max(1);
        let now_ms = now.timestamp_millis();
        let window = now_ms.div_euclid(window_ms);
        let window_start = window * window_ms;
        let reset_at = now + chrono::Duration::milliseconds(window_start + window_ms - now_ms);

        if !self.enabled {
            return Ok(RateLimitDecision {
                allowed: true,
                limit: policy.limit,
                remaining: policy.limit,
                reset_at,
            });
        }

        let current_key = window_key(policy_name, identifier, window);
        let previous_key = window_key(policy_name, identifier, window - 1);

        let previous = self.store.get(&previous_key).await?;
        let current = self.store.increment(&current_key, policy.window() * 2).await?;

        let elapsed = (now_ms - window_start) as f64 / window_ms as f64;
        let effective = current as f64 + previous as f64 * (1.0 - elapsed);
        let limit = f64::from(policy.limit);

        let allowed = effective <= limit;
        let remaining = (limit - effective.ceil()).max(0.0) as u32;

        if !allowed {
            debug!(
                policy = %policy_name,
                identifier = %identifier,
                effective,
                "Rate limit exceeded"
            );
        }

        Ok(RateLimitDecision {
            allowed,
            limit: policy.limit,
            remaining,
            reset_at,
        })
    }

    /// Evict expired counters
    pub async fn purge(&self) -> Result<usize> {
        self.store.purge_expired().await
    }
}

fn window_key(policy: &str, identifier: &str, window: i64) -> String {
    format!("ratelimit:{}:{}:{}", policy, identifier, window)
}
