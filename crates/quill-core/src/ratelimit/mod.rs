//! Fixed-window admission-control counters.
//!
//! A [`RateLimitStore`] answers "how many requests has `key` made in the
//! current window, and when does the window close", incrementing atomically
//! on every call. Backends: [`InMemoryRateLimitStore`] here, the Redis
//! backend in `quill-ratelimit`.

mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::InMemoryRateLimitStore;

/// Per-key window state returned by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowRecord {
    /// Requests observed in the current window, including the current one.
    pub count: u64,
    /// Absolute instant the window closes.
    pub reset_time: DateTime<Utc>,
}

impl WindowRecord {
    /// First request of a new window opened at `now`.
    pub fn fresh(now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            count: 1,
            reset_time: window_end(now, window),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.reset_time
    }

    /// Budget left under `max_requests`, never negative.
    pub fn remaining(&self, max_requests: u64) -> u64 {
        max_requests.saturating_sub(self.count)
    }

    /// Whole seconds until the window resets, rounded up.
    pub fn retry_after(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_time - now).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000)
    }
}

/// Close of a window that opens at `now`; saturates instead of overflowing.
pub fn window_end(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    let millis = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
    chrono::Duration::try_milliseconds(millis)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Errors produced by rate-limit store implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateLimitStoreError {
    /// Backend could not be reached (connection refused, DNS, closed socket).
    #[error("rate limit store unavailable: {reason}")]
    Unavailable { reason: String },
    /// Backend did not answer within the configured bound.
    #[error("rate limit store timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },
    /// Backend answered but the operation failed.
    #[error("rate limit store failure: {reason}")]
    Backend { reason: String },
}

/// Contract implemented identically by every counter backend.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Short name used for logging.
    fn name(&self) -> &'static str;

    /// Atomically observe-then-increment-or-reset the window for `key`.
    ///
    /// A missing or expired record starts a new window with `count = 1` and
    /// `reset_time = now + window`; otherwise `count` grows by one and the
    /// original `reset_time` is kept.
    async fn increment(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<WindowRecord, RateLimitStoreError>;

    /// Current window for `key`, or `None` when absent or expired.
    async fn get(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<Option<WindowRecord>, RateLimitStoreError>;

    /// Give back one request in the current window (used by skip options).
    /// No-op when the window is absent, expired, or already at zero.
    async fn decrement(&self, key: &str) -> Result<(), RateLimitStoreError>;
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn retry_after_rounds_up_partial_seconds() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let record = WindowRecord {
            count: 4,
            reset_time: now + chrono::Duration::milliseconds(1_200),
        };
        assert_eq!(record.retry_after(now), 2);
        assert_eq!(record.retry_after(record.reset_time), 0);
        assert_eq!(record.remaining(3), 0);
        assert_eq!(record.remaining(10), 6);
    }

    #[test]
    fn window_end_saturates() {
        let now = Utc::now();
        assert_eq!(window_end(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }
}
