use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quill_core::{
    clock::{Clock, SystemClock},
    ratelimit::{window_end, RateLimitStore, RateLimitStoreError, WindowRecord},
};
use redis::{
    aio::{ConnectionManager, ConnectionManagerConfig},
    Client, RedisError, Script,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

/// `INCR` plus `PEXPIRE` only when the key carries no TTL yet, so the window
/// is fixed at creation and never refreshed by later requests.
/// Returns `{count, pttl_ms}`.
const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
";

/// `DECR` that never goes below zero and leaves the TTL alone.
const DECREMENT_SCRIPT: &str = r"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current > 0 then
  return redis.call('DECR', KEYS[1])
end
return 0
";

pub const DEFAULT_TIMEOUT_MS: u64 = 250;
pub const DEFAULT_KEY_PREFIX: &str = "quill:ratelimit";

/// Connection settings for the Redis backend.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RedisSettings {
    pub url: String,
    /// Upper bound for connecting and for each command.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl RedisSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

/// A malformed connection string is a configuration error, never a
/// degraded-mode condition.
#[derive(Debug, Error)]
pub enum RedisConfigError {
    #[error("invalid redis url: {0}")]
    InvalidUrl(#[source] RedisError),
}

/// Fixed-window counters kept in Redis.
///
/// The connection is opened lazily on first use and retried on later calls
/// if it fails; once open, the connection manager reconnects on its own.
pub struct RedisRateLimitStore {
    client: Client,
    conn: OnceCell<ConnectionManager>,
    timeout: Duration,
    prefix: String,
    increment: Script,
    decrement: Script,
    clock: Arc<dyn Clock>,
}

impl RedisRateLimitStore {
    pub fn new(settings: &RedisSettings) -> Result<Self, RedisConfigError> {
        let client = Client::open(settings.url.as_str()).map_err(RedisConfigError::InvalidUrl)?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            timeout: Duration::from_millis(settings.timeout_ms),
            prefix: settings.key_prefix.clone(),
            increment: Script::new(INCREMENT_SCRIPT),
            decrement: Script::new(DECREMENT_SCRIPT),
            clock: Arc::new(SystemClock),
        })
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }

    async fn connection(&self) -> Result<ConnectionManager, RateLimitStoreError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                debug!("opening redis connection");
                let config = ConnectionManagerConfig::new()
                    .set_number_of_retries(1)
                    .set_connection_timeout(self.timeout);
                self.client
                    .get_connection_manager_with_config(config)
                    .await
                    .map_err(store_err)
            })
            .await?;
        Ok(conn.clone())
    }

    /// Run `op` against a connection, bounded by the configured timeout.
    async fn bounded<T, F, Fut>(&self, op: F) -> Result<T, RateLimitStoreError>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = Result<T, RedisError>>,
    {
        let call = async {
            let conn = self.connection().await?;
            op(conn).await.map_err(store_err)
        };
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| RateLimitStoreError::Timeout {
                after_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            })?
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    #[instrument(skip_all, fields(key = %key))]
    async fn increment(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<WindowRecord, RateLimitStoreError> {
        let redis_key = self.redis_key(key);
        let window_ms = window_millis(window);
        let (count, pttl): (i64, i64) = self
            .bounded(|mut conn| async move {
                self.increment
                    .key(&redis_key)
                    .arg(window_ms)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        Ok(record_from_reply(self.clock.now(), count, pttl, window))
    }

    #[instrument(skip_all, fields(key = %key))]
    async fn get(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<Option<WindowRecord>, RateLimitStoreError> {
        let redis_key = self.redis_key(key);
        let (count, pttl): (Option<i64>, i64) = self
            .bounded(|mut conn| async move {
                redis::pipe()
                    .atomic()
                    .cmd("GET")
                    .arg(&redis_key)
                    .cmd("PTTL")
                    .arg(&redis_key)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(count.map(|count| record_from_reply(self.clock.now(), count, pttl, window)))
    }

    #[instrument(skip_all, fields(key = %key))]
    async fn decrement(&self, key: &str) -> Result<(), RateLimitStoreError> {
        let redis_key = self.redis_key(key);
        let _: i64 = self
            .bounded(|mut conn| async move {
                self.decrement.key(&redis_key).invoke_async(&mut conn).await
            })
            .await?;
        Ok(())
    }
}

fn window_millis(window: Duration) -> u64 {
    u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Build a record from the script reply. A key without TTL (-1) or already
/// gone (-2) is treated as a full window from `now`.
fn record_from_reply(now: DateTime<Utc>, count: i64, pttl_ms: i64, window: Duration) -> WindowRecord {
    let remaining = if pttl_ms >= 0 {
        Duration::from_millis(pttl_ms as u64)
    } else {
        window
    };
    WindowRecord {
        count: count.max(0) as u64,
        reset_time: window_end(now, remaining),
    }
}

fn store_err(err: RedisError) -> RateLimitStoreError {
    if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
    {
        RateLimitStoreError::Unavailable {
            reason: err.to_string(),
        }
    } else {
        RateLimitStoreError::Backend {
            reason: err.to_string(),
        }
    }
}
