use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use quill_core::ratelimit::{
    InMemoryRateLimitStore, RateLimitStore, RateLimitStoreError, WindowRecord,
};
use tracing::{info, warn};

/// Store selector with degraded mode.
///
/// Calls go to the primary (distributed) store when one is configured. Any
/// primary failure routes that call to the in-process store instead, so the
/// request is never failed because the shared store is down. Entering and
/// leaving degraded mode is logged once per transition.
pub struct FallbackRateLimitStore {
    primary: Option<Arc<dyn RateLimitStore>>,
    local: InMemoryRateLimitStore,
    degraded: AtomicBool,
}

impl FallbackRateLimitStore {
    pub fn new(primary: Arc<dyn RateLimitStore>, local: InMemoryRateLimitStore) -> Self {
        Self {
            primary: Some(primary),
            local,
            degraded: AtomicBool::new(false),
        }
    }

    /// No distributed store configured; everything stays in process.
    pub fn local_only(local: InMemoryRateLimitStore) -> Self {
        Self {
            primary: None,
            local,
            degraded: AtomicBool::new(false),
        }
    }

    /// True while the primary is failing and calls are served locally.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// The in-process store, e.g. for periodic eviction.
    pub fn local(&self) -> &InMemoryRateLimitStore {
        &self.local
    }

    pub fn primary_name(&self) -> Option<&'static str> {
        self.primary.as_ref().map(|p| p.name())
    }

    fn primary_failed(&self, op: &'static str, err: &RateLimitStoreError) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(
                op,
                error = %err,
                degraded = true,
                "rate limit store unreachable, falling back to in-process counters"
            );
        }
    }

    fn primary_succeeded(&self) {
        if self.degraded.swap(false, Ordering::Relaxed) {
            info!(degraded = false, "rate limit store reachable again");
        }
    }
}

#[async_trait]
impl RateLimitStore for FallbackRateLimitStore {
    fn name(&self) -> &'static str {
        self.primary_name().unwrap_or_else(|| self.local.name())
    }

    async fn increment(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<WindowRecord, RateLimitStoreError> {
        if let Some(primary) = &self.primary {
            match primary.increment(key, window).await {
                Ok(record) => {
                    self.primary_succeeded();
                    return Ok(record);
                }
                Err(err) => self.primary_failed("increment", &err),
            }
        }
        self.local.increment(key, window).await
    }

    async fn get(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<Option<WindowRecord>, RateLimitStoreError> {
        if let Some(primary) = &self.primary {
            match primary.get(key, window).await {
                Ok(record) => {
                    self.primary_succeeded();
                    return Ok(record);
                }
                Err(err) => self.primary_failed("get", &err),
            }
        }
        self.local.get(key, window).await
    }

    async fn decrement(&self, key: &str) -> Result<(), RateLimitStoreError> {
        if let Some(primary) = &self.primary {
            match primary.decrement(key).await {
                Ok(()) => {
                    self.primary_succeeded();
                    return Ok(());
                }
                Err(err) => self.primary_failed("decrement", &err),
            }
        }
        self.local.decrement(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis_store::{RedisRateLimitStore, RedisSettings};

    const WINDOW: Duration = Duration::from_secs(60);

    /// Primary that fails while `down` is set and otherwise delegates.
    struct FlakyStore {
        down: AtomicBool,
        inner: InMemoryRateLimitStore,
    }

    #[async_trait]
    impl RateLimitStore for FlakyStore {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn increment(
            &self,
            key: &str,
            window: Duration,
        ) -> Result<WindowRecord, RateLimitStoreError> {
            if self.down.load(Ordering::Relaxed) {
                return Err(RateLimitStoreError::Unavailable {
                    reason: "connection refused".into(),
                });
            }
            self.inner.increment(key, window).await
        }

        async fn get(
            &self,
            key: &str,
            window: Duration,
        ) -> Result<Option<WindowRecord>, RateLimitStoreError> {
            if self.down.load(Ordering::Relaxed) {
                return Err(RateLimitStoreError::Timeout { after_ms: 250 });
            }
            self.inner.get(key, window).await
        }

        async fn decrement(&self, key: &str) -> Result<(), RateLimitStoreError> {
            self.inner.decrement(key).await
        }
    }

    #[tokio::test]
    async fn local_only_counts_in_process() {
        let store = FallbackRateLimitStore::local_only(InMemoryRateLimitStore::new());
        assert_eq!(store.name(), "memory");
        store.increment("k", WINDOW).await.expect("increment");
        let record = store.increment("k", WINDOW).await.expect("increment");
        assert_eq!(record.count, 2);
        assert!(!store.is_degraded());
    }

    #[tokio::test]
    async fn failing_primary_degrades_then_recovers() {
        let primary = Arc::new(FlakyStore {
            down: AtomicBool::new(true),
            inner: InMemoryRateLimitStore::new(),
        });
        let store = FallbackRateLimitStore::new(primary.clone(), InMemoryRateLimitStore::new());
        assert_eq!(store.name(), "flaky");

        let record = store.increment("k", WINDOW).await.expect("served locally");
        assert_eq!(record.count, 1);
        assert!(store.is_degraded());
        assert_eq!(store.local().len(), 1);
        assert!(store.get("k", WINDOW).await.expect("get").is_some());

        primary.down.store(false, Ordering::Relaxed);
        let record = store.increment("k", WINDOW).await.expect("served by primary");
        assert_eq!(record.count, 1);
        assert!(!store.is_degraded());
    }

    #[tokio::test]
    async fn unreachable_redis_never_fails_the_caller() {
        let mut settings = RedisSettings::new("redis://127.0.0.1:1");
        settings.timeout_ms = 150;
        let redis = RedisRateLimitStore::new(&settings).expect("valid url");
        let store = FallbackRateLimitStore::new(Arc::new(redis), InMemoryRateLimitStore::new());

        for expected in 1..=3 {
            let record = store.increment("ip:10.0.0.1", WINDOW).await.expect("fallback");
            assert_eq!(record.count, expected);
        }
        assert!(store.is_degraded());
    }
}
