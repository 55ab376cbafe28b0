use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;

use super::{RateLimitStore, RateLimitStoreError, WindowRecord};
use crate::clock::{Clock, SystemClock};

/// Process-local counter store.
///
/// Suitable for a single-process deployment or as the degraded-mode backend
/// when the distributed store is unreachable. Read-modify-write happens under
/// one mutex, so concurrent increments on the same key never lose updates.
#[derive(Clone)]
pub struct InMemoryRateLimitStore {
    inner: Arc<Mutex<HashMap<String, WindowRecord>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Drop every record whose window has closed. Returns how many were removed.
    pub fn evict_expired(&self) -> Result<usize, RateLimitStoreError> {
        let now = self.clock.now();
        let mut map = self.lock()?;
        let before = map.len();
        map.retain(|_, record| !record.is_expired(now));
        Ok(before - map.len())
    }

    /// Number of tracked keys, expired or not.
    pub fn len(&self) -> usize {
        self.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, WindowRecord>>, RateLimitStoreError>
    {
        self.inner.lock().map_err(|err| RateLimitStoreError::Backend {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

impl Default for InMemoryRateLimitStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryRateLimitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRateLimitStore")
            .field("keys", &self.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn increment(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<WindowRecord, RateLimitStoreError> {
        let now = self.clock.now();
        let mut map = self.lock()?;

        let record = match map.get_mut(key) {
            Some(existing) if !existing.is_expired(now) => {
                existing.count += 1;
                *existing
            }
            _ => {
                let fresh = WindowRecord::fresh(now, window);
                map.insert(key.to_string(), fresh);
                fresh
            }
        };
        Ok(record)
    }

    async fn get(
        &self,
        key: &str,
        _window: Duration,
    ) -> Result<Option<WindowRecord>, RateLimitStoreError> {
        let now = self.clock.now();
        let map = self.lock()?;
        Ok(map.get(key).filter(|r| !r.is_expired(now)).copied())
    }

    async fn decrement(&self, key: &str) -> Result<(), RateLimitStoreError> {
        let now = self.clock.now();
        let mut map = self.lock()?;
        if let Some(record) = map.get_mut(key) {
            if !record.is_expired(now) {
                record.count = record.count.saturating_sub(1);
            }
        }
        Ok(())
    }
}
