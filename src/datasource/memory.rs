//! In-process TTL cache over a cacheable data source.
//!
//! Lookup keys are the SHA-256 of the masked input's canonical JSON.
//! Entries expire opportunistically on access; [`CachedDataSource::cleanup`]
//! sweeps the whole map. There is no single-flight on miss — concurrent
//! misses may each call the underlying fetch, and the last writer wins.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use super::{DataSource, FetchInput, FetchResult};
use crate::clock::Clock;
use crate::{Error, Result};

struct CacheEntry {
    result: FetchResult,
    /// `None` = never expires (zero TTL).
    expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// TTL-caching wrapper around a [`Cacheable`] data source.
pub struct CachedDataSource {
    inner: Arc<dyn DataSource>,
    entries: RwLock<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl CachedDataSource {
    /// Wrap `inner`, which must implement the cacheable capability.
    ///
    /// # Errors
    ///
    /// `Error::Config` if `inner` is not cacheable — use
    /// [`CachedDataSource::wrap`] when the capability is optional.
    pub fn new(inner: Arc<dyn DataSource>, clock: Arc<dyn Clock>) -> Result<Self> {
        if inner.cacheability().is_none() {
            return Err(Error::Config(format!(
                "data source '{}' is not cacheable",
                inner.name()
            )));
        }
        Ok(Self {
            inner,
            entries: RwLock::new(HashMap::new()),
            clock,
        })
    }

    /// Wrap `inner` if it is cacheable; otherwise return it unchanged.
    #[must_use]
    pub fn wrap(inner: Arc<dyn DataSource>, clock: Arc<dyn Clock>) -> Arc<dyn DataSource> {
        match Self::new(Arc::clone(&inner), clock) {
            Ok(cached) => Arc::new(cached),
            Err(_) => inner,
        }
    }

    /// Remove every expired entry. Takes the write lock once.
    pub fn cleanup(&self) {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(source = %self.inner.name(), evicted, "cache cleanup");
        }
    }

    /// Current number of entries, expired or not.
    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.read().len()
    }
}

#[async_trait]
impl DataSource for CachedDataSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch(&self, input: &FetchInput) -> Result<Option<FetchResult>> {
        let Some(cacheable) = self.inner.cacheability() else {
            // Constructor guarantees cacheability; degrade to passthrough
            // rather than failing the request if that ever changes.
            return self.inner.fetch(input).await;
        };

        let masked = cacheable.cache_key(input)?;
        let key = masked.cache_digest()?;

        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(&key) {
                if !entry.is_expired(self.clock.now()) {
                    return Ok(Some(entry.result.clone()));
                }
            }
        }

        // Fetch with the ORIGINAL input — the mask narrows the key, not
        // the fetch semantics. `None` results are returned uncached.
        let result = self.inner.fetch(input).await?;

        if let Some(result) = &result {
            let ttl = cacheable.cache_ttl();
            let expires_at = if ttl.is_zero() {
                None
            } else {
                Some(
                    self.clock.now()
                        + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
                )
            };
            self.entries.write().insert(
                key,
                CacheEntry {
                    result: result.clone(),
                    expires_at,
                },
            );
        }

        Ok(result)
    }
}
