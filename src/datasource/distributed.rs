//! Distributed, time-bucketed group caching for data sources.
//!
//! Where the in-memory wrapper hashes its keys, this wrapper keeps the
//! canonical JSON of the masked input *verbatim* as the key — the node
//! that ends up loading a missed key must be able to recover the fetch
//! input by deserializing it.
//!
//! Expiry is by key rotation rather than per-entry timers: for a
//! non-zero TTL the key carries a `":ttl:<bucket-start-seconds>"`
//! suffix, where the bucket start is `floor(now / ttl) * ttl` computed
//! in nanoseconds. When the wall clock crosses a bucket boundary the
//! key changes and the previous entry simply becomes unreachable.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::{DataSource, FetchInput, FetchResult};
use crate::clock::Clock;
use crate::{Error, Result};

const TTL_SEPARATOR: &str = ":ttl:";

/// A content-addressed cache shared across peers.
///
/// `get` either returns the cached bytes for `key` or runs the group's
/// loader (wherever the key lands) and caches its output.
#[async_trait]
pub trait CacheGroup: Send + Sync {
    /// Fetch-or-load the value for `key`.
    async fn get(&self, key: &str) -> Result<Bytes>;
}

/// Loader invoked by a group on cache miss.
pub type GroupLoader = Arc<dyn Fn(String) -> BoxFuture<'static, Result<Bytes>> + Send + Sync>;

/// Single-process [`CacheGroup`] — a concurrent map plus the loader.
///
/// Stands in for a peer-distributed implementation in tests and
/// single-node deployments. Entries are never evicted; bucketed keys
/// keep the working set bounded to one entry per mask per TTL window.
pub struct LocalCacheGroup {
    entries: DashMap<String, Bytes>,
    loader: GroupLoader,
}

impl LocalCacheGroup {
    /// Build a group around `loader`.
    #[must_use]
    pub fn new(loader: GroupLoader) -> Self {
        Self {
            entries: DashMap::new(),
            loader,
        }
    }

    /// Number of resident entries.
    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl CacheGroup for LocalCacheGroup {
    async fn get(&self, key: &str) -> Result<Bytes> {
        if let Some(hit) = self.entries.get(key) {
            return Ok(hit.value().clone());
        }

        // No single-flight: concurrent misses may both load.
        let loaded = (self.loader)(key.to_string()).await?;
        self.entries.insert(key.to_string(), loaded.clone());
        Ok(loaded)
    }
}

/// Wire form of a cached fetch result.
#[derive(Debug, Serialize, Deserialize)]
struct CachedPayload {
    #[serde(with = "base64_bytes")]
    data: Vec<u8>,
    content_type: String,
}

impl From<FetchResult> for CachedPayload {
    fn from(result: FetchResult) -> Self {
        Self {
            data: result.data.to_vec(),
            content_type: result.content_type,
        }
    }
}

impl From<CachedPayload> for FetchResult {
    fn from(payload: CachedPayload) -> Self {
        Self {
            data: Bytes::from(payload.data),
            content_type: payload.content_type,
        }
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

/// Group-cache wrapper around a cacheable data source.
pub struct GroupCachedDataSource {
    inner: Arc<dyn DataSource>,
    group: Arc<dyn CacheGroup>,
    clock: Arc<dyn Clock>,
}

impl GroupCachedDataSource {
    /// Wrap `inner`, building the backing group via `make_group`.
    ///
    /// The loader handed to `make_group` strips the TTL suffix,
    /// deserializes the masked input, runs the underlying fetch, and
    /// encodes the result. A `None` fetch is an error on this path —
    /// the group cache has no way to represent absence.
    ///
    /// # Errors
    ///
    /// `Error::Config` if `inner` is not cacheable.
    pub fn new(
        inner: Arc<dyn DataSource>,
        clock: Arc<dyn Clock>,
        make_group: impl FnOnce(GroupLoader) -> Arc<dyn CacheGroup>,
    ) -> Result<Self> {
        let Some(cacheable) = inner.cacheability() else {
            return Err(Error::Config(format!(
                "data source '{}' is not cacheable",
                inner.name()
            )));
        };
        let bucketed = !cacheable.cache_ttl().is_zero();

        let loader_source = Arc::clone(&inner);
        let loader: GroupLoader = Arc::new(move |key: String| {
            let source = Arc::clone(&loader_source);
            Box::pin(async move {
                let preimage = if bucketed {
                    strip_ttl_suffix(&key)
                } else {
                    key.as_str()
                };
                let input: FetchInput = serde_json::from_str(preimage).map_err(|e| {
                    Error::Decode(format!("cache key is not a fetch input: {e}"))
                        .for_data_source(source.name())
                })?;

                let result = source.fetch(&input).await?.ok_or_else(|| {
                    Error::Internal("data source produced no result for cached fetch".into())
                        .for_data_source(source.name())
                })?;

                let payload = CachedPayload::from(result);
                Ok(Bytes::from(serde_json::to_vec(&payload)?))
            }) as BoxFuture<'static, Result<Bytes>>
        });

        let group = make_group(loader);
        Ok(Self {
            inner,
            group,
            clock,
        })
    }
}

#[async_trait]
impl DataSource for GroupCachedDataSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch(&self, input: &FetchInput) -> Result<Option<FetchResult>> {
        let Some(cacheable) = self.inner.cacheability() else {
            return self.inner.fetch(input).await;
        };

        let masked = cacheable.cache_key(input)?;
        let mut key = masked.canonical_json()?;

        let ttl = cacheable.cache_ttl();
        if !ttl.is_zero() {
            let bucket = bucket_start_seconds(self.clock.now(), ttl)?;
            key.push_str(TTL_SEPARATOR);
            key.push_str(&bucket.to_string());
        }

        let bytes = self.group.get(&key).await?;
        let payload: CachedPayload = serde_json::from_slice(&bytes)?;
        Ok(Some(payload.into()))
    }
}

/// Remove the trailing `":ttl:<seconds>"` suffix.
///
/// The suffix is appended last, so splitting on the final separator
/// occurrence is exact even when the JSON preimage contains the
/// separator in a string value.
fn strip_ttl_suffix(key: &str) -> &str {
    key.rsplit_once(TTL_SEPARATOR).map_or(key, |(prefix, _)| prefix)
}

/// Start of the TTL bucket containing `now`, in unix seconds.
///
/// Bucketing happens in nanoseconds: `floor(unix_nanos / ttl_nanos) *
/// ttl_nanos`, rendered as whole seconds.
fn bucket_start_seconds(now: DateTime<Utc>, ttl: std::time::Duration) -> Result<i64> {
    let now_nanos = now
        .timestamp_nanos_opt()
        .ok_or_else(|| Error::Internal("timestamp out of nanosecond range".into()))?;
    let ttl_nanos = i64::try_from(ttl.as_nanos())
        .map_err(|_| Error::Config("cache TTL too large".into()))?;
    if ttl_nanos <= 0 {
        return Err(Error::Config("cache TTL must be positive".into()));
    }
    let bucket_nanos = (now_nanos / ttl_nanos) * ttl_nanos;
    Ok(bucket_nanos / 1_000_000_000)
}
