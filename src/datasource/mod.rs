//! Data sources — named fetchers claim mappers pull enrichment data from.
//!
//! A data source takes a [`FetchInput`] (subject, actor, request
//! attributes — each optional) and produces typed bytes, `None` for "no
//! contribution", or an error. Sources *optionally* implement the
//! [`Cacheable`] capability; the cache wrappers in [`memory`] and
//! [`distributed`] check for it at construction and pass non-cacheable
//! sources through untouched.
//!
//! # The masked-input contract
//!
//! `Cacheable::cache_key` projects an input down to exactly the fields
//! that affect the result. The projection is *shape-preserving*: the
//! masked value is itself a legal `fetch` input, which is what lets the
//! distributed cache reconstruct the input from the key on a remote
//! miss.

pub mod distributed;
pub mod http;
pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::credential::{AttestedIdentity, RequestAttributes};
use crate::{Error, Result};

pub use distributed::{CacheGroup, GroupCachedDataSource, LocalCacheGroup};
pub use http::HttpDataSource;
pub use memory::CachedDataSource;

/// Input to a data source fetch.
///
/// `fetch` must be total over any input whose non-`None` fields are a
/// subset of a full input's — masked projections included.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchInput {
    /// The validated subject, when relevant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<AttestedIdentity>,
    /// The validated actor, when relevant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<AttestedIdentity>,
    /// Request attributes, when relevant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestAttributes>,
}

impl FetchInput {
    /// Bundle identities and request attributes into a fetch input.
    #[must_use]
    pub fn new(
        subject: Option<&AttestedIdentity>,
        actor: Option<&AttestedIdentity>,
        request: Option<&RequestAttributes>,
    ) -> Self {
        Self {
            subject: subject.cloned(),
            actor: actor.cloned(),
            request: request.cloned(),
        }
    }

    /// Canonical JSON form, stable across claim insertion order.
    pub fn canonical_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// SHA-256 hex of the canonical JSON — the in-memory cache's lookup
    /// key.
    pub fn cache_digest(&self) -> Result<String> {
        let canonical = self.canonical_json()?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    /// Project the input down to the given dotted paths
    /// (e.g. `subject.subject`, `request.path`).
    ///
    /// Unknown paths select nothing. The projection round-trips through
    /// JSON, so the result is guaranteed to stay a legal fetch input.
    pub fn project(&self, paths: &[String]) -> Result<Self> {
        let source = serde_json::to_value(self)?;
        let mut target = serde_json::Value::Object(serde_json::Map::new());

        for path in paths {
            let mut src = &source;
            let mut found = true;
            for segment in path.split('.') {
                match src.get(segment) {
                    Some(next) => src = next,
                    None => {
                        found = false;
                        break;
                    }
                }
            }
            if found {
                insert_at_path(&mut target, path, src.clone());
            }
        }

        Ok(serde_json::from_value(target)?)
    }
}

fn insert_at_path(target: &mut serde_json::Value, path: &str, value: serde_json::Value) {
    let mut current = target;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let object = current
            .as_object_mut()
            .expect("projection target is always an object");
        if segments.peek().is_none() {
            object.insert(segment.to_string(), value);
            return;
        }
        current = object
            .entry(segment.to_string())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
    }
}

/// The bytes a data source produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    /// Raw payload.
    pub data: Bytes,
    /// MIME type of `data`.
    pub content_type: String,
}

impl FetchResult {
    /// A JSON payload.
    #[must_use]
    pub fn json(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            content_type: "application/json".into(),
        }
    }
}

/// A named fetcher producing typed bytes from inputs.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Stable registry name.
    fn name(&self) -> &str;

    /// Fetch data for `input`. `Ok(None)` means "nothing to contribute"
    /// and is not an error (nor cached).
    async fn fetch(&self, input: &FetchInput) -> Result<Option<FetchResult>>;

    /// The cacheability capability, when this source supports caching.
    fn cacheability(&self) -> Option<&dyn Cacheable> {
        None
    }
}

impl std::fmt::Debug for dyn DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource").field("name", &self.name()).finish()
    }
}

/// Optional caching capability of a data source.
pub trait Cacheable: Send + Sync {
    /// Project `input` to the masked input that doubles as the cache
    /// key's preimage. The result must be a legal `fetch` input.
    fn cache_key(&self, input: &FetchInput) -> Result<FetchInput>;

    /// How long results stay valid. [`Duration::ZERO`] means "cache
    /// indefinitely" — no time bucket, no expiry.
    fn cache_ttl(&self) -> Duration;
}

/// Process-wide data source lookup; immutable after startup.
#[derive(Clone, Default)]
pub struct DataSourceRegistry {
    sources: HashMap<String, Arc<dyn DataSource>>,
}

impl DataSourceRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under its own name.
    ///
    /// # Errors
    ///
    /// `Error::Config` on duplicate names.
    pub fn register(&mut self, source: Arc<dyn DataSource>) -> Result<()> {
        let name = source.name().to_string();
        if self.sources.contains_key(&name) {
            return Err(Error::Config(format!("duplicate data source '{name}'")));
        }
        self.sources.insert(name, source);
        Ok(())
    }

    /// Look up a source by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn DataSource>> {
        self.sources.get(name).cloned().ok_or_else(|| {
            Error::Internal("no such data source".into()).for_data_source(name)
        })
    }

    /// Registered names, unordered.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }

    /// Number of registered sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl std::fmt::Debug for DataSourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceRegistry")
            .field("sources", &self.names())
            .finish()
    }
}
