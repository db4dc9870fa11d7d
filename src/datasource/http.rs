//! HTTP-backed data source.
//!
//! POSTs the fetch input as JSON to a configured URL and returns the
//! response body with its content type. A `204 No Content` response
//! means "nothing to contribute". Cacheability is configuration-driven:
//! when a cache block is present, the masked input keeps exactly the
//! configured key paths.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use super::{Cacheable, DataSource, FetchInput, FetchResult};
use crate::{Error, Result};

/// Default per-request timeout for data source HTTP calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Cache behavior of an [`HttpDataSource`].
#[derive(Debug, Clone)]
pub struct HttpCacheConfig {
    /// Entry lifetime; zero caches indefinitely.
    pub ttl: Duration,
    /// Dotted input paths that make up the masked input
    /// (e.g. `subject.subject`).
    pub key_paths: Vec<String>,
}

/// Configuration for an [`HttpDataSource`].
#[derive(Debug, Clone)]
pub struct HttpDataSourceConfig {
    /// Registry name.
    pub name: String,
    /// Endpoint receiving the input JSON.
    pub url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Cacheability; `None` disables the capability entirely.
    pub cache: Option<HttpCacheConfig>,
}

/// Data source fetching enrichment data over HTTP.
pub struct HttpDataSource {
    config: HttpDataSourceConfig,
    client: reqwest::Client,
}

impl HttpDataSource {
    /// Build the source with its own timeout-bound client.
    pub fn new(config: HttpDataSourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("data source '{}': {e}", config.name)))?;
        Ok(Self { config, client })
    }

    /// Build with an injected client (tests, shared pools).
    #[must_use]
    pub fn with_client(config: HttpDataSourceConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn fetch(&self, input: &FetchInput) -> Result<Option<FetchResult>> {
        let response = self
            .client
            .post(&self.config.url)
            .json(input)
            .send()
            .await
            .map_err(|e| Error::Http(e).for_data_source(&self.config.name))?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let response = response
            .error_for_status()
            .map_err(|e| Error::Http(e).for_data_source(&self.config.name))?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/json")
            .to_string();
        let data = response
            .bytes()
            .await
            .map_err(|e| Error::Http(e).for_data_source(&self.config.name))?;

        Ok(Some(FetchResult { data, content_type }))
    }

    fn cacheability(&self) -> Option<&dyn Cacheable> {
        self.config.cache.as_ref().map(|_| self as &dyn Cacheable)
    }
}

impl Cacheable for HttpDataSource {
    fn cache_key(&self, input: &FetchInput) -> Result<FetchInput> {
        let cache = self
            .config
            .cache
            .as_ref()
            .ok_or_else(|| Error::Config("cache_key on non-cacheable source".into()))?;
        input.project(&cache.key_paths)
    }

    fn cache_ttl(&self) -> Duration {
        self.config
            .cache
            .as_ref()
            .map_or(Duration::ZERO, |cache| cache.ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::AttestedIdentity;

    fn source(cache: Option<HttpCacheConfig>) -> HttpDataSource {
        HttpDataSource::new(HttpDataSourceConfig {
            name: "roles".into(),
            url: "http://directory.internal/v1/roles".into(),
            timeout: DEFAULT_TIMEOUT,
            cache,
        })
        .unwrap()
    }

    #[test]
    fn cacheability_tracks_config() {
        assert!(source(None).cacheability().is_none());
        assert!(
            source(Some(HttpCacheConfig {
                ttl: Duration::from_secs(60),
                key_paths: vec!["subject.subject".into()],
            }))
            .cacheability()
            .is_some()
        );
    }

    #[test]
    fn cache_key_projects_configured_paths() {
        let source = source(Some(HttpCacheConfig {
            ttl: Duration::from_secs(60),
            key_paths: vec!["subject.subject".into()],
        }));

        let input = FetchInput {
            subject: Some(AttestedIdentity {
                subject: "alice".into(),
                issuer: "https://idp".into(),
                ..AttestedIdentity::default()
            }),
            actor: Some(AttestedIdentity {
                subject: "gw".into(),
                ..AttestedIdentity::default()
            }),
            request: None,
        };

        let cacheable = source.cacheability().unwrap();
        let masked = cacheable.cache_key(&input).unwrap();
        assert_eq!(masked.subject.unwrap().subject, "alice");
        assert!(masked.actor.is_none());
        assert_eq!(cacheable.cache_ttl(), Duration::from_secs(60));
    }
}
