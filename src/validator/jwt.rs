//! JWT validation against a background-refreshed issuer key set.
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) to extract `kid` and `alg`.
//! 2. Find the matching key in the current JWKS snapshot; on unknown
//!    `kid`, refresh once before failing.
//! 3. Verify the signature with `jsonwebtoken`.
//! 4. Enforce `iss`, `exp` and `nbf` against the injected clock — `exp`
//!    violations map to the distinct expired error kind.
//! 5. Extract every claim (standard and custom) into the attested
//!    identity.
//!
//! The key set is fetched eagerly at construction (failure there is
//! fatal for the validator) and refreshed by a background task on a
//! configurable interval.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::credential::{AttestedIdentity, Claims, Credential, CredentialKind};
use crate::{Error, Result};

const ACCEPTED_KINDS: &[CredentialKind] = &[CredentialKind::Jwt, CredentialKind::Bearer];

/// Default interval between background JWKS refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Configuration for a [`JwtValidator`].
#[derive(Debug, Clone)]
pub struct JwtValidatorConfig {
    /// Expected `iss` claim value.
    pub issuer: String,
    /// JWKS URL; defaults to `{issuer}/.well-known/jwks.json`.
    pub jwks_url: Option<String>,
    /// Trust domain stamped onto every identity this validator attests.
    pub trust_domain: String,
    /// Background refresh interval.
    pub refresh_interval: Duration,
}

impl JwtValidatorConfig {
    /// Config with the default JWKS URL and refresh interval.
    #[must_use]
    pub fn new(issuer: impl Into<String>, trust_domain: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            jwks_url: None,
            trust_domain: trust_domain.into(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }

    fn jwks_url(&self) -> String {
        self.jwks_url
            .clone()
            .unwrap_or_else(|| default_jwks_url(&self.issuer))
    }
}

/// Derive the JWKS URL from the issuer using the OIDC discovery convention.
fn default_jwks_url(issuer: &str) -> String {
    let base = issuer.trim_end_matches('/');
    format!("{base}/.well-known/jwks.json")
}

struct KeyFetcher {
    http: reqwest::Client,
    jwks_url: String,
}

impl KeyFetcher {
    async fn fetch(&self) -> Result<JwkSet> {
        let jwks: JwkSet = self
            .http
            .get(&self.jwks_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(jwks)
    }
}

/// Validates JWTs (and opaque bearer tokens that turn out to be JWTs)
/// against the issuer's published keys.
pub struct JwtValidator {
    issuer: String,
    trust_domain: String,
    keys: Arc<RwLock<JwkSet>>,
    fetcher: Option<Arc<KeyFetcher>>,
    clock: Arc<dyn Clock>,
    refresh_task: Option<tokio::task::JoinHandle<()>>,
}

impl JwtValidator {
    /// Build a validator, fetching the key set eagerly.
    ///
    /// A failed initial fetch is fatal — a validator that never saw a key
    /// set would reject everything anyway. A background task then
    /// refreshes on `config.refresh_interval`; refresh failures keep the
    /// previous snapshot.
    pub async fn new(
        config: JwtValidatorConfig,
        http: reqwest::Client,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let fetcher = Arc::new(KeyFetcher {
            http,
            jwks_url: config.jwks_url(),
        });
        let initial = fetcher.fetch().await.map_err(|e| {
            Error::Jwks(format!(
                "initial key fetch from {} failed: {e}",
                fetcher.jwks_url
            ))
        })?;
        let keys = Arc::new(RwLock::new(initial));

        let refresh_task = tokio::spawn(refresh_loop(
            Arc::clone(&fetcher),
            Arc::clone(&keys),
            config.refresh_interval,
        ));

        Ok(Self {
            issuer: config.issuer,
            trust_domain: config.trust_domain,
            keys,
            fetcher: Some(fetcher),
            clock,
            refresh_task: Some(refresh_task),
        })
    }

    /// Build a validator over a fixed key set — no fetching, no refresh.
    ///
    /// Used with locally distributed keys and in tests.
    #[must_use]
    pub fn from_key_set(
        config: JwtValidatorConfig,
        keys: JwkSet,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            issuer: config.issuer,
            trust_domain: config.trust_domain,
            keys: Arc::new(RwLock::new(keys)),
            fetcher: None,
            clock,
            refresh_task: None,
        }
    }

    /// Find a decoding key by `kid`, refreshing once if it is unknown.
    async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey> {
        if let Some(key) = find_key(&self.keys.read(), kid) {
            return Ok(key);
        }

        // Unknown kid: refresh once and retry. Fixed key sets skip this.
        if let Some(fetcher) = &self.fetcher {
            debug!(kid, "key not in cached JWKS, refreshing");
            match fetcher.fetch().await {
                Ok(fresh) => *self.keys.write() = fresh,
                Err(e) => warn!(error = %e, "JWKS refresh on unknown kid failed"),
            }
            if let Some(key) = find_key(&self.keys.read(), kid) {
                return Ok(key);
            }
        }

        Err(Error::InvalidCredential(format!(
            "no key matching kid {kid:?} in issuer key set"
        )))
    }

    fn check_claims(&self, claims: &Claims) -> Result<()> {
        let issuer = claims.get("iss").and_then(Value::as_str).unwrap_or("");
        if issuer != self.issuer {
            return Err(Error::InvalidCredential(format!(
                "issuer mismatch: expected '{}', got '{issuer}'",
                self.issuer
            )));
        }

        let subject = claims.get("sub").and_then(Value::as_str).unwrap_or("");
        if subject.is_empty() {
            return Err(Error::InvalidCredential("missing subject".into()));
        }

        let now = self.clock.now().timestamp();
        if let Some(exp) = claims.get("exp").and_then(Value::as_i64) {
            if now >= exp {
                return Err(Error::ExpiredCredential);
            }
        }
        if let Some(nbf) = claims.get("nbf").and_then(Value::as_i64) {
            if now < nbf {
                return Err(Error::InvalidCredential("token not yet valid".into()));
            }
        }

        Ok(())
    }

    fn to_identity(&self, claims: Claims) -> AttestedIdentity {
        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let issuer = claims
            .get("iss")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let audience = match claims.get("aud") {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        let scope = claims
            .get("scope")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let expires_at = claims
            .get("exp")
            .and_then(Value::as_i64)
            .and_then(|s| DateTime::from_timestamp(s, 0));
        let issued_at = claims
            .get("iat")
            .and_then(Value::as_i64)
            .and_then(|s| DateTime::from_timestamp(s, 0));

        AttestedIdentity {
            subject,
            issuer,
            trust_domain: self.trust_domain.clone(),
            claims,
            expires_at,
            issued_at,
            audience,
            scope,
        }
    }
}

impl Drop for JwtValidator {
    fn drop(&mut self) {
        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl super::Validator for JwtValidator {
    async fn validate(&self, credential: &Credential) -> Result<AttestedIdentity> {
        let token = match credential {
            Credential::Bearer { token } | Credential::Jwt { token, .. } => token.as_str(),
            other => {
                return Err(Error::InvalidCredential(format!(
                    "JWT validator cannot handle '{}' credentials",
                    other.kind()
                )));
            }
        };

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| Error::InvalidCredential(format!("malformed JWT header: {e}")))?;
        check_algorithm(header.alg)?;

        let key = self.decoding_key(header.kid.as_deref()).await?;

        // Temporal claims are enforced manually against the injected
        // clock; jsonwebtoken only checks the signature here.
        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let data = jsonwebtoken::decode::<Claims>(token, &key, &validation)
            .map_err(|e| Error::InvalidCredential(format!("JWT verification failed: {e}")))?;

        self.check_claims(&data.claims)?;
        Ok(self.to_identity(data.claims))
    }

    fn credential_kinds(&self) -> &[CredentialKind] {
        ACCEPTED_KINDS
    }
}

/// Reject HMAC algorithms — issuer keys are public, never shared secrets.
fn check_algorithm(alg: Algorithm) -> Result<()> {
    match alg {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512
        | Algorithm::ES256
        | Algorithm::ES384
        | Algorithm::EdDSA => Ok(()),
        other => Err(Error::InvalidCredential(format!(
            "unsupported JWT algorithm {other:?}"
        ))),
    }
}

/// Find a JWK by `kid` and convert it to a `DecodingKey`.
///
/// A `None` kid matches only when the set holds exactly one key.
fn find_key(jwks: &JwkSet, kid: Option<&str>) -> Option<DecodingKey> {
    let jwk = match kid {
        Some(kid) => jwks
            .keys
            .iter()
            .find(|k| k.common.key_id.as_deref() == Some(kid))?,
        None if jwks.keys.len() == 1 => &jwks.keys[0],
        None => return None,
    };

    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
        AlgorithmParameters::EllipticCurve(ec) => {
            DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
        }
        AlgorithmParameters::OctetKeyPair(okp) => DecodingKey::from_ed_components(&okp.x).ok(),
        AlgorithmParameters::OctetKey(_) => None,
    }
}

async fn refresh_loop(fetcher: Arc<KeyFetcher>, keys: Arc<RwLock<JwkSet>>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; construction already fetched.
    interval.tick().await;

    loop {
        interval.tick().await;
        match fetcher.fetch().await {
            Ok(fresh) => {
                debug!(url = %fetcher.jwks_url, keys = fresh.keys.len(), "JWKS refreshed");
                *keys.write() = fresh;
            }
            // Keep serving the previous snapshot.
            Err(e) => warn!(url = %fetcher.jwks_url, error = %e, "JWKS refresh failed"),
        }
    }
}
