//! JWKS publication.
//!
//! Aggregates public keys across all registered issuers and serves them
//! in RFC 7517 form at `/v1/jwks.json` and `/.well-known/jwks.json`.
//!
//! The document lives in a read-locked slot: the hot path is one
//! read-lock of an `Arc`. A background ticker refreshes the slot; on
//! refresh failure the previous document is retained
//! (stale-over-unavailable). Only an empty slot combined with a failing
//! refresh surfaces an error to clients.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::issuer::{IssuerRegistry, KeyMaterial, PublicKey};
use crate::{Error, Result};

/// Default interval between background JWKS refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// One RFC 7517 JSON Web Key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key family: `RSA`, `EC` or `OKP`.
    pub kty: String,
    /// Key use; always `sig`.
    #[serde(rename = "use")]
    pub key_use: String,
    /// Key id.
    pub kid: String,
    /// JWS algorithm.
    pub alg: String,
    /// RSA modulus.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA exponent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// Curve name (EC and OKP).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// X coordinate (EC) or public key bytes (OKP).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// Y coordinate (EC).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

/// An RFC 7517 `{"keys": [...]}` document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwksDocument {
    /// The published keys.
    pub keys: Vec<Jwk>,
}

/// Encode a public key descriptor as a JWK.
///
/// All coordinates are base64url without padding.
#[must_use]
pub fn encode_jwk(key: &PublicKey) -> Jwk {
    let mut jwk = Jwk {
        kty: String::new(),
        key_use: key.key_use.clone(),
        kid: key.key_id.clone(),
        alg: key.algorithm.clone(),
        n: None,
        e: None,
        crv: None,
        x: None,
        y: None,
    };

    match &key.key {
        KeyMaterial::Rsa { modulus, exponent } => {
            jwk.kty = "RSA".into();
            jwk.n = Some(URL_SAFE_NO_PAD.encode(modulus));
            jwk.e = Some(URL_SAFE_NO_PAD.encode(exponent));
        }
        KeyMaterial::Ec { curve, x, y } => {
            jwk.kty = "EC".into();
            jwk.crv = Some(curve.name().to_string());
            jwk.x = Some(URL_SAFE_NO_PAD.encode(x));
            jwk.y = Some(URL_SAFE_NO_PAD.encode(y));
        }
        KeyMaterial::Ed25519 { x } => {
            jwk.kty = "OKP".into();
            jwk.crv = Some("Ed25519".into());
            jwk.x = Some(URL_SAFE_NO_PAD.encode(x));
        }
    }

    jwk
}

/// Serves the aggregated key set with background refresh.
pub struct JwksPublisher {
    registry: Arc<IssuerRegistry>,
    slot: RwLock<Option<Arc<JwksDocument>>>,
    refresh_interval: Duration,
}

impl JwksPublisher {
    /// Build a publisher over `registry`.
    #[must_use]
    pub fn new(registry: Arc<IssuerRegistry>, refresh_interval: Duration) -> Self {
        Self {
            registry,
            slot: RwLock::new(None),
            refresh_interval,
        }
    }

    /// Rebuild the document from the issuers and swap it into the slot.
    ///
    /// Partial aggregation success is success: keys from healthy
    /// issuers are published, failures are logged. The refresh fails
    /// only when errors occurred and *no* keys were collected.
    pub async fn refresh(&self) -> Result<Arc<JwksDocument>> {
        let aggregated = self.registry.all_public_keys().await;

        for (token_type, error) in &aggregated.errors {
            warn!(token_type = %token_type, error = %error, "issuer key collection failed");
        }
        if !aggregated.errors.is_empty() && aggregated.keys.is_empty() {
            return Err(Error::Jwks(format!(
                "key collection failed for all {} failing issuers",
                aggregated.errors.len()
            )));
        }

        let document = Arc::new(JwksDocument {
            keys: aggregated.keys.iter().map(encode_jwk).collect(),
        });
        debug!(keys = document.keys.len(), "JWKS document refreshed");
        *self.slot.write() = Some(Arc::clone(&document));
        Ok(document)
    }

    /// The current document; refreshes on-demand when the slot is
    /// still cold.
    pub async fn document(&self) -> Result<Arc<JwksDocument>> {
        if let Some(document) = self.slot.read().clone() {
            return Ok(document);
        }
        self.refresh().await
    }

    /// Populate eagerly and start the refresh ticker.
    ///
    /// An initial failure is a warning — the slot stays cold and the
    /// next tick (or request) retries.
    pub fn spawn_refresh(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let publisher = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(publisher.refresh_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(e) = publisher.refresh().await {
                    warn!(error = %e, "background JWKS refresh failed");
                }
            }
        })
    }
}

/// Routes serving the key set.
pub fn routes(publisher: Arc<JwksPublisher>) -> Router {
    Router::new()
        .route("/v1/jwks.json", get(serve_jwks))
        .route("/.well-known/jwks.json", get(serve_jwks))
        .with_state(publisher)
}

async fn serve_jwks(State(publisher): State<Arc<JwksPublisher>>) -> impl IntoResponse {
    match publisher.document().await {
        Ok(document) => (StatusCode::OK, Json(json!(*document))).into_response(),
        Err(e) => {
            warn!(error = %e, "JWKS unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "jwks_unavailable"})),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuer::{EcCurve, IssueContext, Issuer, Token};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn ed25519_key(kid: &str) -> PublicKey {
        PublicKey {
            key_id: kid.into(),
            algorithm: "EdDSA".into(),
            key_use: "sig".into(),
            key: KeyMaterial::Ed25519 { x: vec![1u8; 32] },
        }
    }

    #[test]
    fn rsa_jwk_carries_modulus_and_exponent() {
        let jwk = encode_jwk(&PublicKey {
            key_id: "rsa-1".into(),
            algorithm: "RS256".into(),
            key_use: "sig".into(),
            key: KeyMaterial::Rsa {
                modulus: vec![0xff, 0xee, 0xdd],
                exponent: vec![0x01, 0x00, 0x01],
            },
        });

        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.alg, "RS256");
        assert_eq!(jwk.n.as_deref(), Some("_-7d"));
        assert_eq!(jwk.e.as_deref(), Some("AQAB"));
        assert!(jwk.crv.is_none());
    }

    #[test]
    fn ec_jwk_carries_curve_and_coordinates() {
        let jwk = encode_jwk(&PublicKey {
            key_id: "ec-1".into(),
            algorithm: "ES384".into(),
            key_use: "sig".into(),
            key: KeyMaterial::Ec {
                curve: EcCurve::P384,
                x: vec![1u8; 48],
                y: vec![2u8; 48],
            },
        });

        assert_eq!(jwk.kty, "EC");
        assert_eq!(jwk.crv.as_deref(), Some("P-384"));
        assert!(jwk.x.is_some());
        assert!(jwk.y.is_some());
        assert!(jwk.n.is_none());
    }

    #[test]
    fn ed25519_jwk_is_okp() {
        let jwk = encode_jwk(&ed25519_key("ed-1"));
        assert_eq!(jwk.kty, "OKP");
        assert_eq!(jwk.crv.as_deref(), Some("Ed25519"));
        assert_eq!(jwk.key_use, "sig");
        assert!(jwk.y.is_none());
    }

    #[test]
    fn coordinates_are_unpadded_base64url() {
        let jwk = encode_jwk(&ed25519_key("ed-1"));
        let x = jwk.x.unwrap();
        assert!(!x.contains('='));
        assert!(!x.contains('+'));
        assert!(!x.contains('/'));
    }

    #[test]
    fn serialized_jwk_omits_absent_fields_and_renames_use() {
        let value = serde_json::to_value(encode_jwk(&ed25519_key("ed-1"))).unwrap();
        assert_eq!(value["use"], json!("sig"));
        assert!(value.get("n").is_none());
        assert!(value.get("key_use").is_none());
    }

    struct UnsignedOnly;
    #[async_trait]
    impl Issuer for UnsignedOnly {
        async fn issue(&self, _context: &IssueContext) -> Result<Token> {
            Err(Error::Internal("not under test".into()))
        }
        async fn public_keys(&self) -> Result<Vec<PublicKey>> {
            Ok(Vec::new())
        }
    }

    struct Flaky {
        broken: AtomicBool,
    }
    #[async_trait]
    impl Issuer for Flaky {
        async fn issue(&self, _context: &IssueContext) -> Result<Token> {
            Err(Error::Internal("not under test".into()))
        }
        async fn public_keys(&self) -> Result<Vec<PublicKey>> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(Error::Signing("backend down".into()));
            }
            Ok(vec![ed25519_key("flaky-1")])
        }
    }

    #[tokio::test]
    async fn unsigned_only_registry_publishes_empty_key_set() {
        let mut registry = IssuerRegistry::new();
        registry.register("urn:unsigned", Arc::new(UnsignedOnly)).unwrap();

        let publisher = JwksPublisher::new(Arc::new(registry), DEFAULT_REFRESH_INTERVAL);
        let document = publisher.document().await.unwrap();
        assert!(document.keys.is_empty());
    }

    #[tokio::test]
    async fn stale_document_outlives_upstream_failure() {
        let flaky = Arc::new(Flaky {
            broken: AtomicBool::new(false),
        });
        let mut registry = IssuerRegistry::new();
        registry.register("urn:txn", flaky.clone()).unwrap();

        let publisher = JwksPublisher::new(Arc::new(registry), DEFAULT_REFRESH_INTERVAL);
        let warm = publisher.refresh().await.unwrap();
        assert_eq!(warm.keys.len(), 1);

        // Upstream breaks: refresh fails, the served document does not.
        flaky.broken.store(true, Ordering::SeqCst);
        assert!(publisher.refresh().await.is_err());
        let served = publisher.document().await.unwrap();
        assert_eq!(served.keys, warm.keys);
    }

    #[tokio::test]
    async fn cold_slot_with_failing_upstream_errors() {
        let flaky = Arc::new(Flaky {
            broken: AtomicBool::new(true),
        });
        let mut registry = IssuerRegistry::new();
        registry.register("urn:txn", flaky).unwrap();

        let publisher = JwksPublisher::new(Arc::new(registry), DEFAULT_REFRESH_INTERVAL);
        assert!(publisher.document().await.is_err());
    }

    #[tokio::test]
    async fn every_issuer_key_appears_in_the_document() {
        let flaky = Arc::new(Flaky {
            broken: AtomicBool::new(false),
        });
        let mut registry = IssuerRegistry::new();
        registry.register("urn:txn", flaky).unwrap();
        registry.register("urn:unsigned", Arc::new(UnsignedOnly)).unwrap();

        let publisher = JwksPublisher::new(Arc::new(registry), DEFAULT_REFRESH_INTERVAL);
        let document = publisher.document().await.unwrap();
        assert_eq!(document.keys.len(), 1);
        assert_eq!(document.keys[0].kid, "flaky-1");
    }
}
