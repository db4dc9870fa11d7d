//! Token issuers and the per-issuance context.
//!
//! An [`Issuer`] turns an [`IssueContext`] into an encoded [`Token`].
//! The context carries the validated subject and actor, the request
//! attributes, the service audience, and the data source registry; its
//! [`IssueContext::to_claims`] drives a mapper chain and folds the
//! outputs with a late-wins merge.

pub mod jwt;
pub mod registry;
pub mod signer;
pub mod unsigned;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use crate::Result;
use crate::credential::{AttestedIdentity, Claims, RequestAttributes};
use crate::datasource::{DataSourceRegistry, FetchInput};
use crate::mapper::{ClaimMapper, MapperInput, merge_claims};

pub use jwt::TxnTokenIssuer;
pub use registry::{AggregatedPublicKeys, IssuerRegistry};
pub use signer::{RotatingSigner, SigningKeyHandle, StaticEd25519Signer};
pub use unsigned::{IdentityEnvelopeIssuer, UnsignedIssuer};

/// RFC 8693 token-type URN for signed transaction tokens.
pub const TXN_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:txn_token";

/// An issued token.
#[derive(Debug, Clone, Serialize)]
pub struct Token {
    /// The encoded token.
    pub value: String,
    /// Token-type URN.
    pub token_type: String,
    /// When the token was minted.
    pub issued_at: DateTime<Utc>,
    /// When the token expires.
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// Seconds from issuance to expiry.
    #[must_use]
    pub fn expires_in(&self) -> i64 {
        (self.expires_at - self.issued_at).num_seconds()
    }
}

/// The expiry stamped onto unbounded (unsigned) tokens.
#[must_use]
pub fn far_future() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Elliptic curves supported by the key publication surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcCurve {
    /// NIST P-256.
    P256,
    /// NIST P-384.
    P384,
    /// NIST P-521.
    P521,
}

impl EcCurve {
    /// The RFC 7518 `crv` name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::P256 => "P-256",
            Self::P384 => "P-384",
            Self::P521 => "P-521",
        }
    }
}

/// Raw public key material, by family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMaterial {
    /// RSA modulus and exponent, big-endian.
    Rsa {
        /// Modulus bytes.
        modulus: Vec<u8>,
        /// Public exponent bytes.
        exponent: Vec<u8>,
    },
    /// EC point coordinates, big-endian.
    Ec {
        /// Curve the point lives on.
        curve: EcCurve,
        /// X coordinate.
        x: Vec<u8>,
        /// Y coordinate.
        y: Vec<u8>,
    },
    /// Ed25519 public key bytes.
    Ed25519 {
        /// The 32-byte public key.
        x: Vec<u8>,
    },
}

/// A published verification key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    /// Key id, matching the `kid` written into signed tokens.
    pub key_id: String,
    /// JWS algorithm name (`EdDSA`, `ES256`, `RS256`, ...).
    pub algorithm: String,
    /// Key use; always `sig` for this service.
    pub key_use: String,
    /// The key material.
    pub key: KeyMaterial,
}

/// Per-issuance input bundle.
///
/// Built once per request by the token service. `audience` is always
/// the service's configured trust domain — never the client's requested
/// audience.
#[derive(Clone)]
pub struct IssueContext {
    /// The validated subject.
    pub subject: AttestedIdentity,
    /// The validated actor, when one was presented.
    pub actor: Option<AttestedIdentity>,
    /// Request attributes.
    pub request: RequestAttributes,
    /// Audience stamped into issued tokens.
    pub audience: String,
    /// Scope carried through from the request.
    pub scope: String,
    /// Data sources available to mappers.
    pub data_sources: Arc<DataSourceRegistry>,
}

impl IssueContext {
    /// Run `mappers` over this context and fold their outputs.
    ///
    /// The mapper input (including the data source fetch input) is
    /// built once; every mapper sees the same input, and outputs merge
    /// late-wins on top-level keys. The first mapper error aborts the
    /// fold.
    pub async fn to_claims(&self, mappers: &[Arc<dyn ClaimMapper>]) -> Result<Claims> {
        let fetch_input =
            FetchInput::new(Some(&self.subject), self.actor.as_ref(), Some(&self.request));
        let input = MapperInput {
            subject: &self.subject,
            actor: self.actor.as_ref(),
            request: &self.request,
            data_sources: &self.data_sources,
            fetch_input: &fetch_input,
        };

        let mut claims = Claims::new();
        for mapper in mappers {
            if let Some(mapped) = mapper.map(&input).await? {
                merge_claims(&mut claims, mapped);
            }
        }
        Ok(claims)
    }
}

impl std::fmt::Debug for IssueContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssueContext")
            .field("subject", &self.subject.subject)
            .field("actor", &self.actor.as_ref().map(|a| a.subject.as_str()))
            .field("audience", &self.audience)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Produces tokens of one kind from issue contexts.
#[async_trait]
pub trait Issuer: Send + Sync {
    /// Mint a token for `context`.
    async fn issue(&self, context: &IssueContext) -> Result<Token>;

    /// Verification keys for tokens this issuer mints; empty for
    /// unsigned token kinds.
    async fn public_keys(&self) -> Result<Vec<PublicKey>>;
}

impl std::fmt::Debug for dyn Issuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Issuer")
    }
}
