//! Unsigned token issuers.
//!
//! Both issuers here serialize the mapped claims to JSON and
//! base64-encode the document — no signature, no key material. They
//! exist for downstream services that sit behind the mesh boundary and
//! trust transport-level identity; the expiry is the far-future
//! sentinel because the token carries no verifiable lifetime anyway.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;

use super::{IssueContext, Issuer, PublicKey, Token, far_future};
use crate::Result;
use crate::clock::Clock;
use crate::mapper::ClaimMapper;

/// Issues base64-encoded JSON claim documents.
pub struct UnsignedIssuer {
    token_type: String,
    mappers: Vec<Arc<dyn ClaimMapper>>,
    clock: Arc<dyn Clock>,
}

impl UnsignedIssuer {
    /// Build the issuer for `token_type`.
    #[must_use]
    pub fn new(
        token_type: impl Into<String>,
        mappers: Vec<Arc<dyn ClaimMapper>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            token_type: token_type.into(),
            mappers,
            clock,
        }
    }
}

#[async_trait]
impl Issuer for UnsignedIssuer {
    async fn issue(&self, context: &IssueContext) -> Result<Token> {
        let claims = context.to_claims(&self.mappers).await?;
        let document = serde_json::to_vec(&claims)?;

        Ok(Token {
            value: STANDARD.encode(document),
            token_type: self.token_type.clone(),
            issued_at: self.clock.now(),
            expires_at: far_future(),
        })
    }

    async fn public_keys(&self) -> Result<Vec<PublicKey>> {
        Ok(Vec::new())
    }
}

/// Issues claims wrapped in an `{"identity": ...}` envelope.
///
/// The envelope shape is what Red Hat identity middleware expects in
/// its identity header.
pub struct IdentityEnvelopeIssuer {
    token_type: String,
    mappers: Vec<Arc<dyn ClaimMapper>>,
    clock: Arc<dyn Clock>,
}

impl IdentityEnvelopeIssuer {
    /// Build the issuer for `token_type`.
    #[must_use]
    pub fn new(
        token_type: impl Into<String>,
        mappers: Vec<Arc<dyn ClaimMapper>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            token_type: token_type.into(),
            mappers,
            clock,
        }
    }
}

#[async_trait]
impl Issuer for IdentityEnvelopeIssuer {
    async fn issue(&self, context: &IssueContext) -> Result<Token> {
        let claims = context.to_claims(&self.mappers).await?;
        let envelope = json!({ "identity": claims });
        let document = serde_json::to_vec(&envelope)?;

        Ok(Token {
            value: STANDARD.encode(document),
            token_type: self.token_type.clone(),
            issued_at: self.clock.now(),
            expires_at: far_future(),
        })
    }

    async fn public_keys(&self) -> Result<Vec<PublicKey>> {
        Ok(Vec::new())
    }
}
