//! Signed transaction-token issuer.
//!
//! Mints the IETF transaction-token shape: a JWT whose `tctx` claim
//! carries the transaction context (mapped once per transaction) and
//! whose `req_ctx` claim carries the request context, as two distinct
//! mapper chains. Signing material comes from a [`RotatingSigner`]; the
//! current key id lands in the JWS protected header.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, Header};
use serde_json::json;
use uuid::Uuid;

use super::{IssueContext, Issuer, PublicKey, RotatingSigner, TXN_TOKEN_TYPE, Token};
use crate::clock::Clock;
use crate::credential::Claims;
use crate::mapper::ClaimMapper;
use crate::{Error, Result};

/// Default transaction token lifetime.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(5 * 60);

/// JWT `typ` header for transaction tokens.
const TXN_TOKEN_TYP: &str = "txn_token";

/// Configuration for a [`TxnTokenIssuer`].
#[derive(Debug, Clone)]
pub struct TxnTokenIssuerConfig {
    /// Value of the `iss` claim.
    pub issuer_url: String,
    /// Token lifetime (`exp - iat`).
    pub ttl: Duration,
}

/// Issues signed transaction tokens.
pub struct TxnTokenIssuer {
    config: TxnTokenIssuerConfig,
    transaction_mappers: Vec<Arc<dyn ClaimMapper>>,
    request_mappers: Vec<Arc<dyn ClaimMapper>>,
    signer: Arc<dyn RotatingSigner>,
    clock: Arc<dyn Clock>,
}

impl TxnTokenIssuer {
    /// Build the issuer.
    #[must_use]
    pub fn new(
        config: TxnTokenIssuerConfig,
        transaction_mappers: Vec<Arc<dyn ClaimMapper>>,
        request_mappers: Vec<Arc<dyn ClaimMapper>>,
        signer: Arc<dyn RotatingSigner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            transaction_mappers,
            request_mappers,
            signer,
            clock,
        }
    }
}

#[async_trait]
impl Issuer for TxnTokenIssuer {
    async fn issue(&self, context: &IssueContext) -> Result<Token> {
        let transaction_context = context.to_claims(&self.transaction_mappers).await?;
        let request_context = context.to_claims(&self.request_mappers).await?;

        let issued_at = self.clock.now();
        let ttl = chrono::Duration::from_std(self.config.ttl)
            .map_err(|e| Error::Config(format!("token ttl: {e}")))?;
        let expires_at = issued_at + ttl;

        let mut payload = Claims::new();
        payload.insert("iss".into(), json!(self.config.issuer_url));
        payload.insert("sub".into(), json!(context.subject.subject));
        payload.insert("aud".into(), json!([context.audience]));
        payload.insert("iat".into(), json!(issued_at.timestamp()));
        payload.insert("nbf".into(), json!(issued_at.timestamp()));
        payload.insert("exp".into(), json!(expires_at.timestamp()));
        payload.insert("jti".into(), json!(Uuid::new_v4().to_string()));
        payload.insert("txn".into(), json!(Uuid::new_v4().to_string()));
        if !context.scope.is_empty() {
            payload.insert("scope".into(), json!(context.scope));
        }
        if !transaction_context.is_empty() {
            payload.insert("tctx".into(), serde_json::Value::Object(transaction_context));
        }
        if !request_context.is_empty() {
            payload.insert("req_ctx".into(), serde_json::Value::Object(request_context));
        }

        let handle = self.signer.current()?;
        check_signing_algorithm(handle.algorithm)?;

        let mut header = Header::new(handle.algorithm);
        header.kid = Some(handle.key_id.clone());
        header.typ = Some(TXN_TOKEN_TYP.to_string());

        let value = jsonwebtoken::encode(&header, &payload, &handle.key)
            .map_err(|e| Error::Signing(format!("token encoding: {e}")))?;

        Ok(Token {
            value,
            token_type: TXN_TOKEN_TYPE.to_string(),
            issued_at,
            expires_at,
        })
    }

    async fn public_keys(&self) -> Result<Vec<PublicKey>> {
        self.signer.public_keys()
    }
}

/// Algorithms the signing path supports; anything else fails explicitly
/// rather than producing a token the JWKS surface cannot describe.
fn check_signing_algorithm(algorithm: Algorithm) -> Result<()> {
    match algorithm {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::ES256
        | Algorithm::ES384
        | Algorithm::EdDSA => Ok(()),
        other => Err(Error::Signing(format!(
            "unsupported signing algorithm {other:?}"
        ))),
    }
}
