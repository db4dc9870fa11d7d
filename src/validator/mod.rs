//! Credential validators.
//!
//! A validator converts one family of [`Credential`] into an attested
//! [`AttestedIdentity`]. Implementations:
//!
//! | Validator | Accepts | Source of truth |
//! |-----------|---------|-----------------|
//! | [`JwtValidator`] | `jwt`, `bearer` | Issuer JWKS, background-refreshed |
//! | [`JsonValidator`] | `json` | The document itself, claims-filtered |
//! | [`MtlsValidator`] | `mtls` | Peer certificate subject/SANs |
//! | [`StaticValidator`] | configurable | Fixed identity (tests, bootstrap) |
//!
//! A validator may accept multiple related kinds — the JWT validator also
//! takes `bearer`, because opaque bearer tokens are JWTs in practice.

pub mod json;
pub mod jwt;
pub mod mtls;
pub mod stub;

use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;
use crate::credential::{AttestedIdentity, Credential, CredentialKind};

pub use json::JsonValidator;
pub use jwt::JwtValidator;
pub use mtls::MtlsValidator;
pub use stub::StaticValidator;

/// Converts a credential into an attested identity.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Validate `credential` and return the attested identity.
    ///
    /// # Errors
    ///
    /// `Error::InvalidCredential` for malformed or unverifiable
    /// credentials, `Error::ExpiredCredential` specifically for tokens
    /// past their `exp`.
    async fn validate(&self, credential: &Credential) -> Result<AttestedIdentity>;

    /// The credential kinds this validator accepts.
    fn credential_kinds(&self) -> &[CredentialKind];
}

/// A validator with its stable registry name.
///
/// Names are what policy filters see; they must be unique within a trust
/// store.
#[derive(Clone)]
pub struct NamedValidator {
    /// Stable identifier used by policy filters.
    pub name: String,
    /// The validator itself.
    pub validator: Arc<dyn Validator>,
}

impl NamedValidator {
    /// Pair a validator with its registry name.
    #[must_use]
    pub fn new(name: impl Into<String>, validator: Arc<dyn Validator>) -> Self {
        Self {
            name: name.into(),
            validator,
        }
    }
}

impl std::fmt::Debug for NamedValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedValidator")
            .field("name", &self.name)
            .field("kinds", &self.validator.credential_kinds())
            .finish()
    }
}
