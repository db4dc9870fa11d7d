//! Fixed-identity validator.
//!
//! Returns a preconfigured identity for any credential of its kinds.
//! Useful for bootstrap environments without an IdP and as the workhorse
//! of trust-store tests.

use async_trait::async_trait;

use crate::credential::{AttestedIdentity, Credential, CredentialKind};
use crate::{Error, Result};

/// Validator that attests a fixed identity, or a fixed failure.
pub struct StaticValidator {
    kinds: Vec<CredentialKind>,
    outcome: std::result::Result<AttestedIdentity, String>,
}

impl StaticValidator {
    /// Always attest `identity` for credentials of `kinds`.
    #[must_use]
    pub fn attesting(kinds: Vec<CredentialKind>, identity: AttestedIdentity) -> Self {
        Self {
            kinds,
            outcome: Ok(identity),
        }
    }

    /// Always fail with an invalid-credential error carrying `reason`.
    #[must_use]
    pub fn rejecting(kinds: Vec<CredentialKind>, reason: impl Into<String>) -> Self {
        Self {
            kinds,
            outcome: Err(reason.into()),
        }
    }
}

#[async_trait]
impl super::Validator for StaticValidator {
    async fn validate(&self, _credential: &Credential) -> Result<AttestedIdentity> {
        match &self.outcome {
            Ok(identity) => Ok(identity.clone()),
            Err(reason) => Err(Error::InvalidCredential(reason.clone())),
        }
    }

    fn credential_kinds(&self) -> &[CredentialKind] {
        &self.kinds
    }
}
