//! Validation of raw JSON identity documents.
//!
//! Trusted in-cluster callers (sidecars, test rigs) can present the
//! attested-identity shape directly as a JSON document. The validator
//! parses it, enforces the configured requirements, and runs the inbound
//! claims through a [`ClaimsFilter`] so a caller cannot smuggle arbitrary
//! claims into issued tokens.

use async_trait::async_trait;

use crate::claims::ClaimsFilter;
use crate::credential::{AttestedIdentity, Credential, CredentialKind};
use crate::{Error, Result};

const ACCEPTED_KINDS: &[CredentialKind] = &[CredentialKind::Json];

/// Configuration for a [`JsonValidator`].
#[derive(Debug, Clone, Default)]
pub struct JsonValidatorConfig {
    /// Reject documents without an `issuer` field.
    pub require_issuer: bool,
    /// When set, the document's `trust_domain` is overwritten (and, if
    /// the document carries a different non-empty value, rejected).
    pub trust_domain: Option<String>,
    /// Filter applied to the document's claims.
    pub claims_filter: ClaimsFilter,
}

/// Validates raw JSON identity documents.
#[derive(Debug, Default)]
pub struct JsonValidator {
    config: JsonValidatorConfig,
}

impl JsonValidator {
    /// Build a validator from config.
    #[must_use]
    pub fn new(config: JsonValidatorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl super::Validator for JsonValidator {
    async fn validate(&self, credential: &Credential) -> Result<AttestedIdentity> {
        let Credential::Json { raw } = credential else {
            return Err(Error::InvalidCredential(format!(
                "JSON validator cannot handle '{}' credentials",
                credential.kind()
            )));
        };

        let mut identity: AttestedIdentity = serde_json::from_slice(raw)
            .map_err(|e| Error::InvalidCredential(format!("malformed identity document: {e}")))?;

        if identity.subject.is_empty() {
            return Err(Error::InvalidCredential("missing subject".into()));
        }
        if self.config.require_issuer && identity.issuer.is_empty() {
            return Err(Error::InvalidCredential("missing issuer".into()));
        }

        if let Some(pinned) = &self.config.trust_domain {
            if !identity.trust_domain.is_empty() && identity.trust_domain != *pinned {
                return Err(Error::InvalidCredential(format!(
                    "trust domain '{}' does not match '{pinned}'",
                    identity.trust_domain
                )));
            }
            identity.trust_domain = pinned.clone();
        }

        identity.claims = self.config.claims_filter.apply(&identity.claims);
        Ok(identity)
    }

    fn credential_kinds(&self) -> &[CredentialKind] {
        ACCEPTED_KINDS
    }
}
