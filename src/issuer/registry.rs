//! Token-type to issuer dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Issuer, PublicKey};
use crate::{Error, Result};

/// Aggregate result of collecting keys across issuers.
///
/// Key collection is the one place partial success is allowed: keys
/// from healthy issuers are served even when another issuer's backend
/// is down, with the failures reported alongside.
#[derive(Default)]
pub struct AggregatedPublicKeys {
    /// Keys from every issuer that answered.
    pub keys: Vec<PublicKey>,
    /// Failures, tagged with the failing issuer's token type.
    pub errors: Vec<(String, Error)>,
}

/// Process-wide issuer lookup; immutable after startup.
#[derive(Default)]
pub struct IssuerRegistry {
    issuers: HashMap<String, Arc<dyn Issuer>>,
}

impl IssuerRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `issuer` for `token_type`.
    ///
    /// # Errors
    ///
    /// `Error::Config` when the token type is already taken.
    pub fn register(&mut self, token_type: impl Into<String>, issuer: Arc<dyn Issuer>) -> Result<()> {
        let token_type = token_type.into();
        if self.issuers.contains_key(&token_type) {
            return Err(Error::Config(format!(
                "duplicate issuer for token type '{token_type}'"
            )));
        }
        self.issuers.insert(token_type, issuer);
        Ok(())
    }

    /// Look up the issuer for `token_type`.
    ///
    /// # Errors
    ///
    /// `Error::UnknownTokenType` when nothing is registered.
    pub fn get(&self, token_type: &str) -> Result<Arc<dyn Issuer>> {
        self.issuers
            .get(token_type)
            .cloned()
            .ok_or_else(|| Error::UnknownTokenType(token_type.to_string()))
    }

    /// Collect public keys across all issuers.
    ///
    /// Issuers are visited in sorted token-type order so the output is
    /// deterministic.
    pub async fn all_public_keys(&self) -> AggregatedPublicKeys {
        let mut aggregated = AggregatedPublicKeys::default();

        let mut token_types: Vec<&String> = self.issuers.keys().collect();
        token_types.sort();

        for token_type in token_types {
            match self.issuers[token_type].public_keys().await {
                Ok(keys) => aggregated.keys.extend(keys),
                Err(e) => aggregated.errors.push((token_type.clone(), e)),
            }
        }

        aggregated
    }

    /// Registered token types, sorted.
    #[must_use]
    pub fn token_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.issuers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for IssuerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuerRegistry")
            .field("token_types", &self.token_types())
            .finish()
    }
}
