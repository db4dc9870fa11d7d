//! Trust store — validator indexing, selection and policy filtering.
//!
//! The store indexes [`NamedValidator`]s by the credential kinds they
//! accept and tries them in registration order; the first success wins.
//! [`TrustStore::for_actor`] derives the per-request *filtered view*: a
//! fresh store restricted to the validators the configured policy admits
//! for `(actor, request)`.

pub mod policy;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::credential::{AttestedIdentity, Credential, CredentialKind, RequestAttributes};
use crate::validator::{NamedValidator, Validator};
use crate::{Error, Result};

pub use policy::{AnyPolicy, CelPolicy, PolicyInput, ValidatorPolicy};

/// An ordered set of named validators with an optional eligibility
/// policy.
///
/// Built once at startup; filtered views are derived per request and
/// share the parent's validators.
#[derive(Clone, Default)]
pub struct TrustStore {
    validators: Vec<NamedValidator>,
    by_kind: HashMap<CredentialKind, Vec<usize>>,
    policy: Option<Arc<dyn ValidatorPolicy>>,
}

impl TrustStore {
    /// Start building a store.
    #[must_use]
    pub fn builder() -> TrustStoreBuilder {
        TrustStoreBuilder::default()
    }

    fn assemble(
        validators: Vec<NamedValidator>,
        policy: Option<Arc<dyn ValidatorPolicy>>,
    ) -> Self {
        let mut by_kind: HashMap<CredentialKind, Vec<usize>> = HashMap::new();
        for (index, named) in validators.iter().enumerate() {
            for kind in named.validator.credential_kinds() {
                by_kind.entry(*kind).or_default().push(index);
            }
        }
        Self {
            validators,
            by_kind,
            policy,
        }
    }

    /// Validate a credential against the eligible validators, in
    /// registration order.
    ///
    /// # Errors
    ///
    /// `Error::NoValidator` when nothing is registered for the
    /// credential's kind; `Error::AllValidatorsFailed` (carrying the
    /// last failure) when every eligible validator rejected it.
    pub async fn validate(&self, credential: &Credential) -> Result<AttestedIdentity> {
        let kind = credential.kind();
        let Some(indices) = self.by_kind.get(&kind).filter(|i| !i.is_empty()) else {
            return Err(Error::NoValidator(kind.to_string()));
        };

        let mut last_error = None;
        for &index in indices {
            let named = &self.validators[index];
            match named.validator.validate(credential).await {
                Ok(identity) => {
                    debug!(validator = %named.name, subject = %identity.subject, "credential validated");
                    return Ok(identity);
                }
                Err(e) => {
                    debug!(validator = %named.name, error = %e, "validator rejected credential");
                    last_error = Some(e);
                }
            }
        }

        Err(Error::AllValidatorsFailed {
            tried: indices.len(),
            last: Box::new(
                last_error.unwrap_or_else(|| Error::NoValidator(kind.to_string())),
            ),
        })
    }

    /// Derive the filtered view for `(actor, request)`.
    ///
    /// Without a configured policy this is the identity — the original
    /// store is returned unchanged. With one, the view keeps exactly the
    /// validators whose name the policy admits. Callers pass the
    /// anonymous identity when no actor credential was presented; a
    /// filtered-to-empty view is valid and rejects every credential with
    /// a no-validator error.
    pub fn for_actor(
        &self,
        actor: &AttestedIdentity,
        request: &RequestAttributes,
    ) -> Result<Self> {
        let Some(policy) = &self.policy else {
            return Ok(self.clone());
        };

        let input = PolicyInput::new(actor, request)?;
        let mut admitted = Vec::new();
        for named in &self.validators {
            if policy.is_allowed(&input, &named.name)? {
                admitted.push(named.clone());
            }
        }

        debug!(
            actor = %actor.subject,
            admitted = admitted.len(),
            total = self.validators.len(),
            "derived filtered trust store"
        );
        Ok(Self::assemble(admitted, Some(Arc::clone(policy))))
    }

    /// Number of validators in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Whether the store holds no validators.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Names of the validators, in registration order.
    #[must_use]
    pub fn validator_names(&self) -> Vec<&str> {
        self.validators.iter().map(|v| v.name.as_str()).collect()
    }
}

impl std::fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustStore")
            .field("validators", &self.validator_names())
            .field("filtered", &self.policy.is_some())
            .finish()
    }
}

/// Builder enforcing name uniqueness.
#[derive(Default)]
pub struct TrustStoreBuilder {
    validators: Vec<NamedValidator>,
    policy: Option<Arc<dyn ValidatorPolicy>>,
}

impl TrustStoreBuilder {
    /// Register a validator under `name`.
    #[must_use]
    pub fn validator(mut self, name: impl Into<String>, validator: Arc<dyn Validator>) -> Self {
        self.validators.push(NamedValidator::new(name, validator));
        self
    }

    /// Set the eligibility policy applied by [`TrustStore::for_actor`].
    #[must_use]
    pub fn policy(mut self, policy: Arc<dyn ValidatorPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Finish building.
    ///
    /// # Errors
    ///
    /// `Error::Config` when two validators share a name.
    pub fn build(self) -> Result<TrustStore> {
        let mut seen = std::collections::HashSet::new();
        for named in &self.validators {
            if !seen.insert(named.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate validator name '{}'",
                    named.name
                )));
            }
        }
        Ok(TrustStore::assemble(self.validators, self.policy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Claims;
    use crate::validator::StaticValidator;
    use serde_json::json;

    fn identity(subject: &str, trust_domain: &str) -> AttestedIdentity {
        AttestedIdentity {
            subject: subject.into(),
            issuer: "https://idp".into(),
            trust_domain: trust_domain.into(),
            ..AttestedIdentity::default()
        }
    }

    fn attesting(subject: &str) -> Arc<dyn Validator> {
        Arc::new(StaticValidator::attesting(
            vec![CredentialKind::Bearer],
            identity(subject, "t"),
        ))
    }

    fn rejecting(reason: &str) -> Arc<dyn Validator> {
        Arc::new(StaticValidator::rejecting(
            vec![CredentialKind::Bearer],
            reason,
        ))
    }

    #[tokio::test]
    async fn first_success_wins_in_registration_order() {
        let store = TrustStore::builder()
            .validator("first", rejecting("first says no"))
            .validator("second", attesting("from-second"))
            .validator("third", attesting("from-third"))
            .build()
            .unwrap();

        let attested = store.validate(&Credential::bearer("tok")).await.unwrap();
        assert_eq!(attested.subject, "from-second");
    }

    #[tokio::test]
    async fn all_failures_aggregate_with_last_error() {
        let store = TrustStore::builder()
            .validator("a", rejecting("error A"))
            .validator("b", rejecting("error B"))
            .build()
            .unwrap();

        let err = store
            .validate(&Credential::bearer("tok"))
            .await
            .unwrap_err();
        match err {
            Error::AllValidatorsFailed { tried, last } => {
                assert_eq!(tried, 2);
                assert!(last.to_string().contains("error B"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_kind_is_distinct_from_validation_failure() {
        let store = TrustStore::builder()
            .validator("bearer-only", attesting("alice"))
            .build()
            .unwrap();

        let err = store
            .validate(&Credential::Json {
                raw: bytes::Bytes::from_static(b"{}"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoValidator(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn for_actor_without_policy_is_identity() {
        let store = TrustStore::builder()
            .validator("a", attesting("alice"))
            .build()
            .unwrap();

        let view = store
            .for_actor(&AttestedIdentity::anonymous(), &RequestAttributes::default())
            .unwrap();
        assert_eq!(view.validator_names(), store.validator_names());
    }

    #[tokio::test]
    async fn for_actor_admits_exactly_the_policy_set() {
        let policy = Arc::new(
            CelPolicy::compile(
                r#"actor.trust_domain == "prod" || validator_name == "public""#,
            )
            .unwrap(),
        );
        let store = TrustStore::builder()
            .validator("internal", attesting("alice"))
            .validator("public", attesting("bob"))
            .policy(policy)
            .build()
            .unwrap();

        // Production actor: both validators admitted.
        let prod_actor = identity("spiffe://cluster/gw", "prod");
        let view = store
            .for_actor(&prod_actor, &RequestAttributes::default())
            .unwrap();
        assert_eq!(view.validator_names(), vec!["internal", "public"]);

        // Staging actor: only the name-matched validator remains.
        let staging_actor = identity("spiffe://cluster/gw", "staging");
        let view = store
            .for_actor(&staging_actor, &RequestAttributes::default())
            .unwrap();
        assert_eq!(view.validator_names(), vec!["public"]);
    }

    #[tokio::test]
    async fn anonymous_actor_filtered_to_empty_fails_with_no_validator() {
        let policy = Arc::new(CelPolicy::compile(r#"actor.trust_domain == "prod""#).unwrap());
        let store = TrustStore::builder()
            .validator("internal", attesting("alice"))
            .policy(policy)
            .build()
            .unwrap();

        let view = store
            .for_actor(&AttestedIdentity::anonymous(), &RequestAttributes::default())
            .unwrap();
        assert!(view.is_empty());

        let err = view
            .validate(&Credential::bearer("tok"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoValidator(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn policy_sees_request_attributes() {
        let policy =
            Arc::new(CelPolicy::compile(r#"request.additional.env == "prod""#).unwrap());
        let store = TrustStore::builder()
            .validator("v", attesting("alice"))
            .policy(policy)
            .build()
            .unwrap();

        let mut additional = Claims::new();
        additional.insert("env".into(), json!("prod"));
        let request = RequestAttributes {
            additional,
            ..RequestAttributes::default()
        };

        let view = store.for_actor(&identity("gw", "t"), &request).unwrap();
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = TrustStore::builder()
            .validator("same", attesting("a"))
            .validator("same", attesting("b"))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
