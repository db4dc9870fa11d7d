//! Claims filtering.
//!
//! A [`ClaimsFilter`] decides which claims from an untrusted source
//! survive into the pipeline. Two policy points use it:
//!
//! - the JSON credential validator, to constrain inbound identity
//!   documents, and
//! - the exchange endpoint, to decide which client-asserted
//!   `request_context` claims a given *actor* may contribute
//!   ([`ClaimsFilterRegistry`]).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::credential::{AttestedIdentity, Claims};

/// Allow-list / deny-list / passthrough filter over top-level claim keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode")]
pub enum ClaimsFilter {
    /// Keep every claim.
    #[default]
    Passthrough,
    /// Keep only the listed claims.
    Allow {
        /// Claim keys to keep.
        claims: HashSet<String>,
    },
    /// Drop the listed claims, keep the rest.
    Deny {
        /// Claim keys to drop.
        claims: HashSet<String>,
    },
}

impl ClaimsFilter {
    /// Allow-list filter over `keys`.
    #[must_use]
    pub fn allow<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Allow {
            claims: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Deny-list filter over `keys`.
    #[must_use]
    pub fn deny<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Deny {
            claims: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Apply the filter to a claim set.
    #[must_use]
    pub fn apply(&self, claims: &Claims) -> Claims {
        match self {
            Self::Passthrough => claims.clone(),
            Self::Allow { claims: keep } => claims
                .iter()
                .filter(|(k, _)| keep.contains(k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            Self::Deny { claims: drop } => claims
                .iter()
                .filter(|(k, _)| !drop.contains(k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// A filter rule bound to a class of actors.
///
/// A rule matches when its `subject` and `trust_domain` selectors (those
/// that are set) equal the actor's attested fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimsFilterRule {
    /// Match on the actor's subject; `None` matches any.
    pub subject: Option<String>,
    /// Match on the actor's trust domain; `None` matches any.
    pub trust_domain: Option<String>,
    /// Filter applied when the rule matches.
    pub filter: ClaimsFilter,
}

impl ClaimsFilterRule {
    fn matches(&self, actor: &AttestedIdentity) -> bool {
        self.subject.as_deref().is_none_or(|s| s == actor.subject)
            && self
                .trust_domain
                .as_deref()
                .is_none_or(|t| t == actor.trust_domain)
    }
}

/// Per-actor claims-filter lookup.
///
/// Rules are evaluated in order; the first match wins. Actors matching no
/// rule get the default filter. Populated at startup, immutable after.
#[derive(Debug, Clone, Default)]
pub struct ClaimsFilterRegistry {
    rules: Vec<ClaimsFilterRule>,
    default: ClaimsFilter,
}

impl ClaimsFilterRegistry {
    /// Build a registry from ordered rules and a fallback filter.
    #[must_use]
    pub fn new(rules: Vec<ClaimsFilterRule>, default: ClaimsFilter) -> Self {
        Self { rules, default }
    }

    /// The filter governing what `actor` may assert.
    #[must_use]
    pub fn filter_for(&self, actor: &AttestedIdentity) -> &ClaimsFilter {
        self.rules
            .iter()
            .find(|rule| rule.matches(actor))
            .map_or(&self.default, |rule| &rule.filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_claims() -> Claims {
        let mut claims = Claims::new();
        claims.insert("env".into(), json!("prod"));
        claims.insert("team".into(), json!("payments"));
        claims.insert("debug".into(), json!(true));
        claims
    }

    #[test]
    fn passthrough_keeps_everything() {
        let filtered = ClaimsFilter::Passthrough.apply(&sample_claims());
        assert_eq!(filtered.len(), 3);
    }

    #[test]
    fn allow_keeps_only_listed() {
        let filtered = ClaimsFilter::allow(["env"]).apply(&sample_claims());
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered["env"], json!("prod"));
    }

    #[test]
    fn deny_drops_listed() {
        let filtered = ClaimsFilter::deny(["debug"]).apply(&sample_claims());
        assert_eq!(filtered.len(), 2);
        assert!(!filtered.contains_key("debug"));
    }

    #[test]
    fn registry_first_match_wins() {
        let registry = ClaimsFilterRegistry::new(
            vec![
                ClaimsFilterRule {
                    subject: Some("spiffe://cluster/gateway".into()),
                    trust_domain: None,
                    filter: ClaimsFilter::allow(["env"]),
                },
                ClaimsFilterRule {
                    subject: None,
                    trust_domain: Some("prod".into()),
                    filter: ClaimsFilter::deny(["debug"]),
                },
            ],
            ClaimsFilter::allow(Vec::<String>::new()),
        );

        let gateway = AttestedIdentity {
            subject: "spiffe://cluster/gateway".into(),
            issuer: "x".into(),
            trust_domain: "prod".into(),
            ..AttestedIdentity::default()
        };
        let filtered = registry.filter_for(&gateway).apply(&sample_claims());
        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains_key("env"));

        let other_prod = AttestedIdentity {
            subject: "spiffe://cluster/other".into(),
            issuer: "x".into(),
            trust_domain: "prod".into(),
            ..AttestedIdentity::default()
        };
        let filtered = registry.filter_for(&other_prod).apply(&sample_claims());
        assert!(!filtered.contains_key("debug"));
        assert!(filtered.contains_key("team"));
    }

    #[test]
    fn registry_default_applies_when_no_rule_matches() {
        let registry = ClaimsFilterRegistry::new(Vec::new(), ClaimsFilter::allow(["env"]));
        let anon = AttestedIdentity::anonymous();
        let filtered = registry.filter_for(&anon).apply(&sample_claims());
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn filter_deserializes_from_config_shape() {
        let filter: ClaimsFilter =
            serde_json::from_value(json!({"mode": "allow", "claims": ["env", "team"]})).unwrap();
        let filtered = filter.apply(&sample_claims());
        assert_eq!(filtered.len(), 2);

        let filter: ClaimsFilter = serde_json::from_value(json!({"mode": "passthrough"})).unwrap();
        assert_eq!(filter.apply(&sample_claims()).len(), 3);
    }
}
