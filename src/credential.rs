//! Credential and attested-identity model.
//!
//! A [`Credential`] carries only validation material — the raw token,
//! certificate, or document presented by a caller. Validation turns a
//! credential into an [`AttestedIdentity`], which is what the rest of the
//! pipeline (policy filters, mappers, issuers) operates on.
//!
//! [`RequestAttributes`] is the normalized per-request metadata bundle
//! shared by both entry points.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Arbitrary string-keyed claim values.
///
/// `serde_json::Map` is backed by a `BTreeMap`, so serialization order is
/// stable regardless of insertion order — the canonical-JSON property the
/// cache layer relies on.
pub type Claims = serde_json::Map<String, serde_json::Value>;

/// The credential families the service understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    /// Opaque bearer token.
    Bearer,
    /// JSON Web Token.
    Jwt,
    /// OIDC identity token with issuer/client hints.
    Oidc,
    /// Peer X.509 certificate material.
    Mtls,
    /// Raw JSON identity document.
    Json,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bearer => "bearer",
            Self::Jwt => "jwt",
            Self::Oidc => "oidc",
            Self::Mtls => "mtls",
            Self::Json => "json",
        };
        f.write_str(name)
    }
}

/// An externally-presented credential, pre-validation.
///
/// Credentials are owned by the request handler and dropped when the
/// request ends. No attested state lives here.
#[derive(Debug, Clone)]
pub enum Credential {
    /// Opaque bearer token (may turn out to be a JWT).
    Bearer {
        /// The raw token string.
        token: String,
    },
    /// A JWT with optional routing hints from the presenter.
    Jwt {
        /// The compact-serialized JWT.
        token: String,
        /// Expected signing algorithm, if the presenter knows it.
        algorithm: Option<String>,
        /// Key id hint.
        key_id: Option<String>,
        /// Issuer hint.
        issuer: Option<String>,
    },
    /// OIDC identity token.
    Oidc {
        /// The compact-serialized ID token.
        token: String,
        /// Issuer the token claims to come from.
        issuer: String,
        /// OAuth client id the token was minted for.
        client_id: String,
    },
    /// Peer certificate material from an mTLS handshake.
    Mtls {
        /// DER-encoded leaf certificate.
        cert: Bytes,
        /// DER-encoded intermediate chain, leaf-first.
        chain: Vec<Bytes>,
        /// Hex SHA-256 of the peer certificate, when the proxy provides it.
        peer_hash: Option<String>,
        /// Issuer identity asserted by the proxy.
        issuer_identity: Option<String>,
    },
    /// Raw JSON identity document.
    Json {
        /// The unparsed document bytes.
        raw: Bytes,
    },
}

impl Credential {
    /// The credential's kind tag, used for validator lookup.
    #[must_use]
    pub fn kind(&self) -> CredentialKind {
        match self {
            Self::Bearer { .. } => CredentialKind::Bearer,
            Self::Jwt { .. } => CredentialKind::Jwt,
            Self::Oidc { .. } => CredentialKind::Oidc,
            Self::Mtls { .. } => CredentialKind::Mtls,
            Self::Json { .. } => CredentialKind::Json,
        }
    }

    /// Shorthand for a bearer credential.
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }
}

/// The attested outcome of validating a credential.
///
/// An identity with empty `subject` and `issuer` is the *anonymous*
/// identity, used when no actor credential is presented. Everywhere else,
/// `subject` is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttestedIdentity {
    /// Stable identifier of the principal within its trust domain.
    pub subject: String,
    /// Authority that attested the identity.
    pub issuer: String,
    /// Namespace of the identity; usually 1:1 with the issuer.
    pub trust_domain: String,
    /// All claims carried by the credential, standard and custom.
    pub claims: Claims,
    /// When the credential expires, if bounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// When the credential was issued, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,
    /// Audiences the credential was minted for.
    pub audience: Vec<String>,
    /// Space-separated scope string.
    pub scope: String,
}

impl AttestedIdentity {
    /// The anonymous identity — empty subject and issuer.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Whether this is the anonymous identity.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.subject.is_empty() && self.issuer.is_empty()
    }
}

/// Normalized per-request metadata.
///
/// Header keys are lowercased on construction so lookups are
/// case-insensitive. `additional` is the escape hatch for
/// deployment-specific context — proxy context extensions, plus
/// server-side metadata appended during an exchange
/// (`requested_audience`, `requested_scope`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestAttributes {
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Client IP address as reported by the edge.
    pub ip_address: String,
    /// User-Agent header value.
    pub user_agent: String,
    /// Request headers, keys lowercased.
    pub headers: HashMap<String, String>,
    /// Deployment-specific context.
    pub additional: Claims,
}

impl RequestAttributes {
    /// Build attributes with lowercased header keys.
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        headers: HashMap<String, String>,
    ) -> Self {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect::<HashMap<_, _>>();
        let user_agent = headers.get("user-agent").cloned().unwrap_or_default();

        Self {
            method: method.into(),
            path: path.into(),
            ip_address: String::new(),
            user_agent,
            headers,
            additional: Claims::new(),
        }
    }

    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn credential_kind_tags() {
        assert_eq!(Credential::bearer("tok").kind(), CredentialKind::Bearer);
        assert_eq!(
            Credential::Json {
                raw: Bytes::from_static(b"{}"),
            }
            .kind(),
            CredentialKind::Json
        );
        assert_eq!(CredentialKind::Mtls.to_string(), "mtls");
    }

    #[test]
    fn anonymous_identity_is_empty() {
        let anon = AttestedIdentity::anonymous();
        assert!(anon.is_anonymous());
        assert!(anon.subject.is_empty());
        assert!(anon.claims.is_empty());
    }

    #[test]
    fn populated_identity_is_not_anonymous() {
        let identity = AttestedIdentity {
            subject: "alice".into(),
            issuer: "https://idp".into(),
            ..AttestedIdentity::default()
        };
        assert!(!identity.is_anonymous());
    }

    #[test]
    fn identity_round_trips_through_json() {
        let mut claims = Claims::new();
        claims.insert("role".into(), json!("admin"));
        claims.insert("level".into(), json!(3));
        let identity = AttestedIdentity {
            subject: "alice".into(),
            issuer: "https://idp".into(),
            trust_domain: "prod".into(),
            claims,
            audience: vec!["svc".into()],
            scope: "read write".into(),
            ..AttestedIdentity::default()
        };

        let encoded = serde_json::to_string(&identity).unwrap();
        let decoded: AttestedIdentity = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, identity);
    }

    #[test]
    fn identity_deserializes_from_partial_document() {
        // A masked cache key may carry only a subset of fields.
        let decoded: AttestedIdentity = serde_json::from_str(r#"{"subject":"alice"}"#).unwrap();
        assert_eq!(decoded.subject, "alice");
        assert!(decoded.issuer.is_empty());
        assert!(decoded.claims.is_empty());
    }

    #[test]
    fn request_attributes_lowercase_headers() {
        let mut headers = HashMap::new();
        headers.insert("User-Agent".to_string(), "curl/8".to_string());
        headers.insert("X-Custom".to_string(), "v".to_string());

        let attrs = RequestAttributes::new("GET", "/api", headers);
        assert_eq!(attrs.user_agent, "curl/8");
        assert_eq!(attrs.header("x-custom"), Some("v"));
        assert_eq!(attrs.header("X-CUSTOM"), Some("v"));
        assert_eq!(attrs.header("missing"), None);
    }

    #[test]
    fn claims_serialize_with_sorted_keys() {
        let mut a = Claims::new();
        a.insert("zeta".into(), json!(1));
        a.insert("alpha".into(), json!(2));

        let mut b = Claims::new();
        b.insert("alpha".into(), json!(2));
        b.insert("zeta".into(), json!(1));

        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
