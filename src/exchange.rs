//! RFC 8693 token exchange endpoint.
//!
//! `POST /v1/token` accepts `application/json` and
//! `application/x-www-form-urlencoded` bodies; responses are always
//! JSON. The pipeline per request:
//!
//! 1. reject any grant type other than the token-exchange URN,
//! 2. authenticate the calling workload (client certificate, then
//!    bearer; absent means anonymous) against the *unfiltered* store,
//! 3. decode client-asserted `request_context`, constrained by the
//!    actor's claims filter, into request attributes,
//! 4. derive the policy-filtered trust store for `(actor, request)`,
//! 5. validate the subject token through the filtered store,
//! 6. enforce the requested audience against the trust domain,
//! 7. issue the requested token type.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::claims::ClaimsFilterRegistry;
use crate::credential::{AttestedIdentity, Claims, Credential, RequestAttributes};
use crate::extract;
use crate::issuer::TXN_TOKEN_TYPE;
use crate::service::{IssueRequest, TokenService};
use crate::trust::TrustStore;
use crate::{Error, Result};

/// The one grant type this endpoint speaks.
pub const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";

/// RFC 8693 token exchange request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExchangeRequest {
    /// Must be [`TOKEN_EXCHANGE_GRANT`].
    pub grant_type: String,
    /// Accepted, not consulted by the issuance path.
    pub resource: String,
    /// Requested audience; must equal the trust domain when non-empty.
    pub audience: String,
    /// Requested scope, carried into issued tokens.
    pub scope: String,
    /// Token type to mint; defaults to the transaction token.
    pub requested_token_type: String,
    /// The subject credential.
    pub subject_token: String,
    /// Declared type of `subject_token`.
    pub subject_token_type: String,
    /// Accepted for RFC compliance; the actor comes from transport
    /// metadata instead.
    pub actor_token: String,
    /// Declared type of `actor_token`.
    pub actor_token_type: String,
    /// base64-encoded JSON object of client-asserted request claims.
    pub request_context: String,
}

/// RFC 8693 token exchange response.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeResponse {
    /// The issued token.
    pub access_token: String,
    /// Token-type URN of `access_token`.
    pub issued_token_type: String,
    /// Always `"Bearer"`.
    pub token_type: String,
    /// Seconds until expiry.
    pub expires_in: i64,
    /// Granted scope.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub scope: String,
}

/// The exchange endpoint's wiring.
pub struct ExchangeEndpoint {
    trust_store: TrustStore,
    token_service: Arc<TokenService>,
    claims_filters: Arc<ClaimsFilterRegistry>,
    default_token_type: String,
}

impl ExchangeEndpoint {
    /// Build the endpoint; an empty `default_token_type` falls back to
    /// the transaction-token URN.
    #[must_use]
    pub fn new(
        trust_store: TrustStore,
        token_service: Arc<TokenService>,
        claims_filters: Arc<ClaimsFilterRegistry>,
        default_token_type: impl Into<String>,
    ) -> Self {
        let default_token_type = {
            let token_type = default_token_type.into();
            if token_type.is_empty() {
                TXN_TOKEN_TYPE.to_string()
            } else {
                token_type
            }
        };
        Self {
            trust_store,
            token_service,
            claims_filters,
            default_token_type,
        }
    }

    /// Run one exchange.
    ///
    /// `metadata` is the transport metadata (lowercased header map) the
    /// actor credential is extracted from.
    pub async fn exchange(
        &self,
        metadata: &HashMap<String, String>,
        request: ExchangeRequest,
    ) -> Result<ExchangeResponse> {
        if request.grant_type != TOKEN_EXCHANGE_GRANT {
            return Err(Error::UnsupportedGrantType(request.grant_type));
        }
        if request.subject_token.is_empty() {
            return Err(Error::Decode("subject_token is required".into()));
        }

        // Actor: anonymous when absent, hard failure when invalid.
        let actor = match extract::actor_credential(metadata) {
            Some(credential) => self.trust_store.validate(&credential).await?,
            None => AttestedIdentity::anonymous(),
        };

        let mut attributes = self.request_attributes(&actor, &request)?;
        attributes
            .additional
            .insert("requested_audience".into(), json!(request.audience.clone()));
        if !request.scope.is_empty() {
            attributes
                .additional
                .insert("requested_scope".into(), json!(request.scope.clone()));
        }

        let filtered_store = self.trust_store.for_actor(&actor, &attributes)?;

        // Subject credentials are bearer for now, whatever
        // subject_token_type declares; richer dispatch would branch here.
        let subject_credential = Credential::bearer(request.subject_token);
        let subject = filtered_store.validate(&subject_credential).await?;

        let trust_domain = self.token_service.trust_domain().to_string();
        if !request.audience.is_empty() && request.audience != trust_domain {
            return Err(Error::AudienceMismatch {
                requested: request.audience,
                trust_domain,
            });
        }

        let token_type = if request.requested_token_type.is_empty() {
            self.default_token_type.clone()
        } else {
            request.requested_token_type.clone()
        };

        debug!(subject = %subject.subject, actor = %actor.subject, token_type = %token_type, "exchanging token");

        let mut tokens = self
            .token_service
            .issue_tokens(IssueRequest {
                subject,
                actor: if actor.is_anonymous() { None } else { Some(actor) },
                request: attributes,
                token_types: vec![token_type.clone()],
                scope: request.scope.clone(),
            })
            .await?;

        let token = tokens
            .remove(&token_type)
            .ok_or_else(|| Error::Internal("issued token set missing requested type".into()))?;

        let expires_in = token.expires_in();
        Ok(ExchangeResponse {
            access_token: token.value,
            issued_token_type: token_type,
            token_type: "Bearer".to_string(),
            expires_in,
            scope: request.scope,
        })
    }

    /// Decode and filter client-asserted request context.
    fn request_attributes(
        &self,
        actor: &AttestedIdentity,
        request: &ExchangeRequest,
    ) -> Result<RequestAttributes> {
        if request.request_context.is_empty() {
            return Ok(RequestAttributes::default());
        }

        let decoded = decode_base64(&request.request_context)
            .ok_or_else(|| Error::Decode("request_context is not valid base64".into()))?;
        let asserted: Claims = serde_json::from_slice(&decoded)
            .map_err(|e| Error::Decode(format!("request_context is not a JSON object: {e}")))?;

        let filter = self.claims_filters.filter_for(actor);
        let filtered = filter.apply(&asserted);
        if filtered.len() != asserted.len() {
            debug!(
                actor = %actor.subject,
                dropped = asserted.len() - filtered.len(),
                "claims filter dropped request context claims"
            );
        }

        Ok(project_request_attributes(filtered))
    }
}

/// Project a filtered claim map into the request-attributes shape.
///
/// Known scalar fields are lifted out; `headers` must be a string map;
/// every remaining claim lands in `additional`.
fn project_request_attributes(mut claims: Claims) -> RequestAttributes {
    let mut attributes = RequestAttributes::default();

    let take_string = |claims: &mut Claims, key: &str| -> String {
        match claims.remove(key) {
            Some(serde_json::Value::String(s)) => s,
            Some(other) => {
                // Non-string values for scalar fields fall through to
                // `additional` untouched.
                claims.insert(key.to_string(), other);
                String::new()
            }
            None => String::new(),
        }
    };

    attributes.method = take_string(&mut claims, "method");
    attributes.path = take_string(&mut claims, "path");
    attributes.ip_address = take_string(&mut claims, "ip_address");
    attributes.user_agent = take_string(&mut claims, "user_agent");

    if let Some(serde_json::Value::Object(headers)) = claims.remove("headers") {
        for (name, value) in headers {
            if let serde_json::Value::String(value) = value {
                attributes.headers.insert(name.to_ascii_lowercase(), value);
            }
        }
    }

    attributes.additional = claims;
    attributes
}

fn decode_base64(encoded: &str) -> Option<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .or_else(|_| URL_SAFE_NO_PAD.decode(encoded))
        .ok()
}

/// Routes for the exchange endpoint, mounted at `/v1/token`.
pub fn routes(endpoint: Arc<ExchangeEndpoint>) -> Router {
    Router::new()
        .route("/v1/token", post(handle_exchange))
        .with_state(endpoint)
}

async fn handle_exchange(
    State(endpoint): State<Arc<ExchangeEndpoint>>,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> Response {
    let request = match parse_body(&headers, &body) {
        Ok(request) => request,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid_request", &e.to_string());
        }
    };

    let metadata = lowercase_headers(&headers);
    match endpoint.exchange(&metadata, request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => exchange_error(&e),
    }
}

fn parse_body(headers: &HeaderMap, body: &[u8]) -> Result<ExchangeRequest> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json");

    if content_type.starts_with("application/x-www-form-urlencoded") {
        serde_urlencoded::from_bytes(body).map_err(|e| Error::Decode(format!("form body: {e}")))
    } else {
        serde_json::from_slice(body).map_err(|e| Error::Decode(format!("JSON body: {e}")))
    }
}

/// Flatten transport headers into the lowercased map credential
/// extraction expects.
fn lowercase_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

/// Map pipeline errors onto OAuth error responses.
fn exchange_error(error: &Error) -> Response {
    match error {
        Error::UnsupportedGrantType(_) => error_response(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            &format!("grant_type must be '{TOKEN_EXCHANGE_GRANT}'"),
        ),
        Error::Decode(message) => {
            error_response(StatusCode::BAD_REQUEST, "invalid_request", message)
        }
        Error::AudienceMismatch { .. } => error_response(
            StatusCode::BAD_REQUEST,
            "invalid_target",
            "requested audience does not match this service",
        ),
        Error::UnknownTokenType(token_type) => error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            &format!("unsupported requested_token_type '{token_type}'"),
        ),
        e if e.is_auth_failure() => {
            // Short message, no credential material.
            error_response(
                StatusCode::UNAUTHORIZED,
                "invalid_token",
                "credential validation failed",
            )
        }
        e => {
            warn!(error = %e, "token exchange failed internally");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "internal error",
            )
        }
    }
}

fn error_response(status: StatusCode, code: &str, description: &str) -> Response {
    (
        status,
        Json(json!({"error": code, "error_description": description})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::{ClaimsFilter, ClaimsFilterRegistry, ClaimsFilterRule};
    use crate::clock::FixedClock;
    use crate::credential::CredentialKind;
    use crate::datasource::DataSourceRegistry;
    use crate::issuer::jwt::{TxnTokenIssuerConfig, DEFAULT_TOKEN_TTL};
    use crate::issuer::{IssuerRegistry, StaticEd25519Signer, TxnTokenIssuer};
    use crate::trust::CelPolicy;
    use crate::validator::StaticValidator;
    use chrono::{TimeZone, Utc};

    fn subject_identity() -> AttestedIdentity {
        AttestedIdentity {
            subject: "alice".into(),
            issuer: "https://idp".into(),
            trust_domain: "t".into(),
            ..AttestedIdentity::default()
        }
    }

    fn endpoint_with(
        store: TrustStore,
        filters: ClaimsFilterRegistry,
    ) -> Arc<ExchangeEndpoint> {
        let clock = FixedClock::at(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap());
        let signer = Arc::new(StaticEd25519Signer::generate().unwrap());

        let mut issuers = IssuerRegistry::new();
        issuers
            .register(
                TXN_TOKEN_TYPE,
                Arc::new(TxnTokenIssuer::new(
                    TxnTokenIssuerConfig {
                        issuer_url: "https://tokens.example.com".into(),
                        ttl: DEFAULT_TOKEN_TTL,
                    },
                    Vec::new(),
                    Vec::new(),
                    signer,
                    clock,
                )),
            )
            .unwrap();

        let service = Arc::new(TokenService::new(
            "t",
            Arc::new(issuers),
            Arc::new(DataSourceRegistry::new()),
        ));

        Arc::new(ExchangeEndpoint::new(
            store,
            service,
            Arc::new(filters),
            String::new(),
        ))
    }

    fn bearer_store() -> TrustStore {
        TrustStore::builder()
            .validator(
                "static",
                Arc::new(StaticValidator::attesting(
                    vec![CredentialKind::Bearer],
                    subject_identity(),
                )),
            )
            .build()
            .unwrap()
    }

    fn exchange_request(audience: &str) -> ExchangeRequest {
        ExchangeRequest {
            grant_type: TOKEN_EXCHANGE_GRANT.into(),
            subject_token: "tok".into(),
            audience: audience.into(),
            ..ExchangeRequest::default()
        }
    }

    #[tokio::test]
    async fn plain_exchange_issues_a_transaction_token() {
        let endpoint = endpoint_with(bearer_store(), ClaimsFilterRegistry::default());
        let response = endpoint
            .exchange(&HashMap::new(), exchange_request("t"))
            .await
            .unwrap();

        assert!(!response.access_token.is_empty());
        assert_eq!(response.issued_token_type, TXN_TOKEN_TYPE);
        assert_eq!(response.token_type, "Bearer");
        assert!(response.expires_in > 0);
    }

    #[tokio::test]
    async fn wrong_grant_type_is_rejected() {
        let endpoint = endpoint_with(bearer_store(), ClaimsFilterRegistry::default());
        let err = endpoint
            .exchange(
                &HashMap::new(),
                ExchangeRequest {
                    grant_type: "authorization_code".into(),
                    subject_token: "tok".into(),
                    ..ExchangeRequest::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedGrantType(_)));
    }

    #[tokio::test]
    async fn audience_mismatch_is_rejected() {
        let endpoint = endpoint_with(bearer_store(), ClaimsFilterRegistry::default());
        let err = endpoint
            .exchange(&HashMap::new(), exchange_request("wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AudienceMismatch { .. }));
    }

    #[tokio::test]
    async fn empty_audience_skips_enforcement() {
        let endpoint = endpoint_with(bearer_store(), ClaimsFilterRegistry::default());
        assert!(
            endpoint
                .exchange(&HashMap::new(), exchange_request(""))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn policy_excluding_all_validators_fails_subject_validation() {
        let store = TrustStore::builder()
            .validator(
                "static",
                Arc::new(StaticValidator::attesting(
                    vec![CredentialKind::Bearer],
                    subject_identity(),
                )),
            )
            .policy(Arc::new(
                CelPolicy::compile(r#"actor.trust_domain == "prod""#).unwrap(),
            ))
            .build()
            .unwrap();

        let endpoint = endpoint_with(store, ClaimsFilterRegistry::default());
        // Anonymous actor: the policy admits nothing.
        let err = endpoint
            .exchange(&HashMap::new(), exchange_request("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoValidator(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn invalid_actor_credential_is_a_hard_error() {
        let store = TrustStore::builder()
            .validator(
                "rejecting",
                Arc::new(StaticValidator::rejecting(
                    vec![CredentialKind::Bearer],
                    "bad actor",
                )),
            )
            .build()
            .unwrap();
        let endpoint = endpoint_with(store, ClaimsFilterRegistry::default());

        let metadata =
            HashMap::from([("authorization".to_string(), "Bearer evil".to_string())]);
        let err = endpoint
            .exchange(&metadata, exchange_request("t"))
            .await
            .unwrap_err();
        assert!(err.is_auth_failure());
    }

    #[tokio::test]
    async fn garbage_request_context_is_a_decode_error() {
        let endpoint = endpoint_with(bearer_store(), ClaimsFilterRegistry::default());
        let err = endpoint
            .exchange(
                &HashMap::new(),
                ExchangeRequest {
                    request_context: "!!not-base64!!".into(),
                    ..exchange_request("t")
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[tokio::test]
    async fn request_context_claims_pass_through_the_actor_filter() {
        // Anonymous actors may only assert `env`.
        let filters = ClaimsFilterRegistry::new(
            vec![ClaimsFilterRule {
                subject: None,
                trust_domain: None,
                filter: ClaimsFilter::allow(["env"]),
            }],
            ClaimsFilter::Passthrough,
        );
        let endpoint = endpoint_with(bearer_store(), filters);

        let context = STANDARD.encode(r#"{"env":"prod","admin":true}"#);
        let request = ExchangeRequest {
            request_context: context,
            ..exchange_request("t")
        };
        let attributes = endpoint
            .request_attributes(&AttestedIdentity::anonymous(), &request)
            .unwrap();

        assert_eq!(attributes.additional.get("env"), Some(&json!("prod")));
        assert!(!attributes.additional.contains_key("admin"));
    }

    #[test]
    fn projection_lifts_known_fields_and_keeps_the_rest() {
        let mut claims = Claims::new();
        claims.insert("method".into(), json!("GET"));
        claims.insert("path".into(), json!("/orders"));
        claims.insert("headers".into(), json!({"X-Env": "prod"}));
        claims.insert("tenant".into(), json!("acme"));

        let attributes = project_request_attributes(claims);
        assert_eq!(attributes.method, "GET");
        assert_eq!(attributes.path, "/orders");
        assert_eq!(attributes.headers.get("x-env"), Some(&"prod".to_string()));
        assert_eq!(attributes.additional.get("tenant"), Some(&json!("acme")));
        assert!(!attributes.additional.contains_key("method"));
    }

    #[test]
    fn base64_decoding_accepts_standard_and_urlsafe() {
        assert!(decode_base64(&STANDARD.encode(b"{}")).is_some());
        assert!(decode_base64(&URL_SAFE_NO_PAD.encode(b"{}")).is_some());
        assert!(decode_base64("!!!").is_none());
    }
}
