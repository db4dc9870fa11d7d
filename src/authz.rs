//! Per-request authorization check endpoint.
//!
//! An ext_authz-style gateway hook: the edge proxy sends each request's
//! HTTP-level view here, and instead of a plain allow/deny the service
//! issues the configured tokens *into response headers*. The proxy adds
//! those headers to the upstream request and removes the headers the
//! subject credential came from — external credentials must never reach
//! backends.
//!
//! Denials are normal responses carrying a status code and a short
//! message, never credential material.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::credential::{AttestedIdentity, Claims, RequestAttributes};
use crate::extract;
use crate::service::{IssueRequest, TokenService};
use crate::trust::TrustStore;

/// One request as seen by the edge proxy.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CheckRequest {
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Host header.
    pub host: String,
    /// Request headers; matched case-insensitively.
    pub headers: HashMap<String, String>,
    /// Client source address.
    pub source_address: String,
    /// Deployment-specific context from the proxy configuration.
    pub context_extensions: Claims,
}

/// A header the proxy should set on the upstream request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEntry {
    /// Header name.
    pub name: String,
    /// Header value.
    pub value: String,
}

/// Outcome of a check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckResponse {
    /// Allow the request, with header edits for the upstream.
    Ok {
        /// Headers to add, one per issued token.
        headers_to_add: Vec<HeaderEntry>,
        /// Headers to strip — the consumed credential headers.
        headers_to_remove: Vec<String>,
    },
    /// Deny the request.
    Denied {
        /// Status code the proxy should return.
        code: u16,
        /// Short human-readable reason.
        message: String,
    },
}

impl CheckResponse {
    fn denied(code: u16, message: impl Into<String>) -> Self {
        Self::Denied {
            code,
            message: message.into(),
        }
    }
}

/// `(token type, header name)` issuance pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenHeader {
    /// Token type to mint.
    pub token_type: String,
    /// Header the token value is written into.
    pub header: String,
}

/// The authz-check endpoint's wiring.
pub struct AuthzEndpoint {
    trust_store: TrustStore,
    token_service: Arc<TokenService>,
    token_headers: Vec<TokenHeader>,
}

impl AuthzEndpoint {
    /// Build the endpoint.
    #[must_use]
    pub fn new(
        trust_store: TrustStore,
        token_service: Arc<TokenService>,
        token_headers: Vec<TokenHeader>,
    ) -> Self {
        Self {
            trust_store,
            token_service,
            token_headers,
        }
    }

    /// Run one check. Never errors — failures become denials.
    pub async fn check(&self, request: CheckRequest) -> CheckResponse {
        let mut attributes =
            RequestAttributes::new(request.method, request.path, request.headers);
        attributes.ip_address = request.source_address;
        if !request.context_extensions.is_empty() {
            attributes.additional.insert(
                "context_extensions".into(),
                serde_json::Value::Object(request.context_extensions),
            );
        }

        let actor = match extract::actor_credential(&attributes.headers) {
            Some(credential) => match self.trust_store.validate(&credential).await {
                Ok(actor) => actor,
                Err(e) => {
                    debug!(error = %e, "actor validation failed");
                    return CheckResponse::denied(401, "unauthenticated");
                }
            },
            None => AttestedIdentity::anonymous(),
        };

        let filtered_store = match self.trust_store.for_actor(&actor, &attributes) {
            Ok(store) => store,
            Err(e) => {
                warn!(error = %e, "validator policy evaluation failed");
                return CheckResponse::denied(403, "forbidden");
            }
        };

        let Some((subject_credential, consumed_headers)) =
            extract::subject_credential(&attributes.headers)
        else {
            return CheckResponse::denied(401, "missing credentials");
        };

        let subject = match filtered_store.validate(&subject_credential).await {
            Ok(subject) => subject,
            Err(e) => {
                debug!(error = %e, "subject validation failed");
                return CheckResponse::denied(401, "invalid credentials");
            }
        };

        let token_types: Vec<String> = self
            .token_headers
            .iter()
            .map(|pair| pair.token_type.clone())
            .collect();

        let tokens = match self
            .token_service
            .issue_tokens(IssueRequest {
                subject,
                actor: if actor.is_anonymous() { None } else { Some(actor) },
                request: attributes,
                token_types,
                scope: String::new(),
            })
            .await
        {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "token issuance failed during check");
                return CheckResponse::denied(500, "token issuance failed");
            }
        };

        let mut headers_to_add = Vec::with_capacity(self.token_headers.len());
        for pair in &self.token_headers {
            let Some(token) = tokens.get(&pair.token_type) else {
                warn!(token_type = %pair.token_type, "issued token set missing configured type");
                return CheckResponse::denied(500, "token issuance failed");
            };
            headers_to_add.push(HeaderEntry {
                name: pair.header.clone(),
                value: token.value.clone(),
            });
        }

        CheckResponse::Ok {
            headers_to_add,
            headers_to_remove: consumed_headers,
        }
    }
}

/// Routes for the check endpoint, mounted at `/v1/check`.
pub fn routes(endpoint: Arc<AuthzEndpoint>) -> Router {
    Router::new()
        .route("/v1/check", post(handle_check))
        .with_state(endpoint)
}

async fn handle_check(
    State(endpoint): State<Arc<AuthzEndpoint>>,
    Json(request): Json<CheckRequest>,
) -> impl IntoResponse {
    // Denials are part of the protocol, not transport errors.
    Json(endpoint.check(request).await)
}
