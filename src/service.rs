//! The issuance orchestrator.
//!
//! [`TokenService::issue_tokens`] builds one [`IssueContext`] per
//! request — audience pinned to the service trust domain — and
//! dispatches each requested token type to its issuer, in list order.
//! Any failure aborts the whole request; tokens minted earlier in the
//! list are discarded, never returned.

use std::collections::HashMap;
use std::sync::Arc;

use crate::Result;
use crate::credential::{AttestedIdentity, RequestAttributes};
use crate::datasource::DataSourceRegistry;
use crate::issuer::{IssueContext, IssuerRegistry, Token};
use crate::observe::{IssuanceObserver, NoopObserver};

/// One issuance request.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    /// The validated subject.
    pub subject: AttestedIdentity,
    /// The validated actor, when one was presented.
    pub actor: Option<AttestedIdentity>,
    /// Request attributes.
    pub request: RequestAttributes,
    /// Token types to mint, in order.
    pub token_types: Vec<String>,
    /// Scope to carry into the tokens.
    pub scope: String,
}

/// Issues sets of tokens for validated requests.
pub struct TokenService {
    trust_domain: String,
    issuers: Arc<IssuerRegistry>,
    data_sources: Arc<DataSourceRegistry>,
    observer: Arc<dyn IssuanceObserver>,
}

impl TokenService {
    /// Build the service; the observer defaults to a no-op.
    #[must_use]
    pub fn new(
        trust_domain: impl Into<String>,
        issuers: Arc<IssuerRegistry>,
        data_sources: Arc<DataSourceRegistry>,
    ) -> Self {
        Self {
            trust_domain: trust_domain.into(),
            issuers,
            data_sources,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Replace the no-op observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn IssuanceObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The trust domain stamped into every issued token's audience.
    #[must_use]
    pub fn trust_domain(&self) -> &str {
        &self.trust_domain
    }

    /// Mint one token per requested type.
    ///
    /// # Errors
    ///
    /// `Error::UnknownTokenType` for unregistered types; issuer errors
    /// propagate as-is. On any failure, no tokens are returned.
    pub async fn issue_tokens(&self, request: IssueRequest) -> Result<HashMap<String, Token>> {
        let mut probe = self.observer.begin(&request);

        let context = IssueContext {
            subject: request.subject,
            actor: request.actor,
            request: request.request,
            audience: self.trust_domain.clone(),
            scope: request.scope,
            data_sources: Arc::clone(&self.data_sources),
        };

        let mut tokens = HashMap::new();
        for token_type in &request.token_types {
            probe.token_started(token_type);

            let issuer = match self.issuers.get(token_type) {
                Ok(issuer) => issuer,
                Err(e) => {
                    probe.issuer_not_found(token_type);
                    probe.finished();
                    return Err(e);
                }
            };

            match issuer.issue(&context).await {
                Ok(token) => {
                    probe.token_issued(token_type, &token);
                    tokens.insert(token_type.clone(), token);
                }
                Err(e) => {
                    probe.token_failed(token_type, &e);
                    probe.finished();
                    return Err(e);
                }
            }
        }

        probe.finished();
        Ok(tokens)
    }
}
