//! Issuance observability.
//!
//! The token service reports its lifecycle through an
//! [`IssuanceObserver`], which hands out one [`IssuanceProbe`] per
//! request. The core never touches a concrete telemetry stack:
//! [`NoopObserver`] is the default, [`TracingObserver`] emits
//! structured `token.*` events, and [`CompositeObserver`] fans out to
//! several observers at once.

use std::sync::Arc;

use serde::Serialize;

use crate::Error;
use crate::issuer::Token;
use crate::service::IssueRequest;

/// Hands out per-request probes.
pub trait IssuanceObserver: Send + Sync {
    /// Start observing one issuance request.
    fn begin(&self, request: &IssueRequest) -> Box<dyn IssuanceProbe>;
}

/// Per-request lifecycle events, in call order:
/// `token_started` / `token_issued` / `token_failed` /
/// `issuer_not_found` per requested type, then `finished` exactly once.
pub trait IssuanceProbe: Send {
    /// Issuance of one token type began.
    fn token_started(&mut self, token_type: &str);
    /// A token was minted.
    fn token_issued(&mut self, token_type: &str, token: &Token);
    /// Issuance of one token type failed.
    fn token_failed(&mut self, token_type: &str, error: &Error);
    /// No issuer is registered for the requested type.
    fn issuer_not_found(&mut self, token_type: &str);
    /// The request is done, successfully or not.
    fn finished(&mut self);
}

/// Observer that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl IssuanceObserver for NoopObserver {
    fn begin(&self, _request: &IssueRequest) -> Box<dyn IssuanceProbe> {
        Box::new(NoopProbe)
    }
}

struct NoopProbe;

impl IssuanceProbe for NoopProbe {
    fn token_started(&mut self, _token_type: &str) {}
    fn token_issued(&mut self, _token_type: &str, _token: &Token) {}
    fn token_failed(&mut self, _token_type: &str, _error: &Error) {}
    fn issuer_not_found(&mut self, _token_type: &str) {}
    fn finished(&mut self) {}
}

/// Structured audit event emitted by [`TracingObserver`].
#[derive(Debug, Serialize)]
struct IssuanceEvent<'a> {
    event: &'static str,
    subject: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    actor: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

fn emit(event: &IssuanceEvent<'_>) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "issuance audit"),
        Err(ref e) => tracing::warn!(error = %e, "failed to serialize issuance event"),
    }
}

/// Observer emitting `tracing` events with an `audit` JSON field.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl IssuanceObserver for TracingObserver {
    fn begin(&self, request: &IssueRequest) -> Box<dyn IssuanceProbe> {
        let subject = request.subject.subject.clone();
        let actor = request.actor.as_ref().map(|a| a.subject.clone());
        emit(&IssuanceEvent {
            event: "token.issuance_started",
            subject: &subject,
            actor: actor.as_deref(),
            token_type: None,
            expires_at: None,
            reason: None,
        });
        Box::new(TracingProbe { subject, actor })
    }
}

struct TracingProbe {
    subject: String,
    actor: Option<String>,
}

impl TracingProbe {
    fn event<'a>(&'a self, event: &'static str, token_type: Option<&'a str>) -> IssuanceEvent<'a> {
        IssuanceEvent {
            event,
            subject: &self.subject,
            actor: self.actor.as_deref(),
            token_type,
            expires_at: None,
            reason: None,
        }
    }
}

impl IssuanceProbe for TracingProbe {
    fn token_started(&mut self, token_type: &str) {
        emit(&self.event("token.started", Some(token_type)));
    }

    fn token_issued(&mut self, token_type: &str, token: &Token) {
        let mut event = self.event("token.issued", Some(token_type));
        event.expires_at = Some(token.expires_at.to_rfc3339());
        emit(&event);
    }

    fn token_failed(&mut self, token_type: &str, error: &Error) {
        let mut event = self.event("token.failed", Some(token_type));
        event.reason = Some(error.to_string());
        emit(&event);
    }

    fn issuer_not_found(&mut self, token_type: &str) {
        emit(&self.event("token.issuer_not_found", Some(token_type)));
    }

    fn finished(&mut self) {
        emit(&self.event("token.issuance_finished", None));
    }
}

/// Fan-out to several observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn IssuanceObserver>>,
}

impl CompositeObserver {
    /// Compose `observers`; each receives every event.
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn IssuanceObserver>>) -> Self {
        Self { observers }
    }
}

impl IssuanceObserver for CompositeObserver {
    fn begin(&self, request: &IssueRequest) -> Box<dyn IssuanceProbe> {
        Box::new(CompositeProbe {
            probes: self.observers.iter().map(|o| o.begin(request)).collect(),
        })
    }
}

struct CompositeProbe {
    probes: Vec<Box<dyn IssuanceProbe>>,
}

impl IssuanceProbe for CompositeProbe {
    fn token_started(&mut self, token_type: &str) {
        for probe in &mut self.probes {
            probe.token_started(token_type);
        }
    }

    fn token_issued(&mut self, token_type: &str, token: &Token) {
        for probe in &mut self.probes {
            probe.token_issued(token_type, token);
        }
    }

    fn token_failed(&mut self, token_type: &str, error: &Error) {
        for probe in &mut self.probes {
            probe.token_failed(token_type, error);
        }
    }

    fn issuer_not_found(&mut self, token_type: &str) {
        for probe in &mut self.probes {
            probe.issuer_not_found(token_type);
        }
    }

    fn finished(&mut self) {
        for probe in &mut self.probes {
            probe.finished();
        }
    }
}
