//! Transaction-token exchange service.
//!
//! An in-cluster authority between the edge proxy and downstream
//! services: it converts externally-presented credentials (a subject
//! identity, optionally a calling-workload actor identity) into
//! short-lived, audience-scoped, context-bearing tokens, following
//! RFC 8693 and the IETF transaction-tokens draft.
//!
//! # Pipeline
//!
//! Both entry points — the RFC 8693 exchange and the per-request
//! authz check — run the same phases:
//!
//! 1. validate the actor credential ([`trust::TrustStore`]),
//! 2. build request attributes,
//! 3. derive the policy-filtered validator view
//!    ([`trust::TrustStore::for_actor`]),
//! 4. validate the subject credential through that view,
//! 5. issue tokens ([`service::TokenService`]), each issuer running
//!    its mapper chain ([`mapper`]) over shared state and on-demand
//!    [`datasource`] fetches.
//!
//! Verification keys are published as JWKS ([`jwks`]).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod authz;
pub mod claims;
pub mod cli;
pub mod clock;
pub mod config;
pub mod credential;
pub mod datasource;
pub mod error;
pub mod exchange;
pub mod extract;
pub mod health;
pub mod issuer;
pub mod jwks;
pub mod mapper;
pub mod observe;
pub mod server;
pub mod service;
pub mod trust;
pub mod validator;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
