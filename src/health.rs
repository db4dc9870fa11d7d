//! Liveness and readiness.
//!
//! Liveness is unconditional — a process that answers is alive.
//! Readiness aggregates named per-service states: every registered
//! service must be `SERVING`, and a 503 names the first one that is
//! not. Services transition to `SERVING` explicitly after startup and
//! back to `NOT_SERVING` on shutdown.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use dashmap::DashMap;

/// Health state of one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServingStatus {
    /// The service is ready for traffic.
    Serving,
    /// The service is not (yet, or anymore) ready.
    NotServing,
}

/// Named per-service health states.
#[derive(Debug, Default)]
pub struct HealthRegistry {
    services: DashMap<String, ServingStatus>,
}

impl HealthRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, starting as `NOT_SERVING`.
    pub fn register(&self, name: impl Into<String>) {
        self.services
            .insert(name.into(), ServingStatus::NotServing);
    }

    /// Set the state of one service.
    pub fn set(&self, name: &str, status: ServingStatus) {
        if let Some(mut entry) = self.services.get_mut(name) {
            *entry = status;
        }
    }

    /// Set every service to `status` (startup / shutdown transitions).
    pub fn set_all(&self, status: ServingStatus) {
        for mut entry in self.services.iter_mut() {
            *entry = status;
        }
    }

    /// `Ok` when every service serves; otherwise the name of the first
    /// one that does not.
    pub fn ready(&self) -> Result<(), String> {
        for entry in self.services.iter() {
            if *entry.value() != ServingStatus::Serving {
                return Err(entry.key().clone());
            }
        }
        Ok(())
    }
}

/// `/livez` and `/readyz` routes.
pub fn routes(registry: Arc<HealthRegistry>) -> Router {
    Router::new()
        .route("/livez", get(liveness))
        .route("/readyz", get(readiness))
        .with_state(registry)
}

async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readiness(State(registry): State<Arc<HealthRegistry>>) -> impl IntoResponse {
    match registry.ready() {
        Ok(()) => (StatusCode::OK, "ok".to_string()),
        Err(service) => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("not serving: {service}"),
        ),
    }
}
