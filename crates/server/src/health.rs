use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use leadline_core::config::{AppConfig, DeliveryMode, IntegrationStatus};

/// Snapshot of configuration taken at startup. The health check never
/// touches the database, the outbox or a provider.
#[derive(Clone)]
pub struct HealthState {
    integrations: Arc<Vec<IntegrationStatus>>,
    delivery_mode: DeliveryMode,
}

impl HealthState {
    pub fn from_config(config: &AppConfig) -> Self {
        Self { integrations: Arc::new(config.integrations()), delivery_mode: config.delivery.mode }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub delivery_mode: &'static str,
    pub checks: BTreeMap<&'static str, &'static str>,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

/// Always 200; a missing integration only degrades the aggregate status.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let checks: BTreeMap<&'static str, &'static str> = state
        .integrations
        .iter()
        .map(|status| (status.name, if status.configured { "configured" } else { "missing" }))
        .collect();
    let healthy = state.integrations.iter().all(|status| status.configured);

    let payload = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" },
        service: "leadline",
        delivery_mode: state.delivery_mode.as_str(),
        checks,
        checked_at: Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(payload))
}
