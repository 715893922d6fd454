//! Health check handlers

use axum::{extract::State, Json};
use lexplain_common::store::DocumentStore;
use serde::Serialize;
use std::sync::Arc;
use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub mode: &'static str,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<CheckResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<CheckResult>,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Root liveness text
pub async fn root() -> &'static str {
    "Backend is running!"
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

async fn check(store: &Arc<dyn DocumentStore>) -> CheckResult {
    let start = std::time::Instant::now();

    match store.ping().await {
        Ok(()) => CheckResult {
            status: "up".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => {
            tracing::warn!(store = store.name(), error = ?e, "Readiness check failed");
            CheckResult {
                status: "down".to_string(),
                latency_ms: None,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Readiness probe - pings every configured store
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    let primary = match state.stores.primary() {
        Some(store) => Some(check(store).await),
        None => None,
    };
    let secondary = match state.stores.secondary() {
        Some(store) => Some(check(store).await),
        None => None,
    };

    let all_healthy = [&primary, &secondary]
        .into_iter()
        .flatten()
        .all(|c| c.status == "up");

    Json(ReadyResponse {
        status: if all_healthy { "ready" } else { "not_ready" }.to_string(),
        mode: state.stores.mode().as_str(),
        checks: HealthChecks { primary, secondary },
    })
}
