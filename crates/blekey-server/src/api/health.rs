//! Health check API endpoint.
//!
//! Reports whether the credential manager task is alive.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use blekey_core::ScanMode;
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::SharedState;

/// Health check response.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[schema(example = json!({
    "status": "ok",
    "version": "0.1.0",
    "manager_running": true,
    "radio_backend": "bluez",
    "scan_mode": "periodic",
    "credential_count": 3,
    "uptime_secs": 3600
}))]
pub struct HealthResponse {
    /// `ok` when the manager task answers, `degraded` otherwise.
    pub status: String,

    /// Crate version.
    pub version: String,

    /// Whether the manager task answered a status query.
    pub manager_running: bool,

    /// `bluez` or `simulated`.
    pub radio_backend: String,

    /// Current scan mode; absent when the manager is down.
    #[schema(nullable)]
    pub scan_mode: Option<ScanMode>,

    /// Registered credentials; absent when the manager is down.
    #[schema(nullable)]
    pub credential_count: Option<usize>,

    /// Seconds since the server started.
    pub uptime_secs: i64,
}

/// Creates the health router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(health_check))
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    operation_id = "healthCheck",
    summary = "Check service health",
    description = "Queries the credential manager task and reports whether it responds.",
    responses(
        (status = 200, description = "Service status", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    let status = state.manager.status().await.ok();
    let manager_running = status.is_some();

    Json(HealthResponse {
        status: if manager_running { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        manager_running,
        radio_backend: state.radio_backend.to_string(),
        scan_mode: status.as_ref().map(|s| s.scan_mode),
        credential_count: status.as_ref().map(|s| s.credential_count),
        uptime_secs: (chrono::Utc::now() - state.started_at).num_seconds(),
    })
}
