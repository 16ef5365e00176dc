//! Scan status and burst endpoints.

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use blekey_core::{burst_duration_from_millis, ManagerStatus, ScanMode};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the scan router with all endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_scan_status))
        .route("/burst", post(start_burst))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Scan controller and detection telemetry.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ScanStatusResponse {
    /// Manager snapshot.
    #[serde(flatten)]
    pub status: ManagerStatus,

    /// Radio events dropped because the queue was full.
    #[schema(example = 0)]
    pub dropped_radio_events: u64,

    /// Radio backend in use.
    #[schema(example = "bluez")]
    pub radio_backend: String,
}

/// Request body for starting a burst.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[schema(example = json!({ "duration_ms": 30000 }))]
pub struct BurstRequest {
    /// Burst length in milliseconds. Omit to use the configured default.
    #[schema(example = 30000, minimum = 0)]
    pub duration_ms: Option<i64>,
}

/// Response after starting a burst.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[schema(example = json!({ "scan_mode": "burst", "burst_remaining_ms": 30000 }))]
pub struct BurstResponse {
    /// Scan mode after the request. `idle` if the radio rejected it.
    pub scan_mode: ScanMode,

    /// Milliseconds left in the burst.
    #[schema(example = 30000)]
    pub burst_remaining_ms: Option<u64>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get scan status.
#[utoipa::path(
    get,
    path = "/api/scan",
    tag = "scan",
    operation_id = "getScanStatus",
    summary = "Get scan and detection status",
    description = "Returns the scan mode (idle, periodic or burst), timers, \
        counters and the name of the last detected credential.",
    responses(
        (status = 200, description = "Current status", body = ScanStatusResponse)
    )
)]
pub async fn get_scan_status(
    State(state): State<SharedState>,
) -> ApiResult<Json<ScanStatusResponse>> {
    let status = state.manager.status().await?;

    Ok(Json(ScanStatusResponse {
        status,
        dropped_radio_events: state.radio_events.dropped(),
        radio_backend: state.radio_backend.to_string(),
    }))
}

/// Start a scan burst.
#[utoipa::path(
    post,
    path = "/api/scan/burst",
    tag = "scan",
    operation_id = "startScanBurst",
    summary = "Scan continuously for a while",
    description = "Overrides the periodic schedule and scans for the given duration. \
        A new burst replaces a running one. The periodic schedule resumes afterwards.",
    request_body = BurstRequest,
    responses(
        (status = 202, description = "Burst requested", body = BurstResponse),
        (status = 400, description = "Invalid duration", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn start_burst(
    State(state): State<SharedState>,
    body: Option<Json<BurstRequest>>,
) -> ApiResult<(StatusCode, Json<BurstResponse>)> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let duration: Option<Duration> = request
        .duration_ms
        .map(burst_duration_from_millis)
        .transpose()?;

    state.manager.start_scan_burst(duration).await?;
    let status = state.manager.status().await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(BurstResponse {
            scan_mode: status.scan_mode,
            burst_remaining_ms: status.burst_remaining_ms,
        }),
    ))
}
