//! Detection endpoints: the last reported detection and the confirmation
//! signal for credentials that require one.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use blekey_core::DetectionEvent;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the detections router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/last", get(get_last_detection))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// The most recent detection, if any.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[schema(example = json!({
    "detection": {
        "address": "AA:BB:CC:DD:EE:FF",
        "name": "Front door fob",
        "session": 12,
        "confirmed": false,
        "detected_at_utc": "2025-01-15T03:30:00Z"
    }
}))]
pub struct LastDetectionResponse {
    /// Absent until the first detection.
    #[schema(nullable)]
    pub detection: Option<DetectionEvent>,
}

/// Request body for the confirmation signal.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({ "mac_address": "AA:BB:CC:DD:EE:FF" }))]
pub struct ConfirmRequest {
    /// Address of the credential awaiting confirmation.
    #[schema(example = "AA:BB:CC:DD:EE:FF")]
    pub mac_address: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the last detection.
#[utoipa::path(
    get,
    path = "/api/detections/last",
    tag = "detections",
    operation_id = "getLastDetection",
    summary = "Get the most recent detection",
    responses(
        (status = 200, description = "Last detection", body = LastDetectionResponse)
    )
)]
pub async fn get_last_detection(
    State(state): State<SharedState>,
) -> ApiResult<Json<LastDetectionResponse>> {
    let detection = state.manager.last_detection().await?;
    Ok(Json(LastDetectionResponse { detection }))
}

/// Confirm a pending detection.
#[utoipa::path(
    post,
    path = "/api/confirm",
    tag = "detections",
    operation_id = "confirmDetection",
    summary = "Deliver the confirmation signal",
    description = "Releases a sighting of a credential that requires confirmation. \
        Must arrive within the confirmation window after the beacon was seen.",
    request_body = ConfirmRequest,
    responses(
        (status = 200, description = "Detection reported", body = DetectionEvent),
        (status = 404, description = "Nothing awaiting confirmation for this address", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn confirm_detection(
    State(state): State<SharedState>,
    Json(request): Json<ConfirmRequest>,
) -> ApiResult<Json<DetectionEvent>> {
    let event = state.manager.confirm_detection(request.mac_address).await?;
    Ok(Json(event))
}
