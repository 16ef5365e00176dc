//! Credential management API endpoints.
//!
//! Credentials are BLE beacons identified by MAC address. Every mutation is
//! written to storage; if the write fails the change still applies for the
//! running process and the response reports `persisted: false`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use blekey_core::{CredentialSummary, SaveOutcome};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the credentials router with all endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route(
            "/",
            get(list_credentials)
                .post(add_credential)
                .delete(clear_credentials),
        )
        .route("/{address}", delete(remove_credential))
        .route("/{address}/enabled", put(set_credential_enabled))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// All registered credentials.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[schema(example = json!({
    "count": 1,
    "credentials": [{
        "name": "Front door fob",
        "mac_address": "AA:BB:CC:DD:EE:FF",
        "enabled": true,
        "require_confirmation": false,
        "last_seen_secs_ago": 42
    }]
}))]
pub struct CredentialListResponse {
    /// Number of registered credentials.
    #[schema(example = 1, minimum = 0)]
    pub count: usize,

    /// Credentials ordered by name, then address.
    pub credentials: Vec<CredentialSummary>,
}

/// Request body for registering a credential.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "name": "Front door fob",
    "mac_address": "AA:BB:CC:DD:EE:FF",
    "require_confirmation": false
}))]
pub struct AddCredentialRequest {
    /// Human-readable label.
    #[schema(example = "Front door fob", min_length = 1, max_length = 64)]
    pub name: String,

    /// Beacon address, colon- or hyphen-separated.
    #[schema(example = "AA:BB:CC:DD:EE:FF")]
    pub mac_address: String,

    /// Hold detections until a confirmation signal arrives.
    #[serde(default)]
    #[schema(example = false)]
    pub require_confirmation: bool,
}

/// Request body for enabling or disabling a credential.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({ "enabled": false }))]
pub struct SetEnabledRequest {
    /// New state.
    #[schema(example = false)]
    pub enabled: bool,
}

/// Result of a credential mutation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "success": true,
    "persisted": true,
    "persistence_error": null
}))]
pub struct MutationResponse {
    /// The in-memory change was applied.
    #[schema(example = true)]
    pub success: bool,

    /// The change reached storage.
    #[schema(example = true)]
    pub persisted: bool,

    /// Why storage could not be updated.
    #[schema(nullable)]
    pub persistence_error: Option<String>,
}

impl From<SaveOutcome> for MutationResponse {
    fn from(outcome: SaveOutcome) -> Self {
        match outcome {
            SaveOutcome::Saved => Self {
                success: true,
                persisted: true,
                persistence_error: None,
            },
            SaveOutcome::Failed { reason } => Self {
                success: true,
                persisted: false,
                persistence_error: Some(reason),
            },
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// List registered credentials.
#[utoipa::path(
    get,
    path = "/api/credentials",
    tag = "credentials",
    operation_id = "listCredentials",
    summary = "List registered credentials",
    description = "Returns every registered credential with its enabled state and \
        how long ago it was last detected.",
    responses(
        (status = 200, description = "Credential list", body = CredentialListResponse),
        (status = 503, description = "Credential manager not running", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn list_credentials(
    State(state): State<SharedState>,
) -> ApiResult<Json<CredentialListResponse>> {
    let credentials = state.manager.credentials().await?;

    Ok(Json(CredentialListResponse {
        count: credentials.len(),
        credentials,
    }))
}

/// Register a credential.
#[utoipa::path(
    post,
    path = "/api/credentials",
    tag = "credentials",
    operation_id = "addCredential",
    summary = "Register a credential",
    description = "Adds a beacon to the allow-list. New credentials are enabled. \
        Matching is by exact MAC address only, so a device spoofing the address \
        is indistinguishable from the real beacon.",
    request_body = AddCredentialRequest,
    responses(
        (status = 201, description = "Credential registered", body = MutationResponse),
        (status = 400, description = "Invalid name or address", body = crate::api::error::ErrorResponse),
        (status = 409, description = "Address already registered", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn add_credential(
    State(state): State<SharedState>,
    Json(request): Json<AddCredentialRequest>,
) -> ApiResult<(StatusCode, Json<MutationResponse>)> {
    let outcome = state
        .manager
        .add_credential(request.name, request.mac_address, request.require_confirmation)
        .await?;

    Ok((StatusCode::CREATED, Json(outcome.into())))
}

/// Remove every credential.
#[utoipa::path(
    delete,
    path = "/api/credentials",
    tag = "credentials",
    operation_id = "clearCredentials",
    summary = "Remove all credentials",
    responses(
        (status = 200, description = "All credentials removed", body = MutationResponse)
    )
)]
pub async fn clear_credentials(
    State(state): State<SharedState>,
) -> ApiResult<Json<MutationResponse>> {
    let outcome = state.manager.clear_credentials().await?;
    Ok(Json(outcome.into()))
}

/// Remove one credential.
#[utoipa::path(
    delete,
    path = "/api/credentials/{address}",
    tag = "credentials",
    operation_id = "removeCredential",
    summary = "Remove a credential",
    params(
        ("address" = String, Path, description = "Credential MAC address", example = "AA:BB:CC:DD:EE:FF")
    ),
    responses(
        (status = 200, description = "Credential removed", body = MutationResponse),
        (status = 400, description = "Malformed address", body = crate::api::error::ErrorResponse),
        (status = 404, description = "Address not registered", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn remove_credential(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> ApiResult<Json<MutationResponse>> {
    let outcome = state.manager.remove_credential(address).await?;
    Ok(Json(outcome.into()))
}

/// Enable or disable a credential.
#[utoipa::path(
    put,
    path = "/api/credentials/{address}/enabled",
    tag = "credentials",
    operation_id = "setCredentialEnabled",
    summary = "Enable or disable a credential",
    description = "Disabled credentials stay registered but never produce detections. \
        Setting the current state again succeeds without writing to storage.",
    params(
        ("address" = String, Path, description = "Credential MAC address", example = "AA:BB:CC:DD:EE:FF")
    ),
    request_body = SetEnabledRequest,
    responses(
        (status = 200, description = "State updated", body = MutationResponse),
        (status = 404, description = "Address not registered", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn set_credential_enabled(
    State(state): State<SharedState>,
    Path(address): Path<String>,
    Json(request): Json<SetEnabledRequest>,
) -> ApiResult<Json<MutationResponse>> {
    let outcome = state
        .manager
        .set_credential_enabled(address, request.enabled)
        .await?;
    Ok(Json(outcome.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_request_defaults_confirmation_off() {
        let json = r#"{"name": "Badge", "mac_address": "AA:BB:CC:DD:EE:FF"}"#;
        let request: AddCredentialRequest = serde_json::from_str(json).unwrap();
        assert!(!request.require_confirmation);
    }

    #[test]
    fn test_failed_save_is_reported() {
        let response = MutationResponse::from(SaveOutcome::Failed {
            reason: "disk full".to_string(),
        });
        assert!(response.success);
        assert!(!response.persisted);
        assert_eq!(response.persistence_error.as_deref(), Some("disk full"));
    }
}
