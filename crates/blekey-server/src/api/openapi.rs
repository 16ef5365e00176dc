//! OpenAPI specification generation for the blekey API.
//!
//! Served at `/api/openapi.json` and written to disk by the `gen-openapi`
//! binary for client generation.

use axum::Json;
use blekey_core::{CredentialSummary, DetectionEvent, ManagerStatus, ScanMode};
use utoipa::OpenApi;

use super::credentials::{
    AddCredentialRequest, CredentialListResponse, MutationResponse, SetEnabledRequest,
};
use super::detections::{ConfirmRequest, LastDetectionResponse};
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::scan::{BurstRequest, BurstResponse, ScanStatusResponse};

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as a pretty-printed string.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for blekey.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "blekey API",
        version = "0.1.0",
        description = r#"
# blekey API

blekey keeps an allow-list of BLE beacons (key fobs, badges, phones in beacon
mode) and reports when one of them is seen nearby.

## Overview

1. **Credentials**: Register beacons by MAC address, enable or disable them
2. **Scanning**: The radio scans periodically; request a burst to scan continuously for a while
3. **Detections**: Each registered beacon is reported at most once per scan session.
   Credentials that require confirmation are held until `/api/confirm` is called.

## Security

Matching is by MAC address only. Addresses are broadcast in clear and can be
spoofed, so a detection proves that *something* advertised the address, not
that the registered beacon is present.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local blekey server")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "credentials", description = "Credential allow-list management"),
        (name = "scan", description = "Scan schedule status and bursts"),
        (name = "detections", description = "Detection results and confirmation")
    ),
    paths(
        super::health::health_check,
        super::credentials::list_credentials,
        super::credentials::add_credential,
        super::credentials::clear_credentials,
        super::credentials::remove_credential,
        super::credentials::set_credential_enabled,
        super::scan::get_scan_status,
        super::scan::start_burst,
        super::detections::get_last_detection,
        super::detections::confirm_detection,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            CredentialSummary,
            CredentialListResponse,
            AddCredentialRequest,
            SetEnabledRequest,
            MutationResponse,
            ManagerStatus,
            ScanMode,
            ScanStatusResponse,
            BurstRequest,
            BurstResponse,
            DetectionEvent,
            LastDetectionResponse,
            ConfirmRequest,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "blekey API");
        assert!(spec.paths.paths.contains_key("/api/credentials"));
        assert!(spec.paths.paths.contains_key("/api/scan/burst"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"blekey API\""));
    }
}
