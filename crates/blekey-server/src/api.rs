//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `credentials` - Credential allow-list management
//! - `scan` - Scan status and bursts
//! - `detections` - Last detection and confirmation signal
//! - `health` - Service health checks
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub mod credentials;
pub mod detections;
pub mod error;
pub mod health;
pub mod openapi;
pub mod scan;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                         - Health check
/// /api
/// ├── /credentials                - List, add, clear
/// │   ├── /{address}              - Remove
/// │   └── /{address}/enabled      - Enable/disable
/// ├── /scan                       - Scan status
/// │   └── /burst                  - Start a burst
/// ├── /detections/last            - Last detection
/// ├── /confirm                    - Confirmation signal
/// └── /openapi.json               - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .nest("/credentials", credentials::router())
                .nest("/scan", scan::router())
                .nest("/detections", detections::router())
                .route("/confirm", post(detections::confirm_detection))
                .route("/openapi.json", get(openapi::get_openapi_spec)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
