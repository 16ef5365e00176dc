//! Unified error types for the blekey core library.
//!
//! [`KeyManagerError`] covers every failure an action-surface caller can observe.
//! Modules keep their own narrower error types ([`PersistenceError`],
//! [`RadioError`], [`ConfigError`]) and convert into it via `From`.
//!
//! None of these errors is fatal. Validation failures are returned before any
//! state changes; persistence and radio failures degrade gracefully (the store
//! stays authoritative in memory, the scan controller drops back to idle).
//!
//! [`PersistenceError`]: crate::persistence::PersistenceError
//! [`RadioError`]: crate::radio::RadioError
//! [`ConfigError`]: crate::config::ConfigError
//!
//! # Example
//!
//! ```rust
//! use blekey_core::error::{KeyManagerError, Result};
//!
//! fn require_name(name: &str) -> Result<()> {
//!     if name.trim().is_empty() {
//!         return Err(KeyManagerError::InvalidArgument("name must not be empty".into()));
//!     }
//!     Ok(())
//! }
//!
//! assert!(require_name("").is_err());
//! ```

use thiserror::Error;

use crate::address::MacAddress;

/// The unified error type for all credential manager operations.
#[derive(Debug, Error)]
pub enum KeyManagerError {
    // =========================================================================
    // ACTION SURFACE ERRORS
    // =========================================================================
    /// A credential with this address is already registered.
    #[error("A credential with address {0} is already registered")]
    DuplicateAddress(MacAddress),

    /// No credential (or pending detection) exists for this address.
    #[error("No credential found for address {0}")]
    NotFound(MacAddress),

    /// Input failed validation. Nothing was changed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // =========================================================================
    // DEGRADED-MODE ERRORS
    // =========================================================================
    /// Reading or writing the credential file failed.
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    /// The radio rejected a scan start/stop request.
    #[error("Radio unavailable: {0}")]
    RadioUnavailable(String),

    // =========================================================================
    // CONFIGURATION & RUNTIME ERRORS
    // =========================================================================
    /// The configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The manager task has shut down and can no longer accept commands.
    #[error("Credential manager is not running")]
    ManagerStopped,
}

/// A specialized [`Result`] type for credential manager operations.
pub type Result<T> = std::result::Result<T, KeyManagerError>;

impl KeyManagerError {
    /// Returns `true` if the caller supplied bad input (no state was changed).
    #[inline]
    #[must_use]
    pub const fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_) | Self::DuplicateAddress(_) | Self::NotFound(_)
        )
    }

    /// Returns `true` if the system keeps operating and will retry on its own.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::PersistenceFailure(_) | Self::RadioUnavailable(_))
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::InvalidArgument(_) => 400,
            Self::NotFound(_) => 404,
            Self::DuplicateAddress(_) => 409,
            Self::Config(_) => 422,
            Self::PersistenceFailure(_) => 500,
            Self::RadioUnavailable(_) | Self::ManagerStopped => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::DuplicateAddress(_) => "DUPLICATE_ADDRESS",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::PersistenceFailure(_) => "PERSISTENCE_FAILURE",
            Self::RadioUnavailable(_) => "RADIO_UNAVAILABLE",
            Self::Config(_) => "CONFIG_ERROR",
            Self::ManagerStopped => "MANAGER_STOPPED",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::address::InvalidMacAddress> for KeyManagerError {
    fn from(err: crate::address::InvalidMacAddress) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

impl From<crate::persistence::PersistenceError> for KeyManagerError {
    fn from(err: crate::persistence::PersistenceError) -> Self {
        Self::PersistenceFailure(err.to_string())
    }
}

impl From<crate::radio::RadioError> for KeyManagerError {
    fn from(err: crate::radio::RadioError) -> Self {
        Self::RadioUnavailable(err.to_string())
    }
}

impl From<crate::config::ConfigError> for KeyManagerError {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================
