//! Credential manager configuration.
//!
//! Settings come from an optional TOML file overlaid with `BLEKEY_*`
//! environment variables (e.g. `BLEKEY_SCAN_INTERVAL_MS=30000`). Durations
//! are expressed in milliseconds.
//!
//! ```toml
//! scan_interval_ms = 60000
//! scan_duration_ms = 5000
//! restore_from_flash = true
//! confirmation_window_ms = 10000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::manager::MAX_BURST_DURATION;
use crate::persistence::default_credentials_path;
use crate::scan::ScanTiming;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "BLEKEY";

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    /// A single field is invalid.
    #[error("{field}: {message}")]
    ValidationError {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields are invalid.
    #[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings for a [`KeyManager`](crate::manager::KeyManager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyManagerConfig {
    /// Time between periodic scans. `0` disables automatic scanning.
    pub scan_interval_ms: u64,

    /// Length of each periodic scan. Must not exceed the interval.
    pub scan_duration_ms: u64,

    /// Restore credentials from storage at startup.
    pub restore_from_flash: bool,

    /// How long an unconfirmed sighting waits for its confirmation signal.
    pub confirmation_window_ms: u64,

    /// Report credentials that require confirmation without it while a
    /// manually requested burst is running.
    pub burst_bypasses_confirmation: bool,

    /// Burst length used when a caller does not give one.
    pub default_burst_ms: u64,

    /// Scheduler tick period.
    pub tick_interval_ms: u64,

    /// Capacity of the radio event queue.
    pub event_queue_capacity: usize,

    /// Credential file. Defaults to the platform data directory.
    pub storage_path: Option<PathBuf>,
}

impl Default for KeyManagerConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 60_000,
            scan_duration_ms: 5_000,
            restore_from_flash: true,
            confirmation_window_ms: 10_000,
            burst_bypasses_confirmation: false,
            default_burst_ms: 30_000,
            tick_interval_ms: 100,
            event_queue_capacity: 256,
            storage_path: None,
        }
    }
}

impl KeyManagerConfig {
    /// Load from an optional TOML file plus `BLEKEY_*` environment overrides,
    /// then validate.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }
        let loaded: Self = builder
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Check every constraint, reporting all violations at once.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a single problem or
    /// [`ConfigError::MultipleValidationErrors`] for several.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut invalid = |field, message: &str| {
            errors.push(ConfigError::ValidationError {
                field,
                message: message.to_string(),
            });
        };

        if self.scan_duration_ms > self.scan_interval_ms {
            invalid("scan_duration_ms", "must not exceed scan_interval_ms");
        }
        if self.scan_interval_ms > 0 && self.scan_duration_ms == 0 {
            invalid(
                "scan_duration_ms",
                "must be positive when periodic scanning is enabled",
            );
        }
        if self.confirmation_window_ms == 0 {
            invalid("confirmation_window_ms", "must be positive");
        }
        if self.default_burst_ms == 0 {
            invalid("default_burst_ms", "must be positive");
        }
        if self.default_burst() > MAX_BURST_DURATION {
            invalid(
                "default_burst_ms",
                &format!("must be at most {}", MAX_BURST_DURATION.as_millis()),
            );
        }
        if self.tick_interval_ms == 0 {
            invalid("tick_interval_ms", "must be positive");
        }
        if self.event_queue_capacity == 0 {
            invalid("event_queue_capacity", "must be positive");
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Periodic scan timing.
    #[must_use]
    pub const fn timing(&self) -> ScanTiming {
        ScanTiming {
            interval: Duration::from_millis(self.scan_interval_ms),
            duration: Duration::from_millis(self.scan_duration_ms),
        }
    }

    /// Confirmation window as a [`Duration`].
    #[must_use]
    pub const fn confirmation_window(&self) -> Duration {
        Duration::from_millis(self.confirmation_window_ms)
    }

    /// Default burst length as a [`Duration`].
    #[must_use]
    pub const fn default_burst(&self) -> Duration {
        Duration::from_millis(self.default_burst_ms)
    }

    /// Scheduler tick period as a [`Duration`].
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Credential file path, falling back to the platform default.
    #[must_use]
    pub fn storage_path(&self) -> PathBuf {
        self.storage_path
            .clone()
            .unwrap_or_else(default_credentials_path)
    }
}
