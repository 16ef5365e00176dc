//! # blekey-core
//!
//! Core logic for the blekey BLE access-credential manager.
//!
//! This crate provides:
//! - A persistent allow-list of BLE beacon credentials keyed by MAC address
//! - A periodic/burst scan scheduler driving the Bluetooth radio
//! - Detection of registered beacons, with optional confirmation
//! - Ordered, failure-isolated delivery of detection events to listeners
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`address`] - MAC address parsing and formatting
//! - [`credential`] / [`store`] - The credential allow-list
//! - [`persistence`] - Storage contract and JSON file backend
//! - [`radio`] - Radio boundary, event queue, simulated and BlueZ radios
//! - [`scan`] - Idle/Periodic/Burst scan state machine
//! - [`detection`] - Matching advertisements to credentials
//! - [`dispatch`] - Detection listeners
//! - [`manager`] - [`KeyManager`], the action surface tying it together
//! - [`runtime`] - Background task and [`ManagerHandle`]
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Unified error types for the crate

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod address;
pub mod config;
pub mod credential;
pub mod detection;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod persistence;
pub mod radio;
pub mod runtime;
pub mod scan;
pub mod store;

// Re-export primary types for convenience
pub use address::{is_valid_mac_address, InvalidMacAddress, MacAddress};
pub use config::{ConfigError, ConfigResult, KeyManagerConfig};
pub use credential::Credential;
pub use detection::{DetectionEngine, DetectionEvent, Observation, PendingDetection};
pub use dispatch::{DispatchReport, Dispatcher, Listener, ListenerId};
pub use error::{KeyManagerError, Result};
pub use manager::{
    burst_duration_from_millis, KeyManager, ManagerStatus, MAX_BURST_DURATION, MAX_NAME_LENGTH,
};
pub use persistence::{
    default_credentials_path, CredentialPersistence, JsonFilePersistence, MemoryPersistence,
    PersistenceError, PersistenceResult,
};
#[cfg(feature = "bluetooth")]
pub use radio::BluerRadio;
pub use radio::{
    event_queue, Advertisement, Radio, RadioError, RadioEvent, RadioEventReceiver, RadioEventSender,
    SimulatedRadio,
};
pub use runtime::{spawn, ManagerHandle};
pub use scan::{RadioCommand, ScanController, ScanMode, ScanState, ScanTiming, ScanWindow};
pub use store::{CredentialStore, CredentialSummary, SaveOutcome};
