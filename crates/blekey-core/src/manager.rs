//! The credential manager.
//!
//! [`KeyManager`] owns the credential store, the scan controller, the
//! detection engine and the listener registry, and drives the radio. It is a
//! plain value with no internal locking: whoever owns it (usually the task
//! started by [`crate::runtime::spawn`]) feeds it radio events and scheduler
//! ticks and calls the action surface.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::address::MacAddress;
use crate::config::KeyManagerConfig;
use crate::detection::{DetectionEngine, DetectionEvent, Observation};
use crate::dispatch::{Dispatcher, Listener, ListenerId};
use crate::error::{KeyManagerError, Result};
use crate::persistence::CredentialPersistence;
use crate::radio::{Radio, RadioEvent};
use crate::scan::{RadioCommand, ScanController, ScanMode};
use crate::store::{CredentialStore, CredentialSummary, SaveOutcome};

/// Maximum credential name length in characters.
pub const MAX_NAME_LENGTH: usize = 64;

/// Longest burst that can be requested.
pub const MAX_BURST_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Validate a credential name.
///
/// # Errors
///
/// Returns [`KeyManagerError::InvalidArgument`] if the name is blank or too long.
pub fn validate_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(KeyManagerError::InvalidArgument(
            "credential name must not be empty".into(),
        ));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(KeyManagerError::InvalidArgument(format!(
            "credential name must be at most {MAX_NAME_LENGTH} characters"
        )));
    }
    Ok(name)
}

/// Validate a burst duration.
///
/// # Errors
///
/// Returns [`KeyManagerError::InvalidArgument`] if the duration exceeds
/// [`MAX_BURST_DURATION`].
pub fn validate_burst_duration(duration: Duration) -> Result<Duration> {
    if duration > MAX_BURST_DURATION {
        return Err(KeyManagerError::InvalidArgument(format!(
            "burst duration must be at most {}s",
            MAX_BURST_DURATION.as_secs()
        )));
    }
    Ok(duration)
}

/// Convert a caller-supplied millisecond count into a burst duration.
///
/// # Errors
///
/// Returns [`KeyManagerError::InvalidArgument`] for negative or oversized values.
pub fn burst_duration_from_millis(millis: i64) -> Result<Duration> {
    let millis = u64::try_from(millis).map_err(|_| {
        KeyManagerError::InvalidArgument("burst duration must not be negative".into())
    })?;
    validate_burst_duration(Duration::from_millis(millis))
}

fn parse_address(address: &str) -> Result<MacAddress> {
    Ok(address.trim().parse::<MacAddress>()?)
}

/// Point-in-time view of the manager for telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ManagerStatus {
    /// Current scan mode.
    pub scan_mode: ScanMode,
    /// Whether a scan window is open.
    pub scanning: bool,
    /// Whether the radio has confirmed an active scan.
    pub radio_active: bool,
    /// Most recent scan session number.
    pub scan_session: u64,
    /// Milliseconds left in the current burst.
    pub burst_remaining_ms: Option<u64>,
    /// Milliseconds until the scan controller next acts on its own.
    pub next_transition_ms: Option<u64>,
    /// Registered credentials.
    pub credential_count: usize,
    /// Sightings awaiting confirmation.
    pub pending_confirmations: usize,
    /// Detection events reported since startup.
    pub detections: u64,
    /// Name of the most recently detected credential.
    #[schema(example = "Front door fob")]
    pub last_detection: Option<String>,
    /// Failed credential writes since startup.
    pub persistence_failures: u64,
    /// Listener invocations that failed since startup.
    pub listener_failures: u64,
    /// Registered detection listeners.
    pub listeners: usize,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Registry of authorized BLE credentials plus the scan schedule that looks
/// for them.
pub struct KeyManager {
    config: KeyManagerConfig,
    store: CredentialStore,
    controller: ScanController,
    engine: DetectionEngine,
    dispatcher: Dispatcher,
    radio: Box<dyn Radio>,
    last_detection: Option<DetectionEvent>,
    detections: u64,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("store", &self.store)
            .field("controller", &self.controller)
            .field("engine", &self.engine)
            .field("dispatcher", &self.dispatcher)
            .field("detections", &self.detections)
            .finish_non_exhaustive()
    }
}

impl KeyManager {
    /// Build a manager, restoring credentials from `persistence` if the
    /// configuration asks for it. Starts idle.
    pub fn new(
        config: KeyManagerConfig,
        persistence: Box<dyn CredentialPersistence>,
        radio: Box<dyn Radio>,
        now: Instant,
    ) -> Self {
        let store = CredentialStore::open(persistence, config.restore_from_flash);
        let controller = ScanController::new(config.timing(), now);
        let engine = DetectionEngine::new(config.confirmation_window());

        let manager = Self {
            config,
            store,
            controller,
            engine,
            dispatcher: Dispatcher::new(),
            radio,
            last_detection: None,
            detections: 0,
        };
        manager.log_config();
        manager
    }

    fn log_config(&self) {
        let timing = self.controller.timing();
        info!(
            scan_interval_ms = millis(timing.interval),
            scan_duration_ms = millis(timing.duration),
            restore_from_flash = self.config.restore_from_flash,
            confirmation_window_ms = self.config.confirmation_window_ms,
            burst_bypasses_confirmation = self.config.burst_bypasses_confirmation,
            credentials = self.store.count(),
            "BLE key manager configured"
        );
        if !timing.periodic_enabled() {
            info!("Periodic scanning disabled, scans run only on request");
        }
        for credential in self.store.credentials() {
            debug!(
                name = %credential.name,
                address = %credential.address,
                enabled = credential.enabled,
                "Registered credential"
            );
        }
    }

    /// Configuration the manager was built with.
    #[must_use]
    pub const fn config(&self) -> &KeyManagerConfig {
        &self.config
    }

    // =========================================================================
    // ACTION SURFACE
    // =========================================================================

    /// Register a credential. New credentials are enabled.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::InvalidArgument`] for a malformed name or
    /// address and [`KeyManagerError::DuplicateAddress`] if the address is
    /// already registered.
    pub fn add_credential(
        &mut self,
        name: &str,
        address: &str,
        require_confirmation: bool,
    ) -> Result<SaveOutcome> {
        let name = validate_name(name)?;
        let address = parse_address(address)?;
        self.store.add(name, address, require_confirmation)
    }

    /// Delete a credential and any pending sighting of it.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::InvalidArgument`] for a malformed address and
    /// [`KeyManagerError::NotFound`] if it is not registered.
    pub fn remove_credential(&mut self, address: &str) -> Result<SaveOutcome> {
        let address = parse_address(address)?;
        let outcome = self.store.remove(&address)?;
        self.engine.forget(&address);
        Ok(outcome)
    }

    /// Enable or disable a credential.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::InvalidArgument`] for a malformed address and
    /// [`KeyManagerError::NotFound`] if it is not registered.
    pub fn set_credential_enabled(&mut self, address: &str, enabled: bool) -> Result<SaveOutcome> {
        let address = parse_address(address)?;
        self.store.set_enabled(&address, enabled)
    }

    /// Remove every credential.
    pub fn clear_credentials(&mut self) -> SaveOutcome {
        self.engine.reset();
        self.store.clear()
    }

    /// Scan continuously for `duration`, overriding the periodic schedule.
    ///
    /// A radio that rejects the request leaves the manager idle until the next
    /// periodic tick; the request itself is still accepted.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::InvalidArgument`] if `duration` is too long.
    pub fn start_scan_burst(&mut self, duration: Duration, now: Instant) -> Result<()> {
        let duration = validate_burst_duration(duration)?;
        let commands = self.controller.start_burst(duration, now);
        self.execute(commands, now);
        Ok(())
    }

    /// Start a burst of the configured default length.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::InvalidArgument`] if the configured length is too long.
    pub fn start_default_burst(&mut self, now: Instant) -> Result<()> {
        self.start_scan_burst(self.config.default_burst(), now)
    }

    /// Deliver the confirmation signal for a pending sighting, reporting it.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::InvalidArgument`] for a malformed address and
    /// [`KeyManagerError::NotFound`] if nothing is awaiting confirmation.
    pub fn confirm_detection(&mut self, address: &str, now: Instant) -> Result<DetectionEvent> {
        let address = parse_address(address)?;
        let event = self.engine.confirm(&address, now, &mut self.store)?;
        self.emit(&event);
        Ok(event)
    }

    /// Register a detection listener.
    pub fn on_detection(&mut self, listener: Listener) -> ListenerId {
        self.dispatcher.register(listener)
    }

    /// Unregister a detection listener. Returns `false` if it was unknown.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.dispatcher.unregister(id)
    }

    // =========================================================================
    // SCHEDULER INPUTS
    // =========================================================================

    /// Process one event from the radio queue. Returns the detection event it
    /// produced, if any.
    pub fn handle_radio_event(
        &mut self,
        event: RadioEvent,
        now: Instant,
    ) -> Option<DetectionEvent> {
        self.controller.on_radio_event(&event);

        match event {
            RadioEvent::Advertisement(advertisement) => {
                let Some(window) = self.controller.window_at(advertisement.received_at).copied()
                else {
                    debug!(
                        address = %advertisement.address,
                        "Advertisement outside scan window ignored"
                    );
                    return None;
                };
                let bypass =
                    self.config.burst_bypasses_confirmation && window.mode == ScanMode::Burst;
                match self.engine.observe(
                    &advertisement,
                    window.session,
                    now,
                    &mut self.store,
                    bypass,
                ) {
                    Observation::Detected(event) => {
                        self.emit(&event);
                        Some(event)
                    }
                    _ => None,
                }
            }
            RadioEvent::ScanFailed(reason) => {
                warn!(%reason, "Radio reported scan failure");
                self.controller.radio_failed(now);
                None
            }
            RadioEvent::ScanStarted => {
                debug!(session = self.controller.session(), "Radio confirmed scan start");
                None
            }
            RadioEvent::ScanStopped => {
                debug!(session = self.controller.session(), "Radio confirmed scan stop");
                None
            }
        }
    }

    /// Advance the scan schedule, issue due radio commands and drop lapsed
    /// confirmation windows.
    pub fn tick(&mut self, now: Instant) {
        let commands = self.controller.tick(now);
        self.execute(commands, now);

        let expired = self.engine.expire(now);
        if expired > 0 {
            debug!(expired, "Dropped unconfirmed detections");
        }
    }

    /// Stop any running scan. Used at teardown.
    pub fn shutdown(&mut self) {
        if self.controller.is_scanning() || self.controller.radio_active() {
            if let Err(e) = self.radio.stop_scan() {
                warn!(error = %e, "Failed to stop scan during shutdown");
            }
        }
        info!(detections = self.detections, "BLE key manager stopped");
    }

    fn execute(&mut self, commands: Vec<RadioCommand>, now: Instant) {
        for command in commands {
            let result = match command {
                RadioCommand::StartScan(duration) => self.radio.start_scan(duration),
                RadioCommand::StopScan => self.radio.stop_scan(),
            };
            if let Err(e) = result {
                warn!(?command, error = %e, "Radio command failed");
                self.controller.radio_failed(now);
                break;
            }
        }
    }

    fn emit(&mut self, event: &DetectionEvent) {
        info!(
            name = %event.name,
            address = %event.address,
            session = event.session,
            confirmed = event.confirmed,
            "Authorized credential detected"
        );
        self.detections += 1;
        self.last_detection = Some(event.clone());
        let report = self.dispatcher.dispatch(event);
        if report.failed > 0 {
            debug!(failed = report.failed, delivered = report.delivered, "Some listeners failed");
        }
    }

    // =========================================================================
    // TELEMETRY
    // =========================================================================

    /// Number of registered credentials.
    #[must_use]
    pub fn count(&self) -> usize {
        self.store.count()
    }

    /// Credential names, ordered by name then address.
    #[must_use]
    pub fn list_names(&self) -> Vec<String> {
        self.store.list_names()
    }

    /// Name of the most recently detected credential.
    #[must_use]
    pub fn last_detection_name(&self) -> Option<&str> {
        self.last_detection.as_ref().map(|event| event.name.as_str())
    }

    /// The most recent detection event.
    #[must_use]
    pub const fn last_detection(&self) -> Option<&DetectionEvent> {
        self.last_detection.as_ref()
    }

    /// Current scan mode.
    #[must_use]
    pub const fn scan_mode(&self) -> ScanMode {
        self.controller.mode()
    }

    /// Per-credential telemetry.
    #[must_use]
    pub fn credentials(&self, now: Instant) -> Vec<CredentialSummary> {
        self.store.summaries(now)
    }

    /// The `registered_keys` JSON document.
    #[must_use]
    pub fn registered_keys_json(&self, now: Instant) -> String {
        self.store.registered_keys_json(now)
    }

    /// Snapshot of scan and detection state.
    #[must_use]
    pub fn status(&self, now: Instant) -> ManagerStatus {
        let state = self.controller.state();
        ManagerStatus {
            scan_mode: self.controller.mode(),
            scanning: self.controller.is_scanning(),
            radio_active: self.controller.radio_active(),
            scan_session: self.controller.session(),
            burst_remaining_ms: state.burst_remaining(now).map(millis),
            next_transition_ms: state
                .next_deadline()
                .map(|at| millis(at.saturating_duration_since(now))),
            credential_count: self.store.count(),
            pending_confirmations: self.engine.pending_count(),
            detections: self.detections,
            last_detection: self.last_detection_name().map(str::to_string),
            persistence_failures: self.store.persistence_failures(),
            listener_failures: self.dispatcher.failures(),
            listeners: self.dispatcher.len(),
        }
    }
}
