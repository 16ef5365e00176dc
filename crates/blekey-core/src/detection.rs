//! Matching observed advertisements against the credential store.
//!
//! Matching is by exact address only. The address is the whole trust
//! boundary: a beacon that spoofs a registered address is indistinguishable
//! from the real one.
//!
//! An enabled credential is reported at most once per scan session. Frames
//! repeat many times a second, so later frames from the same address in the
//! same session are dropped. Credentials that require confirmation are held
//! as a [`PendingDetection`] until [`DetectionEngine::confirm`] is called for
//! that address, or silently discarded when the confirmation window lapses.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::address::MacAddress;
use crate::error::{KeyManagerError, Result};
use crate::radio::Advertisement;
use crate::store::CredentialStore;

/// An authorized credential was seen (and confirmed, if required).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct DetectionEvent {
    /// Address of the credential.
    #[schema(value_type = String, example = "AA:BB:CC:DD:EE:FF")]
    pub address: MacAddress,
    /// Credential label at the time of detection.
    #[schema(example = "Front door fob")]
    pub name: String,
    /// Scan session the sighting belongs to.
    pub session: u64,
    /// Whether the event was released by a confirmation signal.
    pub confirmed: bool,
    /// Monotonic detection time.
    #[serde(skip)]
    pub detected_at: Instant,
    /// Wall-clock detection time.
    pub detected_at_utc: DateTime<Utc>,
}

/// A sighting waiting for confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingDetection {
    /// Address of the credential.
    pub address: MacAddress,
    /// Most recent sighting.
    pub seen_at: Instant,
    /// When the record is discarded if still unconfirmed.
    pub expires_at: Instant,
    /// Scan session of the most recent sighting.
    pub session: u64,
}

/// What happened to an advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// No credential has this address.
    Unknown,
    /// The credential is disabled.
    Disabled,
    /// Already reported in this scan session or a later one.
    Duplicate,
    /// Held until confirmed or until `expires_at`.
    PendingConfirmation {
        /// End of the confirmation window.
        expires_at: Instant,
    },
    /// Reported.
    Detected(DetectionEvent),
}

/// Stateful matcher between the radio and the dispatcher.
#[derive(Debug)]
pub struct DetectionEngine {
    confirmation_window: Duration,
    reported: HashMap<MacAddress, u64>,
    pending: HashMap<MacAddress, PendingDetection>,
}

impl DetectionEngine {
    /// Create an engine holding unconfirmed sightings for `confirmation_window`.
    #[must_use]
    pub fn new(confirmation_window: Duration) -> Self {
        Self {
            confirmation_window,
            reported: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Match one advertisement observed during scan `session`.
    ///
    /// When `bypass_confirmation` is set, credentials that require
    /// confirmation are reported directly.
    pub fn observe(
        &mut self,
        advertisement: &Advertisement,
        session: u64,
        now: Instant,
        store: &mut CredentialStore,
        bypass_confirmation: bool,
    ) -> Observation {
        let address = advertisement.address;
        let Some(credential) = store.lookup(&address) else {
            return Observation::Unknown;
        };
        if !credential.can_match() {
            return Observation::Disabled;
        }
        if self.reported.get(&address).is_some_and(|&last| last >= session) {
            return Observation::Duplicate;
        }

        if credential.require_confirmation && !bypass_confirmation {
            let expires_at = now + self.confirmation_window;
            let refreshed = self
                .pending
                .insert(
                    address,
                    PendingDetection {
                        address,
                        seen_at: now,
                        expires_at,
                        session,
                    },
                )
                .is_some();
            if !refreshed {
                debug!(name = %credential.name, %address, "Detection awaiting confirmation");
            }
            return Observation::PendingConfirmation { expires_at };
        }

        let event = DetectionEvent {
            address,
            name: credential.name.clone(),
            session,
            confirmed: false,
            detected_at: now,
            detected_at_utc: Utc::now(),
        };
        self.report(&event, store);
        Observation::Detected(event)
    }

    /// Release the pending sighting for `address`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::NotFound`] if nothing is pending for the
    /// address, the window has lapsed, or the credential was disabled or
    /// removed in the meantime.
    pub fn confirm(
        &mut self,
        address: &MacAddress,
        now: Instant,
        store: &mut CredentialStore,
    ) -> Result<DetectionEvent> {
        let pending = self
            .pending
            .remove(address)
            .ok_or(KeyManagerError::NotFound(*address))?;

        if now >= pending.expires_at {
            debug!(%address, "Confirmation arrived after the window closed");
            return Err(KeyManagerError::NotFound(*address));
        }

        let credential = store
            .lookup(address)
            .filter(|c| c.can_match())
            .ok_or(KeyManagerError::NotFound(*address))?;

        let event = DetectionEvent {
            address: *address,
            name: credential.name.clone(),
            session: pending.session,
            confirmed: true,
            detected_at: now,
            detected_at_utc: Utc::now(),
        };
        self.report(&event, store);
        info!(name = %event.name, %address, "Detection confirmed");
        Ok(event)
    }

    /// Discard pending sightings whose window has lapsed. Returns how many were dropped.
    pub fn expire(&mut self, now: Instant) -> usize {
        let before = self.pending.len();
        self.pending.retain(|address, pending| {
            let keep = now < pending.expires_at;
            if !keep {
                debug!(%address, "Unconfirmed detection expired");
            }
            keep
        });
        before - self.pending.len()
    }

    /// Drop all state for a credential that was removed.
    pub fn forget(&mut self, address: &MacAddress) {
        self.reported.remove(address);
        self.pending.remove(address);
    }

    /// Drop all state.
    pub fn reset(&mut self) {
        self.reported.clear();
        self.pending.clear();
    }

    /// Pending record for `address`, if any.
    #[must_use]
    pub fn pending(&self, address: &MacAddress) -> Option<&PendingDetection> {
        self.pending.get(address)
    }

    /// Number of sightings awaiting confirmation.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn report(&mut self, event: &DetectionEvent, store: &mut CredentialStore) {
        self.reported.insert(event.address, event.session);
        store.mark_seen(&event.address, event.detected_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;

    const WINDOW: Duration = Duration::from_secs(10);

    fn addr(last: u8) -> MacAddress {
        MacAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, last])
    }

    fn setup() -> (DetectionEngine, CredentialStore) {
        let mut store = CredentialStore::open(Box::new(MemoryPersistence::new()), false);
        store.add("Badge", addr(1), false).unwrap();
        store.add("Fob", addr(2), true).unwrap();
        (DetectionEngine::new(WINDOW), store)
    }

    fn seen(
        engine: &mut DetectionEngine,
        store: &mut CredentialStore,
        last: u8,
        session: u64,
        now: Instant,
    ) -> Observation {
        engine.observe(&Advertisement::new(addr(last), now), session, now, store, false)
    }

    #[test]
    fn test_unknown_and_disabled_are_discarded() {
        let (mut engine, mut store) = setup();
        let now = Instant::now();
        assert_eq!(seen(&mut engine, &mut store, 9, 1, now), Observation::Unknown);

        store.set_enabled(&addr(1), false).unwrap();
        assert_eq!(seen(&mut engine, &mut store, 1, 1, now), Observation::Disabled);

        store.set_enabled(&addr(1), true).unwrap();
        assert!(matches!(
            seen(&mut engine, &mut store, 1, 1, now),
            Observation::Detected(_)
        ));
    }

    #[test]
    fn test_one_event_per_session() {
        let (mut engine, mut store) = setup();
        let now = Instant::now();

        let mut detections = 0;
        for _ in 0..50 {
            if let Observation::Detected(event) = seen(&mut engine, &mut store, 1, 1, now) {
                assert_eq!(event.name, "Badge");
                assert!(!event.confirmed);
                detections += 1;
            }
        }
        assert_eq!(detections, 1);
        assert_eq!(store.lookup(&addr(1)).unwrap().last_seen, Some(now));

        // A new session reports the credential again.
        assert!(matches!(
            seen(&mut engine, &mut store, 1, 2, now),
            Observation::Detected(_)
        ));
    }

    #[test]
    fn test_late_frame_from_earlier_session_is_duplicate() {
        let (mut engine, mut store) = setup();
        let now = Instant::now();

        assert!(matches!(
            seen(&mut engine, &mut store, 1, 2, now),
            Observation::Detected(_)
        ));
        assert_eq!(
            seen(&mut engine, &mut store, 1, 1, now),
            Observation::Duplicate
        );
        assert!(matches!(
            seen(&mut engine, &mut store, 1, 3, now),
            Observation::Detected(_)
        ));
    }

    #[test]
    fn test_confirmation_within_window() {
        let (mut engine, mut store) = setup();
        let t0 = Instant::now();

        assert!(matches!(
            seen(&mut engine, &mut store, 2, 1, t0),
            Observation::PendingConfirmation { .. }
        ));
        assert_eq!(engine.pending_count(), 1);

        let event = engine
            .confirm(&addr(2), t0 + Duration::from_secs(3), &mut store)
            .unwrap();
        assert_eq!(event.name, "Fob");
        assert!(event.confirmed);
        assert_eq!(engine.pending_count(), 0);

        // A second confirmation has nothing to release.
        assert!(matches!(
            engine.confirm(&addr(2), t0 + Duration::from_secs(4), &mut store),
            Err(KeyManagerError::NotFound(_))
        ));
        // Further frames in the same session are duplicates.
        assert_eq!(
            seen(&mut engine, &mut store, 2, 1, t0 + Duration::from_secs(5)),
            Observation::Duplicate
        );
    }

    #[test]
    fn test_confirmation_after_window_is_rejected() {
        let (mut engine, mut store) = setup();
        let t0 = Instant::now();
        seen(&mut engine, &mut store, 2, 1, t0);

        assert!(engine
            .confirm(&addr(2), t0 + WINDOW, &mut store)
            .is_err());
        assert_eq!(store.lookup(&addr(2)).unwrap().last_seen, None);
    }

    #[test]
    fn test_pending_window_is_refreshed_and_expires() {
        let (mut engine, mut store) = setup();
        let t0 = Instant::now();
        seen(&mut engine, &mut store, 2, 1, t0);
        seen(&mut engine, &mut store, 2, 1, t0 + Duration::from_secs(8));

        assert_eq!(engine.expire(t0 + WINDOW), 0);
        assert_eq!(
            engine.pending(&addr(2)).unwrap().expires_at,
            t0 + Duration::from_secs(18)
        );
        assert_eq!(engine.expire(t0 + Duration::from_secs(18)), 1);
        assert!(engine.pending(&addr(2)).is_none());
    }

    #[test]
    fn test_confirmation_fails_if_disabled_meanwhile() {
        let (mut engine, mut store) = setup();
        let t0 = Instant::now();
        seen(&mut engine, &mut store, 2, 1, t0);
        store.set_enabled(&addr(2), false).unwrap();

        assert!(engine.confirm(&addr(2), t0, &mut store).is_err());
    }

    #[test]
    fn test_bypass_reports_confirmation_credentials_directly() {
        let (mut engine, mut store) = setup();
        let now = Instant::now();
        let observation =
            engine.observe(&Advertisement::new(addr(2), now), 1, now, &mut store, true);
        assert!(matches!(observation, Observation::Detected(e) if !e.confirmed));
    }

    #[test]
    fn test_forget_clears_state() {
        let (mut engine, mut store) = setup();
        let now = Instant::now();
        seen(&mut engine, &mut store, 1, 1, now);
        seen(&mut engine, &mut store, 2, 1, now);

        engine.forget(&addr(2));
        assert_eq!(engine.pending_count(), 0);

        engine.forget(&addr(1));
        assert!(matches!(
            seen(&mut engine, &mut store, 1, 1, now),
            Observation::Detected(_)
        ));
    }
}
