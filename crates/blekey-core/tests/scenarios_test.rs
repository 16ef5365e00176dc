//! End-to-end scenarios driving a `KeyManager` with a simulated radio and
//! explicit clock values.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::Instant;

use blekey_core::{
    event_queue, Advertisement, CredentialPersistence, DetectionEvent, JsonFilePersistence,
    KeyManager, KeyManagerConfig, KeyManagerError, MemoryPersistence, RadioEvent,
    RadioEventReceiver, RadioEventSender, ScanMode, SimulatedRadio,
};

// ============================================================================
// Helpers
// ============================================================================

const A: &str = "AA:BB:CC:DD:EE:FF";

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

struct Rig {
    manager: KeyManager,
    radio: SimulatedRadio,
    sender: RadioEventSender,
    events: RadioEventReceiver,
    detections: Arc<Mutex<Vec<DetectionEvent>>>,
}

impl Rig {
    fn new(
        config: KeyManagerConfig,
        persistence: Box<dyn CredentialPersistence>,
        t0: Instant,
    ) -> Self {
        let (tx, events) = event_queue(config.event_queue_capacity);
        let radio = SimulatedRadio::new(tx.clone());
        let mut manager = KeyManager::new(config, persistence, Box::new(radio.clone()), t0);

        let detections = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&detections);
        manager.on_detection(Box::new(move |event: &DetectionEvent| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        }));

        Self {
            manager,
            radio,
            sender: tx,
            events,
            detections,
        }
    }

    fn with_defaults(t0: Instant) -> Self {
        Self::new(KeyManagerConfig::default(), Box::new(MemoryPersistence::new()), t0)
    }

    /// Feed every queued radio event to the manager.
    fn drain(&mut self, now: Instant) {
        while let Some(event) = self.events.try_recv() {
            self.manager.handle_radio_event(event, now);
        }
    }

    /// Hear a frame at `now` without processing it.
    fn hear(&self, address: &str, now: Instant) -> bool {
        self.radio
            .advertise_at(address.parse().unwrap(), vec![0x02, 0x01, 0x06], now)
    }

    fn advertise(&mut self, address: &str, now: Instant) {
        self.hear(address, now);
        self.drain(now);
    }

    fn detected_names(&self) -> Vec<String> {
        self.detections
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.name.clone())
            .collect()
    }
}

// ============================================================================
// Detection Scenarios
// ============================================================================

#[test]
fn periodic_scan_detects_registered_credential_once() {
    let t0 = Instant::now();
    let mut rig = Rig::with_defaults(t0);
    rig.manager.add_credential("A", A, false).unwrap();

    // First periodic window opens after one 60s interval.
    rig.manager.tick(t0 + secs(60));
    assert!(rig.radio.is_scanning());
    rig.drain(t0 + secs(60));

    rig.advertise(A, t0 + secs(61));

    assert_eq!(rig.detected_names(), vec!["A"]);
    assert_eq!(rig.manager.count(), 1);
    assert_eq!(rig.manager.last_detection_name(), Some("A"));

    // The window closes after 5s.
    rig.manager.tick(t0 + secs(65));
    assert!(!rig.radio.is_scanning());
}

#[test]
fn repeated_advertisements_produce_one_event_per_session() {
    let t0 = Instant::now();
    let mut rig = Rig::with_defaults(t0);
    rig.manager.add_credential("A", A, false).unwrap();
    rig.manager.start_scan_burst(secs(30), t0).unwrap();

    for i in 0..100 {
        rig.advertise(A, t0 + Duration::from_millis(i * 10));
    }
    assert_eq!(rig.detected_names().len(), 1);

    // The next periodic session reports it again.
    rig.manager.tick(t0 + secs(30));
    rig.manager.tick(t0 + secs(90));
    rig.advertise(A, t0 + secs(91));
    assert_eq!(rig.detected_names().len(), 2);
}

#[test]
fn disabled_credential_never_detected_until_reenabled() {
    let t0 = Instant::now();
    let mut rig = Rig::with_defaults(t0);
    rig.manager.add_credential("A", A, false).unwrap();
    rig.manager.set_credential_enabled(A, false).unwrap();
    rig.manager.start_scan_burst(secs(30), t0).unwrap();

    rig.advertise(A, t0 + secs(1));
    assert!(rig.detected_names().is_empty());

    rig.manager.set_credential_enabled(A, true).unwrap();
    rig.advertise(A, t0 + secs(2));
    assert_eq!(rig.detected_names(), vec!["A"]);
}

#[test]
fn unknown_addresses_are_ignored() {
    let t0 = Instant::now();
    let mut rig = Rig::with_defaults(t0);
    rig.manager.add_credential("A", A, false).unwrap();
    rig.manager.start_scan_burst(secs(30), t0).unwrap();

    rig.advertise("11:22:33:44:55:66", t0 + secs(1));
    assert!(rig.detected_names().is_empty());
}

// ============================================================================
// Confirmation Scenarios
// ============================================================================

#[test]
fn confirmation_within_window_produces_exactly_one_event() {
    let t0 = Instant::now();
    let mut rig = Rig::with_defaults(t0);
    rig.manager.add_credential("A", A, true).unwrap();
    rig.manager.start_scan_burst(secs(30), t0).unwrap();

    rig.advertise(A, t0 + secs(1));
    rig.advertise(A, t0 + secs(2));
    assert!(rig.detected_names().is_empty());

    let event = rig.manager.confirm_detection(A, t0 + secs(5)).unwrap();
    assert!(event.confirmed);
    assert_eq!(rig.detected_names(), vec!["A"]);

    rig.advertise(A, t0 + secs(6));
    assert_eq!(rig.detected_names(), vec!["A"]);
}

#[test]
fn expired_confirmation_window_produces_no_event() {
    let t0 = Instant::now();
    let mut rig = Rig::with_defaults(t0);
    rig.manager.add_credential("A", A, true).unwrap();
    rig.manager.start_scan_burst(secs(30), t0).unwrap();

    rig.advertise(A, t0 + secs(1));
    rig.manager.tick(t0 + secs(12));

    assert!(matches!(
        rig.manager.confirm_detection(A, t0 + secs(12)),
        Err(KeyManagerError::NotFound(_))
    ));
    assert!(rig.detected_names().is_empty());
}

// ============================================================================
// Scan Mode Scenarios
// ============================================================================

#[test]
fn burst_from_idle_returns_to_periodic() {
    let t0 = Instant::now();
    let mut rig = Rig::with_defaults(t0);
    assert_eq!(rig.manager.scan_mode(), ScanMode::Idle);

    rig.manager.start_scan_burst(secs(30), t0).unwrap();
    assert_eq!(rig.manager.scan_mode(), ScanMode::Burst);

    rig.manager.tick(t0 + secs(29));
    assert_eq!(rig.manager.scan_mode(), ScanMode::Burst);
    rig.manager.tick(t0 + secs(30));
    assert_eq!(rig.manager.scan_mode(), ScanMode::Periodic);
    assert!(!rig.radio.is_scanning());
}

#[test]
fn burst_without_interval_returns_to_idle() {
    let t0 = Instant::now();
    let config = KeyManagerConfig {
        scan_interval_ms: 0,
        scan_duration_ms: 0,
        ..KeyManagerConfig::default()
    };
    let mut rig = Rig::new(config, Box::new(MemoryPersistence::new()), t0);

    rig.manager.start_scan_burst(secs(30), t0).unwrap();
    rig.manager.tick(t0 + secs(30));
    assert_eq!(rig.manager.scan_mode(), ScanMode::Idle);

    rig.manager.tick(t0 + secs(3600));
    assert_eq!(rig.manager.scan_mode(), ScanMode::Idle);
    assert_eq!(rig.radio.scan_starts(), 1);
}

#[test]
fn burst_during_periodic_resumes_without_skipping_intervals() {
    let t0 = Instant::now();
    let mut rig = Rig::with_defaults(t0);
    rig.manager.tick(t0 + secs(60));
    rig.manager.tick(t0 + secs(65));
    assert_eq!(rig.manager.scan_mode(), ScanMode::Periodic);

    rig.manager.start_scan_burst(secs(30), t0 + secs(70)).unwrap();
    rig.manager.tick(t0 + secs(100));
    assert_eq!(rig.manager.scan_mode(), ScanMode::Periodic);

    // 50s were left on the schedule when the burst began.
    let starts = rig.radio.scan_starts();
    rig.manager.tick(t0 + secs(149));
    assert_eq!(rig.radio.scan_starts(), starts);
    rig.manager.tick(t0 + secs(150));
    assert_eq!(rig.radio.scan_starts(), starts + 1);
}

#[test]
fn frame_heard_in_window_counts_when_drained_after_close() {
    let t0 = Instant::now();
    let mut rig = Rig::with_defaults(t0);
    rig.manager.add_credential("A", A, false).unwrap();
    rig.manager.start_scan_burst(secs(30), t0).unwrap();
    rig.drain(t0);

    assert!(rig.hear(A, t0 + secs(29)));
    rig.manager.tick(t0 + secs(30));
    assert!(!rig.radio.is_scanning());
    rig.drain(t0 + secs(30));

    let detections = rig.detections.lock().unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].session, 1);
}

#[test]
fn frames_heard_outside_windows_are_discarded() {
    let t0 = Instant::now();
    let mut rig = Rig::with_defaults(t0);
    rig.manager.add_credential("A", A, false).unwrap();

    rig.manager.start_scan_burst(secs(5), t0).unwrap();
    rig.drain(t0);
    rig.manager.tick(t0 + secs(5));

    // Heard after the window closed, e.g. before the radio processed the stop.
    rig.manager.handle_radio_event(
        RadioEvent::Advertisement(Advertisement::new(A.parse().unwrap(), t0 + secs(6))),
        t0 + secs(6),
    );
    assert!(rig.detected_names().is_empty());
}

#[test]
fn late_frame_is_credited_to_its_own_session() {
    let t0 = Instant::now();
    let mut rig = Rig::with_defaults(t0);
    rig.manager.add_credential("A", A, false).unwrap();

    rig.manager.tick(t0 + secs(60));
    assert!(rig.hear(A, t0 + secs(64)));
    rig.manager.tick(t0 + secs(65));
    rig.manager.start_scan_burst(secs(30), t0 + secs(70)).unwrap();
    rig.drain(t0 + secs(70));
    rig.advertise(A, t0 + secs(71));

    let sessions: Vec<u64> = rig
        .detections
        .lock()
        .unwrap()
        .iter()
        .map(|event| event.session)
        .collect();
    assert_eq!(sessions, vec![1, 2]);
}

#[test]
fn scan_failure_survives_a_flooded_queue() {
    let t0 = Instant::now();
    let config = KeyManagerConfig {
        event_queue_capacity: 4,
        ..KeyManagerConfig::default()
    };
    let mut rig = Rig::new(config, Box::new(MemoryPersistence::new()), t0);
    rig.manager.add_credential("A", A, false).unwrap();
    rig.manager.start_scan_burst(secs(30), t0).unwrap();

    for i in 0..10 {
        rig.hear("11:22:33:44:55:66", t0 + Duration::from_millis(i));
    }
    assert!(rig.sender.dropped() > 0);
    assert!(rig.sender.send(RadioEvent::ScanFailed("adapter reset".into())));

    rig.drain(t0 + secs(1));
    assert_eq!(rig.manager.scan_mode(), ScanMode::Idle);
    assert!(!rig.manager.status(t0 + secs(1)).radio_active);
}

// ============================================================================
// Persistence Scenarios
// ============================================================================

#[test]
fn credentials_survive_restart() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("credentials.json");
    let t0 = Instant::now();

    {
        let mut rig = Rig::new(
            KeyManagerConfig::default(),
            Box::new(JsonFilePersistence::new(&path)),
            t0,
        );
        rig.manager.add_credential("Front door", A, false).unwrap();
        rig.manager
            .add_credential("Garage", "11:22:33:44:55:66", true)
            .unwrap();
        rig.manager
            .set_credential_enabled("11:22:33:44:55:66", false)
            .unwrap();
    }

    let rig = Rig::new(
        KeyManagerConfig::default(),
        Box::new(JsonFilePersistence::new(&path)),
        t0,
    );
    assert_eq!(rig.manager.list_names(), vec!["Front door", "Garage"]);
    let garage = &rig.manager.credentials(t0)[1];
    assert!(!garage.enabled);
    assert!(garage.require_confirmation);
}

#[test]
fn restore_disabled_starts_empty() {
    let t0 = Instant::now();
    let persistence = MemoryPersistence::new();
    {
        let mut rig = Rig::new(KeyManagerConfig::default(), Box::new(persistence.clone()), t0);
        rig.manager.add_credential("A", A, false).unwrap();
    }

    let config = KeyManagerConfig {
        restore_from_flash: false,
        ..KeyManagerConfig::default()
    };
    let rig = Rig::new(config, Box::new(persistence), t0);
    assert_eq!(rig.manager.count(), 0);
}

#[test]
fn failing_listener_does_not_block_others() {
    let t0 = Instant::now();
    let mut rig = Rig::with_defaults(t0);
    rig.manager
        .on_detection(Box::new(|_: &DetectionEvent| -> anyhow::Result<()> {
            anyhow::bail!("door relay offline")
        }));
    let late = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&late);
    rig.manager.on_detection(Box::new(move |_: &DetectionEvent| {
        *counter.lock().unwrap() += 1;
        Ok(())
    }));

    rig.manager.add_credential("A", A, false).unwrap();
    rig.manager.start_scan_burst(secs(30), t0).unwrap();
    rig.advertise(A, t0 + secs(1));

    assert_eq!(rig.detected_names(), vec!["A"]);
    assert_eq!(*late.lock().unwrap(), 1);
    assert_eq!(rig.manager.status(t0 + secs(1)).listener_failures, 1);
}
