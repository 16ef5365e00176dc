//! Boundary with the BLE scanning subsystem.
//!
//! The radio runs in its own context (a BlueZ discovery task, or an interrupt
//! on embedded targets). It never touches manager state directly: everything
//! it observes is pushed through [`RadioEventSender`] and drained by the
//! manager's scheduler loop. Scan start/stop requests are
//! fire-and-forget; the radio confirms them later with
//! [`RadioEvent::ScanStarted`] / [`RadioEvent::ScanStopped`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::warn;

use crate::address::MacAddress;

/// Errors returned by a radio for start/stop requests.
#[derive(Debug, Clone, Error)]
pub enum RadioError {
    /// No usable adapter (missing, powered off, or the stack is down).
    #[error("Bluetooth adapter unavailable: {0}")]
    Unavailable(String),

    /// The adapter refused the request.
    #[error("Scan request rejected: {0}")]
    Rejected(String),
}

/// A single observed advertisement frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Address of the advertiser.
    pub address: MacAddress,
    /// Raw advertisement payload. Opaque to the core.
    pub payload: Vec<u8>,
    /// Received signal strength, if reported.
    pub rssi: Option<i16>,
    /// When the frame was received.
    pub received_at: Instant,
}

impl Advertisement {
    /// An advertisement with no payload, received at `received_at`.
    #[must_use]
    pub const fn new(address: MacAddress, received_at: Instant) -> Self {
        Self {
            address,
            payload: Vec::new(),
            rssi: None,
            received_at,
        }
    }
}

/// Events delivered by the radio context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// An advertisement was observed.
    Advertisement(Advertisement),
    /// The radio confirmed that scanning started.
    ScanStarted,
    /// The radio confirmed that scanning stopped.
    ScanStopped,
    /// Scanning failed asynchronously after being accepted.
    ScanFailed(String),
}

/// Commands the scan controller issues to the radio.
pub trait Radio: Send {
    /// Begin scanning for `duration`. Returns once the request is submitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the radio cannot accept the request.
    fn start_scan(&mut self, duration: Duration) -> Result<(), RadioError>;

    /// Stop scanning. Returns once the request is submitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the radio cannot accept the request.
    fn stop_scan(&mut self) -> Result<(), RadioError>;
}

/// Create the queue between the radio context and the manager.
///
/// Advertisements go through a bounded channel of `capacity` frames and are
/// shed when it is full. Lifecycle events (`ScanStarted`, `ScanStopped`,
/// `ScanFailed`) use a separate channel and are never dropped; at most a few
/// are produced per radio command.
#[must_use]
pub fn event_queue(capacity: usize) -> (RadioEventSender, RadioEventReceiver) {
    let (advertisement_tx, advertisement_rx) = mpsc::channel(capacity.max(1));
    let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel();
    (
        RadioEventSender {
            advertisements: advertisement_tx,
            lifecycle: lifecycle_tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        RadioEventReceiver {
            advertisements: advertisement_rx,
            lifecycle: lifecycle_rx,
        },
    )
}

/// Radio-side handle of the event queue. Never blocks.
#[derive(Debug, Clone)]
pub struct RadioEventSender {
    advertisements: mpsc::Sender<Advertisement>,
    lifecycle: mpsc::UnboundedSender<RadioEvent>,
    dropped: Arc<AtomicU64>,
}

impl RadioEventSender {
    /// Enqueue an event. Returns `false` if it was dropped: an advertisement
    /// arriving at a full queue, or any event after the manager is gone.
    pub fn send(&self, event: RadioEvent) -> bool {
        let advertisement = match event {
            RadioEvent::Advertisement(advertisement) => advertisement,
            lifecycle => return self.lifecycle.send(lifecycle).is_ok(),
        };
        match self.advertisements.try_send(advertisement) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(advertisement)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    address = %advertisement.address,
                    dropped,
                    "Radio event queue full, dropping advertisement"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Advertisements dropped because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Manager-side handle of the event queue.
///
/// Lifecycle events are yielded ahead of queued advertisements.
#[derive(Debug)]
pub struct RadioEventReceiver {
    advertisements: mpsc::Receiver<Advertisement>,
    lifecycle: mpsc::UnboundedReceiver<RadioEvent>,
}

impl RadioEventReceiver {
    /// Wait for the next event. Returns `None` once every sender is gone and
    /// both channels are drained.
    pub async fn recv(&mut self) -> Option<RadioEvent> {
        tokio::select! {
            biased;
            Some(event) = self.lifecycle.recv() => Some(event),
            Some(advertisement) = self.advertisements.recv() => {
                Some(RadioEvent::Advertisement(advertisement))
            }
            else => None,
        }
    }

    /// Take the next event without waiting.
    pub fn try_recv(&mut self) -> Option<RadioEvent> {
        self.lifecycle.try_recv().ok().or_else(|| {
            self.advertisements
                .try_recv()
                .ok()
                .map(RadioEvent::Advertisement)
        })
    }
}

#[derive(Debug)]
struct SimulatedInner {
    events: RadioEventSender,
    scanning: AtomicBool,
    unavailable: AtomicBool,
    starts: AtomicU64,
}

/// In-process radio that acknowledges every command and lets callers inject
/// advertisements. Clones share state.
#[derive(Debug, Clone)]
pub struct SimulatedRadio {
    inner: Arc<SimulatedInner>,
}

impl SimulatedRadio {
    /// Create a simulated radio reporting into `events`.
    #[must_use]
    pub fn new(events: RadioEventSender) -> Self {
        Self {
            inner: Arc::new(SimulatedInner {
                events,
                scanning: AtomicBool::new(false),
                unavailable: AtomicBool::new(false),
                starts: AtomicU64::new(0),
            }),
        }
    }

    /// Make the radio reject (or accept again) start/stop requests.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Whether the radio is currently scanning.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.inner.scanning.load(Ordering::SeqCst)
    }

    /// Number of accepted scan starts.
    #[must_use]
    pub fn scan_starts(&self) -> u64 {
        self.inner.starts.load(Ordering::SeqCst)
    }

    /// Deliver an advertisement as if received over the air now. Frames are
    /// only heard while scanning; returns `false` if the frame was not
    /// delivered.
    pub fn advertise(&self, address: MacAddress, payload: Vec<u8>) -> bool {
        self.advertise_at(address, payload, Instant::now())
    }

    /// Like [`SimulatedRadio::advertise`], stamped with `received_at`.
    pub fn advertise_at(
        &self,
        address: MacAddress,
        payload: Vec<u8>,
        received_at: Instant,
    ) -> bool {
        if !self.is_scanning() {
            return false;
        }
        self.inner
            .events
            .send(RadioEvent::Advertisement(Advertisement {
                address,
                payload,
                rssi: None,
                received_at,
            }))
    }

    fn check_available(&self) -> Result<(), RadioError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(RadioError::Unavailable("simulated radio disabled".into()));
        }
        Ok(())
    }
}

impl Radio for SimulatedRadio {
    fn start_scan(&mut self, _duration: Duration) -> Result<(), RadioError> {
        self.check_available()?;
        self.inner.scanning.store(true, Ordering::SeqCst);
        self.inner.starts.fetch_add(1, Ordering::SeqCst);
        self.inner.events.send(RadioEvent::ScanStarted);
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), RadioError> {
        self.check_available()?;
        self.inner.scanning.store(false, Ordering::SeqCst);
        self.inner.events.send(RadioEvent::ScanStopped);
        Ok(())
    }
}

#[cfg(feature = "bluetooth")]
pub use bluez::BluerRadio;

#[cfg(feature = "bluetooth")]
mod bluez {
    use std::time::Duration;

    use bluer::{Adapter, AdapterEvent, Session};
    use futures::{pin_mut, StreamExt};
    use tokio::task::JoinHandle;
    use tokio::time::Instant;
    use tracing::{debug, info};

    use super::{Advertisement, Radio, RadioError, RadioEvent, RadioEventSender};
    use crate::address::MacAddress;

    /// Radio backed by BlueZ discovery.
    ///
    /// Each scan window runs a discovery task that forwards every device
    /// announcement (and re-announcement on property changes) as an
    /// [`Advertisement`] until the window closes or `stop_scan` aborts it.
    pub struct BluerRadio {
        adapter: Adapter,
        events: RadioEventSender,
        task: Option<JoinHandle<()>>,
    }

    impl BluerRadio {
        /// Connect to BlueZ and power on the default adapter.
        ///
        /// # Errors
        ///
        /// Returns [`RadioError::Unavailable`] if no adapter can be used.
        pub async fn new(events: RadioEventSender) -> Result<Self, RadioError> {
            let unavailable = |e: bluer::Error| RadioError::Unavailable(e.to_string());

            let session = Session::new().await.map_err(unavailable)?;
            let adapter = session.default_adapter().await.map_err(unavailable)?;
            adapter.set_powered(true).await.map_err(unavailable)?;

            info!(adapter = adapter.name(), "Bluetooth adapter ready");
            Ok(Self {
                adapter,
                events,
                task: None,
            })
        }

        fn abort_task(&mut self) -> bool {
            self.task.take().is_some_and(|task| {
                let running = !task.is_finished();
                task.abort();
                running
            })
        }
    }

    impl Radio for BluerRadio {
        fn start_scan(&mut self, duration: Duration) -> Result<(), RadioError> {
            self.abort_task();

            let adapter = self.adapter.clone();
            let events = self.events.clone();
            self.task = Some(tokio::spawn(async move {
                let stream = match adapter.discover_devices_with_changes().await {
                    Ok(stream) => stream,
                    Err(e) => {
                        events.send(RadioEvent::ScanFailed(e.to_string()));
                        return;
                    }
                };
                pin_mut!(stream);
                events.send(RadioEvent::ScanStarted);

                let window = tokio::time::sleep(duration);
                tokio::pin!(window);

                loop {
                    tokio::select! {
                        () = &mut window => break,
                        event = stream.next() => match event {
                            Some(AdapterEvent::DeviceAdded(addr)) => {
                                let rssi = match adapter.device(addr) {
                                    Ok(device) => device.rssi().await.ok().flatten(),
                                    Err(_) => None,
                                };
                                events.send(RadioEvent::Advertisement(Advertisement {
                                    address: MacAddress::new(addr.0),
                                    payload: Vec::new(),
                                    rssi,
                                    received_at: Instant::now(),
                                }));
                            }
                            Some(_) => {}
                            None => break,
                        },
                    }
                }

                debug!("Discovery window closed");
                events.send(RadioEvent::ScanStopped);
            }));

            Ok(())
        }

        fn stop_scan(&mut self) -> Result<(), RadioError> {
            if self.abort_task() {
                self.events.send(RadioEvent::ScanStopped);
            }
            Ok(())
        }
    }
}
