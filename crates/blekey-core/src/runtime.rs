//! Background task that owns a [`KeyManager`].
//!
//! The task multiplexes three inputs: scheduler ticks, the bounded radio
//! event queue, and commands from any number of [`ManagerHandle`] clones.
//! Each command carries a `oneshot` channel for its reply, so callers never
//! share the manager itself.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::detection::DetectionEvent;
use crate::dispatch::{Listener, ListenerId};
use crate::error::{KeyManagerError, Result};
use crate::manager::{KeyManager, ManagerStatus};
use crate::radio::RadioEventReceiver;
use crate::scan::ScanMode;
use crate::store::{CredentialSummary, SaveOutcome};

const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Message to the manager task.
enum Message {
    Command(Command),
    Shutdown {
        reply: oneshot::Sender<KeyManager>,
    },
}

/// Command applied to the running manager.
enum Command {
    AddCredential {
        name: String,
        address: String,
        require_confirmation: bool,
        reply: oneshot::Sender<Result<SaveOutcome>>,
    },
    RemoveCredential {
        address: String,
        reply: oneshot::Sender<Result<SaveOutcome>>,
    },
    SetCredentialEnabled {
        address: String,
        enabled: bool,
        reply: oneshot::Sender<Result<SaveOutcome>>,
    },
    ClearCredentials {
        reply: oneshot::Sender<SaveOutcome>,
    },
    StartScanBurst {
        duration: Option<Duration>,
        reply: oneshot::Sender<Result<()>>,
    },
    ConfirmDetection {
        address: String,
        reply: oneshot::Sender<Result<DetectionEvent>>,
    },
    OnDetection {
        listener: Listener,
        reply: oneshot::Sender<ListenerId>,
    },
    RemoveListener {
        id: ListenerId,
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<ManagerStatus>,
    },
    Credentials {
        reply: oneshot::Sender<Vec<CredentialSummary>>,
    },
    ListNames {
        reply: oneshot::Sender<Vec<String>>,
    },
    LastDetection {
        reply: oneshot::Sender<Option<DetectionEvent>>,
    },
}

/// Start the manager task.
///
/// `radio_events` is the receiving end of [`crate::radio::event_queue`]. The
/// scan schedule advances every `tick_interval`.
pub fn spawn(
    manager: KeyManager,
    radio_events: RadioEventReceiver,
    tick_interval: Duration,
) -> ManagerHandle {
    let (message_tx, message_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    tokio::spawn(run(manager, radio_events, message_rx, tick_interval));
    ManagerHandle { message_tx }
}

async fn run(
    mut manager: KeyManager,
    mut radio_events: RadioEventReceiver,
    mut messages: mpsc::Receiver<Message>,
    tick_interval: Duration,
) {
    info!(tick_ms = tick_interval.as_millis(), "Key manager task started");

    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            message = messages.recv() => match message {
                Some(Message::Command(command)) => handle_command(&mut manager, command),
                Some(Message::Shutdown { reply }) => {
                    manager.shutdown();
                    let _ = reply.send(manager);
                    return;
                }
                None => break,
            },
            Some(event) = radio_events.recv() => {
                manager.handle_radio_event(event, Instant::now());
            }
            _ = ticker.tick() => manager.tick(Instant::now()),
        }
    }

    debug!("All manager handles dropped");
    manager.shutdown();
}

fn handle_command(manager: &mut KeyManager, command: Command) {
    let now = Instant::now();
    // A dropped reply receiver means the caller gave up waiting; the command
    // has still been applied.
    match command {
        Command::AddCredential {
            name,
            address,
            require_confirmation,
            reply,
        } => {
            let _ = reply.send(manager.add_credential(&name, &address, require_confirmation));
        }
        Command::RemoveCredential { address, reply } => {
            let _ = reply.send(manager.remove_credential(&address));
        }
        Command::SetCredentialEnabled {
            address,
            enabled,
            reply,
        } => {
            let _ = reply.send(manager.set_credential_enabled(&address, enabled));
        }
        Command::ClearCredentials { reply } => {
            let _ = reply.send(manager.clear_credentials());
        }
        Command::StartScanBurst { duration, reply } => {
            let result = match duration {
                Some(duration) => manager.start_scan_burst(duration, now),
                None => manager.start_default_burst(now),
            };
            let _ = reply.send(result);
        }
        Command::ConfirmDetection { address, reply } => {
            let _ = reply.send(manager.confirm_detection(&address, now));
        }
        Command::OnDetection { listener, reply } => {
            let _ = reply.send(manager.on_detection(listener));
        }
        Command::RemoveListener { id, reply } => {
            let _ = reply.send(manager.remove_listener(id));
        }
        Command::Status { reply } => {
            let _ = reply.send(manager.status(now));
        }
        Command::Credentials { reply } => {
            let _ = reply.send(manager.credentials(now));
        }
        Command::ListNames { reply } => {
            let _ = reply.send(manager.list_names());
        }
        Command::LastDetection { reply } => {
            let _ = reply.send(manager.last_detection().cloned());
        }
    }
}

/// Cloneable handle to a running manager task.
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    message_tx: mpsc::Sender<Message>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AddCredential { .. } => "AddCredential",
            Self::RemoveCredential { .. } => "RemoveCredential",
            Self::SetCredentialEnabled { .. } => "SetCredentialEnabled",
            Self::ClearCredentials { .. } => "ClearCredentials",
            Self::StartScanBurst { .. } => "StartScanBurst",
            Self::ConfirmDetection { .. } => "ConfirmDetection",
            Self::OnDetection { .. } => "OnDetection",
            Self::RemoveListener { .. } => "RemoveListener",
            Self::Status { .. } => "Status",
            Self::Credentials { .. } => "Credentials",
            Self::ListNames { .. } => "ListNames",
            Self::LastDetection { .. } => "LastDetection",
        };
        f.write_str(name)
    }
}

impl ManagerHandle {
    async fn send<T>(&self, message: impl FnOnce(oneshot::Sender<T>) -> Message) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.message_tx
            .send(message(reply))
            .await
            .map_err(|_| KeyManagerError::ManagerStopped)?;
        response.await.map_err(|_| KeyManagerError::ManagerStopped)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        self.send(|reply| Message::Command(command(reply))).await
    }

    /// See [`KeyManager::add_credential`].
    ///
    /// # Errors
    ///
    /// Returns the manager's error, or [`KeyManagerError::ManagerStopped`].
    pub async fn add_credential(
        &self,
        name: impl Into<String>,
        address: impl Into<String>,
        require_confirmation: bool,
    ) -> Result<SaveOutcome> {
        let (name, address) = (name.into(), address.into());
        self.request(|reply| Command::AddCredential {
            name,
            address,
            require_confirmation,
            reply,
        })
        .await?
    }

    /// See [`KeyManager::remove_credential`].
    ///
    /// # Errors
    ///
    /// Returns the manager's error, or [`KeyManagerError::ManagerStopped`].
    pub async fn remove_credential(&self, address: impl Into<String>) -> Result<SaveOutcome> {
        let address = address.into();
        self.request(|reply| Command::RemoveCredential { address, reply })
            .await?
    }

    /// See [`KeyManager::set_credential_enabled`].
    ///
    /// # Errors
    ///
    /// Returns the manager's error, or [`KeyManagerError::ManagerStopped`].
    pub async fn set_credential_enabled(
        &self,
        address: impl Into<String>,
        enabled: bool,
    ) -> Result<SaveOutcome> {
        let address = address.into();
        self.request(|reply| Command::SetCredentialEnabled {
            address,
            enabled,
            reply,
        })
        .await?
    }

    /// See [`KeyManager::clear_credentials`].
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::ManagerStopped`] if the task is gone.
    pub async fn clear_credentials(&self) -> Result<SaveOutcome> {
        self.request(|reply| Command::ClearCredentials { reply }).await
    }

    /// Start a burst; `None` uses the configured default length.
    ///
    /// # Errors
    ///
    /// Returns the manager's error, or [`KeyManagerError::ManagerStopped`].
    pub async fn start_scan_burst(&self, duration: Option<Duration>) -> Result<()> {
        self.request(|reply| Command::StartScanBurst { duration, reply })
            .await?
    }

    /// See [`KeyManager::confirm_detection`].
    ///
    /// # Errors
    ///
    /// Returns the manager's error, or [`KeyManagerError::ManagerStopped`].
    pub async fn confirm_detection(&self, address: impl Into<String>) -> Result<DetectionEvent> {
        let address = address.into();
        self.request(|reply| Command::ConfirmDetection { address, reply })
            .await?
    }

    /// See [`KeyManager::on_detection`]. The listener runs on the manager task.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::ManagerStopped`] if the task is gone.
    pub async fn on_detection(&self, listener: Listener) -> Result<ListenerId> {
        self.request(|reply| Command::OnDetection { listener, reply })
            .await
    }

    /// See [`KeyManager::remove_listener`].
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::ManagerStopped`] if the task is gone.
    pub async fn remove_listener(&self, id: ListenerId) -> Result<bool> {
        self.request(|reply| Command::RemoveListener { id, reply })
            .await
    }

    /// Telemetry snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::ManagerStopped`] if the task is gone.
    pub async fn status(&self) -> Result<ManagerStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Current scan mode.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::ManagerStopped`] if the task is gone.
    pub async fn scan_mode(&self) -> Result<ScanMode> {
        Ok(self.status().await?.scan_mode)
    }

    /// Per-credential telemetry, ordered by name then address.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::ManagerStopped`] if the task is gone.
    pub async fn credentials(&self) -> Result<Vec<CredentialSummary>> {
        self.request(|reply| Command::Credentials { reply }).await
    }

    /// Credential names, ordered by name then address.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::ManagerStopped`] if the task is gone.
    pub async fn list_names(&self) -> Result<Vec<String>> {
        self.request(|reply| Command::ListNames { reply }).await
    }

    /// Most recent detection event.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::ManagerStopped`] if the task is gone.
    pub async fn last_detection(&self) -> Result<Option<DetectionEvent>> {
        self.request(|reply| Command::LastDetection { reply }).await
    }

    /// Stop the task, halting any running scan, and take the manager back.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::ManagerStopped`] if the task already ended.
    pub async fn shutdown(&self) -> Result<KeyManager> {
        self.send(|reply| Message::Shutdown { reply }).await
    }

    /// Whether the task is still accepting commands.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.message_tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyManagerConfig;
    use crate::persistence::MemoryPersistence;
    use crate::radio::{event_queue, SimulatedRadio};

    const BADGE: &str = "AA:BB:CC:DD:EE:01";

    fn start() -> (ManagerHandle, SimulatedRadio) {
        let config = KeyManagerConfig::default();
        let (tx, rx) = event_queue(config.event_queue_capacity);
        let radio = SimulatedRadio::new(tx);
        let manager = KeyManager::new(
            config.clone(),
            Box::new(MemoryPersistence::new()),
            Box::new(radio.clone()),
            Instant::now(),
        );
        (spawn(manager, rx, config.tick_interval()), radio)
    }

    #[tokio::test]
    async fn test_handle_round_trips_commands() {
        let (handle, _radio) = start();

        handle.add_credential("Badge", BADGE, false).await.unwrap();
        assert!(matches!(
            handle.add_credential("Badge", BADGE, false).await,
            Err(KeyManagerError::DuplicateAddress(_))
        ));
        assert_eq!(handle.list_names().await.unwrap(), vec!["Badge"]);
        assert_eq!(handle.status().await.unwrap().credential_count, 1);
    }

    #[tokio::test]
    async fn test_detection_flows_through_task() {
        let (handle, radio) = start();
        let (tx, mut rx) = mpsc::unbounded_channel();

        handle.add_credential("Badge", BADGE, false).await.unwrap();
        handle
            .on_detection(Box::new(move |event: &DetectionEvent| {
                tx.send(event.name.clone())?;
                Ok(())
            }))
            .await
            .unwrap();
        handle
            .start_scan_burst(Some(Duration::from_secs(30)))
            .await
            .unwrap();

        for _ in 0..5 {
            assert!(radio.advertise(BADGE.parse().unwrap(), Vec::new()));
        }

        assert_eq!(rx.recv().await.as_deref(), Some("Badge"));
        let last = handle.last_detection().await.unwrap().unwrap();
        assert_eq!(last.name, "Badge");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_expires_on_schedule() {
        let (handle, radio) = start();
        handle.start_scan_burst(None).await.unwrap();
        assert_eq!(handle.scan_mode().await.unwrap(), ScanMode::Burst);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(handle.scan_mode().await.unwrap(), ScanMode::Periodic);
        assert!(!radio.is_scanning());
    }

    #[tokio::test]
    async fn test_shutdown_returns_manager() {
        let (handle, radio) = start();
        handle.add_credential("Badge", BADGE, false).await.unwrap();
        handle.start_scan_burst(None).await.unwrap();
        assert!(handle.is_running());

        let manager = handle.shutdown().await.unwrap();
        assert_eq!(manager.count(), 1);
        assert!(!radio.is_scanning());

        assert!(matches!(
            handle.status().await,
            Err(KeyManagerError::ManagerStopped)
        ));
        assert!(!handle.is_running());
    }
}
