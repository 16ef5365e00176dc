//! Detection listeners.
//!
//! Listeners are called synchronously, in registration order, once per
//! detection event. A listener that returns an error or panics is logged and
//! skipped; the remaining listeners still receive the event.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::warn;

use crate::detection::DetectionEvent;

/// Callback invoked for each detection event.
pub type Listener = Box<dyn Fn(&DetectionEvent) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by [`Dispatcher::register`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Outcome of delivering one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Listeners that handled the event.
    pub delivered: usize,
    /// Listeners that returned an error or panicked.
    pub failed: usize,
}

/// Ordered list of detection listeners.
#[derive(Default)]
pub struct Dispatcher {
    listeners: Vec<(ListenerId, Listener)>,
    next_id: u64,
    failures: u64,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("listeners", &self.listeners.len())
            .field("failures", &self.failures)
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener.
    pub fn register(&mut self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unregister(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether no listeners are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Total listener failures since creation.
    #[must_use]
    pub const fn failures(&self) -> u64 {
        self.failures
    }

    /// Deliver `event` to every listener in order.
    pub fn dispatch(&mut self, event: &DetectionEvent) -> DispatchReport {
        let mut report = DispatchReport::default();

        for (id, listener) in &self.listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(
                        listener = ?id,
                        name = %event.name,
                        error = %e,
                        "Detection listener failed"
                    );
                }
                Err(_) => {
                    report.failed += 1;
                    warn!(listener = ?id, name = %event.name, "Detection listener panicked");
                }
            }
        }

        self.failures += report.failed as u64;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::MacAddress;
    use chrono::Utc;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn event(name: &str) -> DetectionEvent {
        DetectionEvent {
            address: MacAddress::new([1, 2, 3, 4, 5, 6]),
            name: name.to_string(),
            session: 1,
            confirmed: false,
            detected_at: Instant::now(),
            detected_at_utc: Utc::now(),
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Listener {
        let log = Arc::clone(log);
        Box::new(move |event: &DetectionEvent| {
            log.lock().unwrap().push(format!("{tag}:{}", event.name));
            Ok(())
        })
    }

    #[test]
    fn test_listeners_called_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(recorder(&log, "first"));
        dispatcher.register(recorder(&log, "second"));

        let report = dispatcher.dispatch(&event("A"));
        dispatcher.dispatch(&event("B"));

        assert_eq!(report.delivered, 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:A", "second:A", "first:B", "second:B"]
        );
    }

    #[test]
    fn test_failing_listeners_are_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(Box::new(|_: &DetectionEvent| -> anyhow::Result<()> {
            anyhow::bail!("relay offline")
        }));
        dispatcher.register(Box::new(|_: &DetectionEvent| -> anyhow::Result<()> {
            panic!("listener bug")
        }));
        dispatcher.register(recorder(&log, "last"));

        let report = dispatcher.dispatch(&event("A"));

        assert_eq!(report, DispatchReport { delivered: 1, failed: 2 });
        assert_eq!(dispatcher.failures(), 2);
        assert_eq!(*log.lock().unwrap(), vec!["last:A"]);
    }

    #[test]
    fn test_unregister() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();
        let id = dispatcher.register(recorder(&log, "gone"));
        dispatcher.register(recorder(&log, "kept"));

        assert!(dispatcher.unregister(id));
        assert!(!dispatcher.unregister(id));
        assert_eq!(dispatcher.len(), 1);

        dispatcher.dispatch(&event("A"));
        assert_eq!(*log.lock().unwrap(), vec!["kept:A"]);
    }
}
