//! The credential allow-list.
//!
//! [`CredentialStore`] owns every [`Credential`] keyed by address. Each
//! structural mutation (add, remove, enable/disable, clear) writes the whole
//! list through the configured [`CredentialPersistence`]. A failed write is
//! logged and reported as [`SaveOutcome::Failed`], but the in-memory change is
//! kept: memory is authoritative for the session and the next successful
//! mutation persists everything again.

use std::collections::HashMap;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::address::MacAddress;
use crate::credential::Credential;
use crate::error::{KeyManagerError, Result};
use crate::persistence::CredentialPersistence;

/// Result of persisting a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The full credential list was written.
    Saved,
    /// The write failed; the in-memory mutation still applies.
    Failed {
        /// Why the write failed.
        reason: String,
    },
}

impl SaveOutcome {
    /// Returns `true` if the mutation reached storage.
    #[must_use]
    pub const fn is_saved(&self) -> bool {
        matches!(self, Self::Saved)
    }
}

/// A credential as published to telemetry (`registered_keys`).
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CredentialSummary {
    /// Credential label.
    #[schema(example = "Front door fob")]
    pub name: String,
    /// Address in `AA:BB:CC:DD:EE:FF` form.
    #[schema(example = "AA:BB:CC:DD:EE:FF")]
    pub mac_address: String,
    /// Whether the credential can match.
    pub enabled: bool,
    /// Whether detections need confirmation.
    pub require_confirmation: bool,
    /// Seconds since the last reported detection, if any.
    pub last_seen_secs_ago: Option<u64>,
}

/// Address-keyed credential store with write-through persistence.
pub struct CredentialStore {
    credentials: HashMap<MacAddress, Credential>,
    persistence: Box<dyn CredentialPersistence>,
    persistence_failures: u64,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("count", &self.credentials.len())
            .field("persistence_failures", &self.persistence_failures)
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    /// Open a store, optionally restoring the persisted credential list.
    ///
    /// A load failure or corrupt data yields an empty store; it never fails.
    pub fn open(persistence: Box<dyn CredentialPersistence>, restore: bool) -> Self {
        let mut store = Self {
            credentials: HashMap::new(),
            persistence,
            persistence_failures: 0,
        };

        if !restore {
            debug!("Credential restore disabled, starting with an empty store");
            return store;
        }

        match store.persistence.load() {
            Ok(loaded) => {
                for credential in loaded {
                    let address = credential.address;
                    if store.credentials.contains_key(&address) {
                        warn!(
                            %address,
                            "Duplicate credential in persisted data, keeping the first"
                        );
                        continue;
                    }
                    store.credentials.insert(address, credential);
                }
                info!(count = store.credentials.len(), "Credentials restored");
            }
            Err(e) => {
                warn!(error = %e, "Failed to load credentials, starting with an empty store");
            }
        }

        store
    }

    /// Register a new enabled credential.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::DuplicateAddress`] if the address is taken.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        address: MacAddress,
        require_confirmation: bool,
    ) -> Result<SaveOutcome> {
        if self.credentials.contains_key(&address) {
            return Err(KeyManagerError::DuplicateAddress(address));
        }

        let credential = Credential::new(name, address, require_confirmation);
        info!(name = %credential.name, %address, require_confirmation, "Credential added");
        self.credentials.insert(address, credential);
        Ok(self.persist())
    }

    /// Delete a credential.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::NotFound`] if the address is not registered.
    pub fn remove(&mut self, address: &MacAddress) -> Result<SaveOutcome> {
        let removed = self
            .credentials
            .remove(address)
            .ok_or(KeyManagerError::NotFound(*address))?;
        info!(name = %removed.name, %address, "Credential removed");
        Ok(self.persist())
    }

    /// Enable or disable a credential. Setting the current value again is a
    /// successful no-op.
    ///
    /// # Errors
    ///
    /// Returns [`KeyManagerError::NotFound`] if the address is not registered.
    pub fn set_enabled(&mut self, address: &MacAddress, enabled: bool) -> Result<SaveOutcome> {
        let credential = self
            .credentials
            .get_mut(address)
            .ok_or(KeyManagerError::NotFound(*address))?;

        if credential.enabled == enabled {
            debug!(%address, enabled, "Credential already in requested state");
            return Ok(SaveOutcome::Saved);
        }

        credential.enabled = enabled;
        info!(name = %credential.name, %address, enabled, "Credential status changed");
        Ok(self.persist())
    }

    /// Remove every credential.
    pub fn clear(&mut self) -> SaveOutcome {
        info!(count = self.credentials.len(), "Clearing all credentials");
        self.credentials.clear();
        self.persist()
    }

    /// Record a reported detection. Not a structural change, so nothing is persisted.
    pub fn mark_seen(&mut self, address: &MacAddress, at: Instant) {
        if let Some(credential) = self.credentials.get_mut(address) {
            credential.last_seen = Some(at);
        }
    }

    /// Look up a credential by exact address.
    #[must_use]
    pub fn lookup(&self, address: &MacAddress) -> Option<&Credential> {
        self.credentials.get(address)
    }

    /// Number of stored credentials.
    #[must_use]
    pub fn count(&self) -> usize {
        self.credentials.len()
    }

    /// Credential names, ordered by name then address.
    #[must_use]
    pub fn list_names(&self) -> Vec<String> {
        self.credentials().into_iter().map(|c| c.name).collect()
    }

    /// Snapshot of all credentials, ordered by name then address.
    #[must_use]
    pub fn credentials(&self) -> Vec<Credential> {
        let mut all: Vec<Credential> = self.credentials.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then(a.address.cmp(&b.address)));
        all
    }

    /// Telemetry projection of every credential.
    #[must_use]
    pub fn summaries(&self, now: Instant) -> Vec<CredentialSummary> {
        self.credentials()
            .into_iter()
            .map(|c| CredentialSummary {
                mac_address: c.address.to_string(),
                last_seen_secs_ago: c
                    .last_seen
                    .map(|seen| now.saturating_duration_since(seen).as_secs()),
                name: c.name,
                enabled: c.enabled,
                require_confirmation: c.require_confirmation,
            })
            .collect()
    }

    /// The `registered_keys` telemetry document: a JSON array of summaries.
    #[must_use]
    pub fn registered_keys_json(&self, now: Instant) -> String {
        serde_json::to_string(&self.summaries(now)).unwrap_or_else(|_| "[]".to_string())
    }

    /// How many writes have failed since the store was opened.
    #[must_use]
    pub const fn persistence_failures(&self) -> u64 {
        self.persistence_failures
    }

    fn persist(&mut self) -> SaveOutcome {
        let snapshot = self.credentials();
        match self.persistence.save(&snapshot) {
            Ok(()) => SaveOutcome::Saved,
            Err(e) => {
                self.persistence_failures += 1;
                warn!(error = %e, "Failed to persist credentials, keeping in-memory state");
                SaveOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;

    fn addr(last: u8) -> MacAddress {
        MacAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, last])
    }

    fn empty_store() -> (CredentialStore, MemoryPersistence) {
        let persistence = MemoryPersistence::new();
        let store = CredentialStore::open(Box::new(persistence.clone()), true);
        (store, persistence)
    }

    #[test]
    fn test_add_then_lookup_is_enabled() {
        let (mut store, persistence) = empty_store();
        assert!(store.add("Front door", addr(1), false).unwrap().is_saved());

        let credential = store.lookup(&addr(1)).unwrap();
        assert_eq!(credential.name, "Front door");
        assert!(credential.enabled);
        assert!(!credential.require_confirmation);
        assert_eq!(persistence.stored().len(), 1);
    }

    #[test]
    fn test_duplicate_address_is_rejected() {
        let (mut store, persistence) = empty_store();
        store.add("A", addr(1), false).unwrap();

        let err = store.add("B", addr(1), true).unwrap_err();
        assert!(matches!(err, KeyManagerError::DuplicateAddress(a) if a == addr(1)));
        assert_eq!(store.count(), 1);
        assert_eq!(store.lookup(&addr(1)).unwrap().name, "A");
        assert_eq!(persistence.save_count(), 1);
    }

    #[test]
    fn test_remove_missing_leaves_store_unchanged() {
        let (mut store, persistence) = empty_store();
        store.add("A", addr(1), false).unwrap();
        let before = store.credentials();

        let err = store.remove(&addr(2)).unwrap_err();
        assert!(matches!(err, KeyManagerError::NotFound(_)));
        assert_eq!(store.credentials(), before);
        assert_eq!(persistence.save_count(), 1);
    }

    #[test]
    fn test_remove_persists() {
        let (mut store, persistence) = empty_store();
        store.add("A", addr(1), false).unwrap();
        store.remove(&addr(1)).unwrap();

        assert_eq!(store.count(), 0);
        assert!(persistence.stored().is_empty());
    }

    #[test]
    fn test_set_enabled_is_idempotent() {
        let (mut store, persistence) = empty_store();
        store.add("A", addr(1), false).unwrap();

        store.set_enabled(&addr(1), false).unwrap();
        assert!(!store.lookup(&addr(1)).unwrap().enabled);
        let saves = persistence.save_count();

        assert!(store.set_enabled(&addr(1), false).unwrap().is_saved());
        assert_eq!(persistence.save_count(), saves);

        assert!(matches!(
            store.set_enabled(&addr(9), true),
            Err(KeyManagerError::NotFound(_))
        ));
    }

    #[test]
    fn test_persistence_failure_keeps_memory_state() {
        let (mut store, persistence) = empty_store();
        persistence.set_fail_saves(true);

        let outcome = store.add("A", addr(1), false).unwrap();
        assert!(matches!(outcome, SaveOutcome::Failed { .. }));
        assert_eq!(store.count(), 1);
        assert_eq!(store.persistence_failures(), 1);

        // The next successful mutation writes everything, including the earlier add.
        persistence.set_fail_saves(false);
        store.add("B", addr(2), false).unwrap();
        assert_eq!(persistence.stored().len(), 2);
    }

    #[test]
    fn test_open_restores_and_drops_duplicates() {
        let persistence = MemoryPersistence::with_credentials(vec![
            Credential::new("First", addr(1), false),
            Credential::new("Second", addr(1), true),
            Credential::new("Other", addr(2), false),
        ]);

        let store = CredentialStore::open(Box::new(persistence), true);
        assert_eq!(store.count(), 2);
        assert_eq!(store.lookup(&addr(1)).unwrap().name, "First");
    }

    #[test]
    fn test_open_without_restore_or_with_failed_load_is_empty() {
        let persistence =
            MemoryPersistence::with_credentials(vec![Credential::new("A", addr(1), false)]);
        let store = CredentialStore::open(Box::new(persistence.clone()), false);
        assert_eq!(store.count(), 0);

        persistence.set_fail_loads(true);
        let store = CredentialStore::open(Box::new(persistence), true);
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_list_names_is_ordered() {
        let (mut store, _) = empty_store();
        store.add("Garage", addr(3), false).unwrap();
        store.add("Car", addr(2), false).unwrap();
        store.add("Car", addr(1), false).unwrap();

        assert_eq!(store.list_names(), vec!["Car", "Car", "Garage"]);
        assert_eq!(store.credentials()[0].address, addr(1));
    }

    #[test]
    fn test_clear_and_mark_seen() {
        let (mut store, persistence) = empty_store();
        store.add("A", addr(1), false).unwrap();

        let now = Instant::now();
        store.mark_seen(&addr(1), now);
        assert_eq!(store.lookup(&addr(1)).unwrap().last_seen, Some(now));
        assert_eq!(persistence.save_count(), 1);

        let json = store.registered_keys_json(now);
        assert!(json.contains("\"mac_address\":\"AA:BB:CC:DD:EE:01\""));
        assert!(json.contains("\"last_seen_secs_ago\":0"));

        assert!(store.clear().is_saved());
        assert_eq!(store.count(), 0);
        assert!(persistence.stored().is_empty());
    }

    #[test]
    fn test_uniqueness_holds_across_mixed_operations() {
        let (mut store, _) = empty_store();
        let ops: [(u8, u8); 10] = [
            (0, 1),
            (0, 1),
            (1, 1),
            (0, 2),
            (2, 2),
            (0, 1),
            (1, 3),
            (0, 3),
            (0, 2),
            (1, 2),
        ];
        for (op, last) in ops {
            let _ = match op {
                0 => store.add("x", addr(last), false),
                1 => store.remove(&addr(last)),
                _ => store.set_enabled(&addr(last), false),
            };
            let mut addresses: Vec<_> = store.credentials().iter().map(|c| c.address).collect();
            let total = addresses.len();
            addresses.dedup();
            assert_eq!(addresses.len(), total);
            assert_eq!(total, store.count());
        }
    }
}
