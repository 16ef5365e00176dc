//! Durable storage for the credential list.
//!
//! The store calls [`CredentialPersistence::load`] once at startup and
//! [`CredentialPersistence::save`] with the full credential list after every
//! structural mutation. Adapters own write atomicity; the store never retries.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::credential::Credential;

/// Current on-disk schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors raised by persistence adapters.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Failed to read the credential file.
    #[error("Failed to read {}: {source}", path.display())]
    ReadError {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write the credential file.
    #[error("Failed to write {}: {source}", path.display())]
    WriteError {
        /// File that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The credential file exists but is not valid.
    #[error("Failed to parse {}: {message}", path.display())]
    Corrupt {
        /// File that could not be parsed.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// The credential list could not be serialized.
    #[error("Failed to serialize credentials: {0}")]
    SerializeError(#[from] serde_json::Error),

    /// The storage backend is unavailable.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Result type for persistence adapters.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Load/save contract between the credential store and non-volatile storage.
pub trait CredentialPersistence: Send {
    /// Load every persisted credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be read or its contents are
    /// corrupt. The store treats any error as an empty credential list.
    fn load(&self) -> PersistenceResult<Vec<Credential>>;

    /// Replace the persisted credential list.
    ///
    /// # Errors
    ///
    /// Returns an error if the list could not be durably written.
    fn save(&self, credentials: &[Credential]) -> PersistenceResult<()>;
}

/// On-disk document layout.
#[derive(Debug, Serialize, Deserialize)]
struct CredentialFile {
    version: u32,
    credentials: Vec<Credential>,
}

/// Stores credentials as a pretty-printed JSON document.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    /// Create an adapter writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the credential file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CredentialPersistence for JsonFilePersistence {
    fn load(&self) -> PersistenceResult<Vec<Credential>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content =
            std::fs::read_to_string(&self.path).map_err(|source| PersistenceError::ReadError {
                path: self.path.clone(),
                source,
            })?;

        let file: CredentialFile =
            serde_json::from_str(&content).map_err(|e| PersistenceError::Corrupt {
                path: self.path.clone(),
                message: e.to_string(),
            })?;

        if file.version != SCHEMA_VERSION {
            return Err(PersistenceError::Corrupt {
                path: self.path.clone(),
                message: format!(
                    "unsupported schema version {}, expected {SCHEMA_VERSION}",
                    file.version
                ),
            });
        }

        Ok(file.credentials)
    }

    fn save(&self, credentials: &[Credential]) -> PersistenceResult<()> {
        let write_err = |source| PersistenceError::WriteError {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(write_err)?;
            }
        }

        let document = CredentialFile {
            version: SCHEMA_VERSION,
            credentials: credentials.to_vec(),
        };
        let content = serde_json::to_string_pretty(&document)?;

        // Write-then-rename so a crash never leaves a half-written file behind.
        let tmp = self.temp_path();
        std::fs::write(&tmp, content).map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)?;

        tracing::debug!(
            path = %self.path.display(),
            count = credentials.len(),
            "Credentials saved"
        );
        Ok(())
    }
}

/// Returns the default location of the credential file.
///
/// On Linux: `/var/lib/blekey/credentials.json`
/// Elsewhere: the platform data directory for `blekey`.
#[must_use]
pub fn default_credentials_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/lib/blekey/credentials.json")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "blekey").map_or_else(
            || PathBuf::from("./credentials.json"),
            |dirs| dirs.data_dir().join("credentials.json"),
        )
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    credentials: Vec<Credential>,
    fail_saves: bool,
    fail_loads: bool,
    saves: usize,
}

/// In-memory adapter. Clones share the same backing state, so a test can keep
/// a handle and inspect what the store wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryPersistence {
    /// Create an empty in-memory adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an adapter pre-loaded with `credentials`.
    #[must_use]
    pub fn with_credentials(credentials: Vec<Credential>) -> Self {
        let persistence = Self::new();
        persistence.lock().credentials = credentials;
        persistence
    }

    /// Make subsequent saves fail (or succeed again).
    pub fn set_fail_saves(&self, fail: bool) {
        self.lock().fail_saves = fail;
    }

    /// Make subsequent loads fail (or succeed again).
    pub fn set_fail_loads(&self, fail: bool) {
        self.lock().fail_loads = fail;
    }

    /// Snapshot of what was last saved.
    #[must_use]
    pub fn stored(&self) -> Vec<Credential> {
        self.lock().credentials.clone()
    }

    /// Number of successful saves.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.lock().saves
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        // A poisoned lock only means a test panicked mid-save; the data is still usable.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl CredentialPersistence for MemoryPersistence {
    fn load(&self) -> PersistenceResult<Vec<Credential>> {
        let inner = self.lock();
        if inner.fail_loads {
            return Err(PersistenceError::Unavailable("memory load disabled".into()));
        }
        Ok(inner.credentials.clone())
    }

    fn save(&self, credentials: &[Credential]) -> PersistenceResult<()> {
        let mut inner = self.lock();
        if inner.fail_saves {
            return Err(PersistenceError::Unavailable("memory save disabled".into()));
        }
        inner.credentials = credentials.to_vec();
        inner.saves += 1;
        Ok(())
    }
}
