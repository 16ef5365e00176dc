//! Credential records.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::address::MacAddress;

/// A beacon authorized to trigger detections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Radio address the beacon advertises with. Unique within a store.
    pub address: MacAddress,

    /// Human-readable label. Not required to be unique.
    pub name: String,

    /// Disabled credentials stay stored but never match.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Detections must be confirmed by an external signal before they are reported.
    #[serde(default)]
    pub require_confirmation: bool,

    /// Monotonic time of the most recent reported detection. Not persisted.
    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

const fn default_enabled() -> bool {
    true
}

impl Credential {
    /// Create an enabled credential that has never been seen.
    pub fn new(name: impl Into<String>, address: MacAddress, require_confirmation: bool) -> Self {
        Self {
            address,
            name: name.into(),
            enabled: true,
            require_confirmation,
            last_seen: None,
        }
    }

    /// Whether an advertisement from this credential may produce a detection.
    #[must_use]
    pub const fn can_match(&self) -> bool {
        self.enabled
    }
}
