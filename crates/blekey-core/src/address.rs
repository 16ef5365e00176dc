//! Bluetooth device addresses.
//!
//! Credentials are keyed by the 48-bit address a beacon advertises with.
//! Addresses are accepted in the usual `AA:BB:CC:DD:EE:FF` notation (dashes
//! are tolerated, case is ignored) and always rendered uppercase with colons.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

static MAC_ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?:[0-9A-Fa-f]{2}:){5}|(?:[0-9A-Fa-f]{2}-){5})[0-9A-Fa-f]{2}$")
        .expect("MAC address pattern is valid")
});

/// Returns `true` if `s` is a well-formed 6-byte Bluetooth address.
#[must_use]
pub fn is_valid_mac_address(s: &str) -> bool {
    MAC_ADDRESS_RE.is_match(s.trim())
}

/// The address string could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid Bluetooth address: '{0}'. Expected format XX:XX:XX:XX:XX:XX")]
pub struct InvalidMacAddress(pub String);

/// A 6-byte Bluetooth device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Creates an address from raw bytes, most significant byte first.
    #[must_use]
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Raw address bytes, most significant byte first.
    #[must_use]
    pub const fn bytes(&self) -> [u8; 6] {
        self.0
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl FromStr for MacAddress {
    type Err = InvalidMacAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if !is_valid_mac_address(trimmed) {
            return Err(InvalidMacAddress(s.to_string()));
        }

        let mut bytes = [0u8; 6];
        for (slot, part) in bytes.iter_mut().zip(trimmed.split([':', '-'])) {
            *slot = u8::from_str_radix(part, 16).map_err(|_| InvalidMacAddress(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_colon_separated() {
        let addr: MacAddress = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        assert_eq!(addr.bytes(), [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    }

    #[test]
    fn test_parse_is_case_insensitive_and_normalizes() {
        let addr: MacAddress = "aa-bb-cc-0d-ee-ff".parse().unwrap();
        assert_eq!(addr.to_string(), "AA:BB:CC:0D:EE:FF");
    }

    #[test]
    fn test_rejects_malformed_addresses() {
        for bad in [
            "",
            "AA:BB:CC:DD:EE",
            "AA:BB:CC:DD:EE:FF:00",
            "GG:BB:CC:DD:EE:FF",
            "AABBCCDDEEFF",
            "AA:BB-CC:DD:EE:FF",
        ] {
            assert!(!is_valid_mac_address(bad), "{bad} should be rejected");
            assert!(bad.parse::<MacAddress>().is_err());
        }
    }

    #[test]
    fn test_serde_uses_display_form() {
        let addr = MacAddress::new([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"01:02:03:04:05:06\"");

        let back: MacAddress = serde_json::from_str("\"01-02-03-04-05-06\"").unwrap();
        assert_eq!(back, addr);
    }
}
