//! Device identity derived from the BLE hardware address.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Stable identity of a tag, derived from its Bluetooth hardware address.
///
/// The identity keys a tag across its entire observed lifetime: it survives
/// disconnects and reconnections, and a tag that is lost and rediscovered
/// gets the same identity. Addresses are normalized to uppercase
/// colon-separated form so that `aa:bb:...` and `AA:BB:...` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Create an identity from a hardware address string.
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(address.as_ref().trim().to_uppercase())
    }

    /// The normalized address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceIdentity {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}
