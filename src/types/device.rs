//! Device identifier received in the login handshake

use serde::{Deserialize, Serialize};

/// Length of a well-formed IMEI.
pub const IMEI_LEN: usize = 15;

/// Opaque identifier naming one physical tracker (in practice its IMEI).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse identifier bytes from the wire. Only ASCII is accepted.
    pub fn from_wire(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() || !bytes.is_ascii() {
            return None;
        }
        // ASCII is always valid UTF-8
        std::str::from_utf8(bytes).ok().map(Self::new)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for exactly fifteen ASCII digits.
    pub fn is_imei(&self) -> bool {
        self.0.len() == IMEI_LEN && self.0.bytes().all(|b| b.is_ascii_digit())
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
