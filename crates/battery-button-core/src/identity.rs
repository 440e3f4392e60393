//! Device identity and per-device topic
//!
//! The identity is the hex encoding of the last three bytes of the station
//! MAC address. The vendor prefix is dropped to keep the client id and the
//! topic short. It is recomputed on every boot and never stored.

use core::fmt::{self, Write};

use heapless::String;

/// Number of characters in a device identity.
pub const IDENTITY_LEN: usize = 6;

/// Prefix of the per-device report topic.
pub const TOPIC_PREFIX: &str = "/BatteryButton/";

/// Capacity of the topic buffer: prefix plus identity, with some headroom.
pub const TOPIC_CAPACITY: usize = 24;

/// Six upper-case hex characters, e.g. `"A1B2C3"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity(String<IDENTITY_LEN>);

impl DeviceIdentity {
    /// Derive the identity from a 6-byte hardware address.
    pub fn from_mac(mac: &[u8; 6]) -> Self {
        let mut id = String::new();
        for byte in &mac[3..] {
            for nibble in [byte >> 4, byte & 0x0F] {
                // Cannot overflow: three bytes give exactly six characters
                let _ = id.push(hex_digit(nibble));
            }
        }
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const fn hex_digit(nibble: u8) -> char {
    match nibble {
        0..=9 => (b'0' + nibble) as char,
        _ => (b'A' + nibble - 0xA) as char,
    }
}

/// Report topic of one device: [`TOPIC_PREFIX`] followed by its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic(String<TOPIC_CAPACITY>);

impl Topic {
    pub fn for_device(identity: &DeviceIdentity) -> Self {
        let mut topic = String::new();
        // Prefix (15) + identity (6) always fits the 24-byte buffer
        let _ = write!(topic, "{TOPIC_PREFIX}{identity}");
        Self(topic)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
