//! Observable identity of a discovered radio peer.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Information about a peer seen on the radio.
///
/// This is the payload handed to advertisement observers and the
/// metadata carried alongside a resolved peripheral. It is a snapshot:
/// the advertised name and RSSI are volatile and may differ between
/// sightings of the same device.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeerInfo {
    /// Advertised device name, if the packet carried one.
    pub name: Option<String>,
    /// Device address or platform identifier (MAC address on
    /// Linux/Windows, a CoreBluetooth UUID on macOS).
    pub address: String,
    /// Signal strength at the time of the sighting.
    pub rssi: Option<i16>,
}

impl PeerInfo {
    /// Create peer info from an address alone.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
            rssi: None,
        }
    }

    /// Create peer info with a name.
    pub fn with_name(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            address: address.into(),
            rssi: None,
        }
    }

    /// Human-readable label: the name when known, otherwise the address.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

impl std::fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_prefers_name() {
        let peer = PeerInfo::with_name("aa:bb:cc:dd:ee:ff", "CIRCUITPY23c6");
        assert_eq!(peer.label(), "CIRCUITPY23c6");
        assert_eq!(peer.to_string(), "CIRCUITPY23c6 (aa:bb:cc:dd:ee:ff)");
    }

    #[test]
    fn test_label_falls_back_to_address() {
        let peer = PeerInfo::new("aa:bb:cc:dd:ee:ff");
        assert_eq!(peer.label(), "aa:bb:cc:dd:ee:ff");
    }
}
