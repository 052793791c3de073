//! # Reference Devices
//!
//! Well-known embosser profiles offered when a scan finds nothing and
//! `discovery.allow_fallback_devices` is enabled. They are always tagged
//! [`DiscoverySource::Fallback`] and connect through the in-process
//! simulated backend, never the real radio.
//!
//! | Profile | Id | RSSI | Firmware |
//! |---------|----|------|----------|
//! | Pocket | `FB:00:00:00:00:01` | -45 dBm | 1.4.2 |
//! | Desk | `FB:00:00:00:00:02` | -60 dBm | 2.0.1 |

use chrono::Utc;

use super::{Advertisement, ConnectionState, Device, DiscoverySource, LinkInfo};

/// A demo device profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceDevice {
    pub id: &'static str,
    pub name: &'static str,
    pub signal_strength: i16,
    pub firmware_version: &'static str,
    pub battery_level: u8,
}

impl ReferenceDevice {
    /// Handheld single-line embosser.
    pub const POCKET: Self = Self {
        id: "FB:00:00:00:00:01",
        name: "Braillink Pocket (demo)",
        signal_strength: -45,
        firmware_version: "1.4.2",
        battery_level: 90,
    };

    /// Mains-powered page embosser.
    pub const DESK: Self = Self {
        id: "FB:00:00:00:00:02",
        name: "Braillink Desk (demo)",
        signal_strength: -60,
        firmware_version: "2.0.1",
        battery_level: 100,
    };

    /// All profiles, strongest signal first.
    pub const ALL: [Self; 2] = [Self::POCKET, Self::DESK];

    pub fn find(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.id == id)
    }

    pub fn advertisement(&self) -> Advertisement {
        Advertisement {
            id: self.id.to_string(),
            name: Some(self.name.to_string()),
            rssi: self.signal_strength,
            paired: true,
        }
    }

    pub fn link_info(&self) -> LinkInfo {
        LinkInfo {
            firmware_version: Some(self.firmware_version.to_string()),
            battery_level: Some(self.battery_level),
        }
    }

    pub fn to_device(&self) -> Device {
        Device {
            id: self.id.to_string(),
            display_name: self.name.to_string(),
            signal_strength: self.signal_strength,
            connection_state: ConnectionState::Idle,
            battery_level: None,
            firmware_version: None,
            paired: true,
            source: DiscoverySource::Fallback,
            last_seen: Utc::now(),
        }
    }
}

/// Fallback scan result entries.
pub fn reference_devices() -> Vec<Device> {
    ReferenceDevice::ALL.iter().map(ReferenceDevice::to_device).collect()
}
