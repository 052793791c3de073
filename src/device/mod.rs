//! # Device Connection Layer
//!
//! Discovery, pairing, connection lifecycle and link ownership for a single
//! embosser at a time.
//!
//! ## Module Structure
//!
//! - [`backend`]: `Radio` / `Link` traits implemented by hardware backends
//! - [`manager`]: `ConnectionManager` state machine
//! - [`connection`]: shared handle to the active link
//! - [`fallback`]: reference device profiles for demo mode
//! - [`rfcomm`]: Bluetooth Classic SPP backend (Linux)
//! - [`simulated`]: in-process device with fault injection
//!
//! ## State Machine
//!
//! ```text
//! Idle ──scan──▶ Scanning ──▶ Idle
//! Idle/Disconnected ──connect──▶ Connecting ──▶ Connected
//!                                     └──▶ ConnectionFailed ──▶ Idle
//! Connected ──disconnect / link loss──▶ Disconnected
//! ```

pub mod backend;
pub mod connection;
pub mod fallback;
pub mod manager;
pub mod rfcomm;
pub mod simulated;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use backend::{Advertisement, Link, LinkInfo, Radio};
pub use connection::Connection;
pub use manager::ConnectionManager;

/// Name shown for devices that do not advertise one.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

/// Connection manager state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    Connected,
    ConnectionFailed,
    Disconnected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Where a device entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    /// Seen by the radio
    Live,
    /// Reference profile offered because a scan found nothing
    Fallback,
}

/// A discoverable / connectable embosser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Stable hardware identifier (MAC address for RFCOMM)
    pub id: String,
    pub display_name: String,
    /// RSSI in dBm, larger is stronger
    pub signal_strength: i16,
    pub connection_state: ConnectionState,
    pub battery_level: Option<u8>,
    pub firmware_version: Option<String>,
    pub paired: bool,
    pub source: DiscoverySource,
    pub last_seen: DateTime<Utc>,
}

impl Device {
    /// Build a freshly discovered device from an advertisement.
    pub fn from_advertisement(adv: &Advertisement, source: DiscoverySource) -> Self {
        Self {
            id: adv.id.clone(),
            display_name: adv
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string()),
            signal_strength: adv.rssi,
            connection_state: ConnectionState::Idle,
            battery_level: None,
            firmware_version: None,
            paired: adv.paired,
            source,
            last_seen: Utc::now(),
        }
    }

    /// Merge metadata fetched after connecting.
    pub fn merge_info(&mut self, info: &LinkInfo) {
        if let Some(battery) = info.battery_level {
            self.battery_level = Some(battery.min(100));
        }
        if info.firmware_version.is_some() {
            self.firmware_version = info.firmware_version.clone();
        }
    }
}

/// Result of one discovery scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    pub source: DiscoverySource,
    /// Deduplicated by id, strongest-first
    pub devices: Vec<Device>,
}

impl ScanResult {
    pub fn is_fallback(&self) -> bool {
        self.source == DiscoverySource::Fallback
    }
}
