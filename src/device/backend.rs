//! # Radio Backends
//!
//! The connection manager talks to hardware only through these two traits:
//!
//! - [`Radio`]: the local adapter (discovery, pairing, opening links)
//! - [`Link`]: one open connection to a device (writes, status reads, teardown)
//!
//! Implementations: [`super::rfcomm`] for Bluetooth Classic SPP on Linux and
//! [`super::simulated`] for demo mode and tests.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// One sighting of a device during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub id: String,
    pub name: Option<String>,
    /// RSSI in dBm, larger is stronger
    pub rssi: i16,
    pub paired: bool,
}

/// Metadata fetched from a device right after connecting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkInfo {
    pub firmware_version: Option<String>,
    pub battery_level: Option<u8>,
}

/// Local Bluetooth adapter.
#[async_trait]
pub trait Radio: Send + Sync {
    /// Fail with `PermissionDenied` or `RadioUnavailable` if the radio cannot be used.
    async fn check_permissions(&self) -> Result<()>;

    /// Whether the adapter is present and powered.
    async fn is_enabled(&self) -> bool;

    /// Power the adapter on. Succeeds if it already is.
    async fn enable(&self) -> Result<()>;

    /// Report advertisements on `found` until `timeout` elapses.
    ///
    /// The same device may be reported more than once; the caller deduplicates.
    async fn scan(&self, timeout: Duration, found: mpsc::UnboundedSender<Advertisement>)
    -> Result<()>;

    /// Devices already bonded with this adapter.
    async fn bonded_devices(&self) -> Result<Vec<Advertisement>>;

    async fn is_paired(&self, id: &str) -> Result<bool>;

    /// Create a bond with the device.
    async fn pair(&self, id: &str) -> Result<()>;

    /// Open a link to a (paired) device.
    async fn connect(&self, id: &str) -> Result<Box<dyn Link>>;
}

/// An open connection to one device.
#[async_trait]
pub trait Link: Send + Sync {
    /// Write bytes in a single link write.
    async fn write(&self, data: &[u8]) -> Result<()>;

    /// Read the raw `[battery, paper, error]` status triple.
    async fn read_status(&self) -> Result<[u8; 3]>;

    async fn info(&self) -> Result<LinkInfo>;

    async fn is_connected(&self) -> bool;

    /// Tear down the link. Called at most once by the manager.
    async fn close(&self) -> Result<()>;
}
