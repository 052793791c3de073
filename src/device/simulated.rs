//! # Simulated Backend
//!
//! An in-process radio and embosser. Used for demo mode (`--simulate`), for
//! fallback reference devices, and by the test suites.
//!
//! Faults are injected through [`Faults`]; every successful write is kept in
//! a log so tests can assert on the exact bytes sent.
//!
//! ```
//! use braillink::device::simulated::{SimulatedDevice, SimulatedRadio};
//!
//! let radio = SimulatedRadio::new()
//!     .with_device(SimulatedDevice::new("AA:BB:CC:DD:EE:FF", "Bench Embosser", -52));
//! radio.set_faults(|f| f.fail_write_at = Some(3));
//! assert_eq!(radio.write_count(), 0);
//! ```

use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::sync::mpsc;

use super::backend::{Advertisement, Link, LinkInfo, Radio};
use super::fallback::ReferenceDevice;
use crate::error::{BraillinkError, Result};
use crate::lock;

/// A device the simulated radio can see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedDevice {
    pub advertisement: Advertisement,
    pub info: LinkInfo,
    /// Reply to status requests: battery, paper, error
    pub status: [u8; 3],
}

impl SimulatedDevice {
    /// Unpaired device with full battery and paper loaded.
    pub fn new(id: &str, name: &str, rssi: i16) -> Self {
        Self {
            advertisement: Advertisement {
                id: id.to_string(),
                name: Some(name.to_string()),
                rssi,
                paired: false,
            },
            info: LinkInfo {
                firmware_version: Some("sim-1.0".to_string()),
                battery_level: Some(100),
            },
            status: [100, 1, 0],
        }
    }

    pub fn paired(mut self) -> Self {
        self.advertisement.paired = true;
        self
    }

    pub fn unnamed(mut self) -> Self {
        self.advertisement.name = None;
        self
    }

    pub fn with_status(mut self, status: [u8; 3]) -> Self {
        self.status = status;
        self
    }

    pub fn with_info(mut self, info: LinkInfo) -> Self {
        self.info = info;
        self
    }
}

impl From<ReferenceDevice> for SimulatedDevice {
    fn from(profile: ReferenceDevice) -> Self {
        Self {
            advertisement: profile.advertisement(),
            info: profile.link_info(),
            status: [profile.battery_level, 1, 0],
        }
    }
}

/// Injectable failures and delays.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub deny_permission: bool,
    pub radio_off: bool,
    pub fail_pairing: bool,
    pub fail_connect: bool,
    /// Teardown reports an error (the link still goes down)
    pub fail_close: bool,
    pub fail_status_read: bool,
    /// 1-based index of the link write that fails
    pub fail_write_at: Option<usize>,
    pub scan_delay: Duration,
    pub pairing_delay: Duration,
    pub connect_delay: Duration,
    pub write_delay: Duration,
}

#[derive(Debug, Default)]
struct SimState {
    devices: Vec<SimulatedDevice>,
    paired: HashSet<String>,
    faults: Faults,
    writes: Vec<Vec<u8>>,
    write_count: usize,
    close_count: usize,
    connected: Option<String>,
}

impl SimState {
    fn device(&self, id: &str) -> Result<&SimulatedDevice> {
        self.devices
            .iter()
            .find(|d| d.advertisement.id == id)
            .ok_or_else(|| BraillinkError::DeviceNotFound(id.to_string()))
    }

    fn advertisement(&self, device: &SimulatedDevice) -> Advertisement {
        let mut adv = device.advertisement.clone();
        adv.paired = self.paired.contains(&adv.id);
        adv
    }
}

/// In-process radio. Clones share state with each other and with every
/// link they open.
#[derive(Debug, Clone, Default)]
pub struct SimulatedRadio {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Radio that sees every reference device profile.
    pub fn reference() -> Self {
        ReferenceDevice::ALL
            .into_iter()
            .fold(Self::new(), |radio, profile| radio.with_device(profile.into()))
    }

    pub fn with_device(self, device: SimulatedDevice) -> Self {
        {
            let mut state = lock(&self.state);
            if device.advertisement.paired {
                state.paired.insert(device.advertisement.id.clone());
            }
            state.devices.push(device);
        }
        self
    }

    pub fn set_faults(&self, update: impl FnOnce(&mut Faults)) {
        update(&mut lock(&self.state).faults);
    }

    /// Change the status triple a device reports.
    pub fn set_status(&self, id: &str, status: [u8; 3]) {
        let mut state = lock(&self.state);
        if let Some(device) = state.devices.iter_mut().find(|d| d.advertisement.id == id) {
            device.status = status;
        }
    }

    /// Drop the active link as if the device went out of range.
    pub fn drop_link(&self) {
        lock(&self.state).connected = None;
    }

    /// Every successful write, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.state).writes.clone()
    }

    pub fn written_bytes(&self) -> Vec<u8> {
        lock(&self.state).writes.concat()
    }

    /// Attempted writes, including failed ones.
    pub fn write_count(&self) -> usize {
        lock(&self.state).write_count
    }

    pub fn close_count(&self) -> usize {
        lock(&self.state).close_count
    }

    pub fn is_device_paired(&self, id: &str) -> bool {
        lock(&self.state).paired.contains(id)
    }

    fn faults(&self) -> Faults {
        lock(&self.state).faults.clone()
    }
}

#[async_trait]
impl Radio for SimulatedRadio {
    async fn check_permissions(&self) -> Result<()> {
        let faults = self.faults();
        if faults.deny_permission {
            return Err(BraillinkError::PermissionDenied(
                "Bluetooth scan permission not granted".to_string(),
            ));
        }
        if faults.radio_off {
            return Err(BraillinkError::RadioUnavailable(
                "Bluetooth is powered off".to_string(),
            ));
        }
        Ok(())
    }

    async fn is_enabled(&self) -> bool {
        !self.faults().radio_off
    }

    async fn enable(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.faults.deny_permission {
            return Err(BraillinkError::PermissionDenied(
                "not allowed to power on Bluetooth".to_string(),
            ));
        }
        state.faults.radio_off = false;
        Ok(())
    }

    async fn scan(
        &self,
        timeout: Duration,
        found: mpsc::UnboundedSender<Advertisement>,
    ) -> Result<()> {
        let delay = self.faults().scan_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay.min(timeout)).await;
        }
        let advertisements: Vec<Advertisement> = {
            let state = lock(&self.state);
            state.devices.iter().map(|d| state.advertisement(d)).collect()
        };
        for adv in advertisements {
            debug!("sim: advertising {}", adv.id);
            if found.send(adv).is_err() {
                return Ok(());
            }
        }
        tokio::time::sleep(timeout.saturating_sub(delay)).await;
        Ok(())
    }

    async fn bonded_devices(&self) -> Result<Vec<Advertisement>> {
        let state = lock(&self.state);
        Ok(state
            .devices
            .iter()
            .filter(|d| state.paired.contains(&d.advertisement.id))
            .map(|d| state.advertisement(d))
            .collect())
    }

    async fn is_paired(&self, id: &str) -> Result<bool> {
        let state = lock(&self.state);
        state.device(id)?;
        Ok(state.paired.contains(id))
    }

    async fn pair(&self, id: &str) -> Result<()> {
        let faults = self.faults();
        tokio::time::sleep(faults.pairing_delay).await;
        let mut state = lock(&self.state);
        state.device(id)?;
        if faults.fail_pairing {
            return Err(BraillinkError::PairingFailed(format!(
                "{} rejected the pairing request",
                id
            )));
        }
        state.paired.insert(id.to_string());
        Ok(())
    }

    async fn connect(&self, id: &str) -> Result<Box<dyn Link>> {
        let faults = self.faults();
        tokio::time::sleep(faults.connect_delay).await;
        let mut state = lock(&self.state);
        state.device(id)?;
        if !state.paired.contains(id) {
            return Err(BraillinkError::PairingRequired(id.to_string()));
        }
        if faults.fail_connect {
            return Err(BraillinkError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{} refused the connection", id),
            )));
        }
        state.connected = Some(id.to_string());
        Ok(Box::new(SimulatedLink {
            state: Arc::clone(&self.state),
            id: id.to_string(),
        }))
    }
}

/// Link opened by [`SimulatedRadio::connect`].
#[derive(Debug)]
pub struct SimulatedLink {
    state: Arc<Mutex<SimState>>,
    id: String,
}

impl SimulatedLink {
    fn up(state: &SimState, id: &str) -> bool {
        state.connected.as_deref() == Some(id)
    }
}

#[async_trait]
impl Link for SimulatedLink {
    async fn write(&self, data: &[u8]) -> Result<()> {
        let delay = lock(&self.state).faults.write_delay;
        tokio::time::sleep(delay).await;

        let mut state = lock(&self.state);
        if !Self::up(&state, &self.id) {
            return Err(BraillinkError::Transfer("link is down".to_string()));
        }
        state.write_count += 1;
        if state.faults.fail_write_at == Some(state.write_count) {
            return Err(BraillinkError::Transfer(format!(
                "simulated failure on write {}",
                state.write_count
            )));
        }
        state.writes.push(data.to_vec());
        Ok(())
    }

    async fn read_status(&self) -> Result<[u8; 3]> {
        let state = lock(&self.state);
        if !Self::up(&state, &self.id) {
            return Err(BraillinkError::Transfer("link is down".to_string()));
        }
        if state.faults.fail_status_read {
            return Err(BraillinkError::Transfer("no status reply".to_string()));
        }
        Ok(state.device(&self.id)?.status)
    }

    async fn info(&self) -> Result<LinkInfo> {
        Ok(lock(&self.state).device(&self.id)?.info.clone())
    }

    async fn is_connected(&self) -> bool {
        Self::up(&lock(&self.state), &self.id)
    }

    async fn close(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.close_count += 1;
        if Self::up(&state, &self.id) {
            state.connected = None;
        }
        if state.faults.fail_close {
            return Err(BraillinkError::Io(io::Error::other("simulated teardown failure")));
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
