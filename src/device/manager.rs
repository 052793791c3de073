//! # Connection Manager
//!
//! Owns discovery results and the single active connection. Scan, connect and
//! disconnect are serialized by an operation lock, so at most one of them runs
//! at a time; `stop_scan` and the read-only queries never wait on it.
//!
//! Every state change is published twice: on a `watch` channel for callers
//! that only care about the latest state, and as
//! [`Event::ConnectionStateChanged`] on the event bus.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::backend::Radio;
use super::connection::Connection;
use super::fallback;
use super::simulated::SimulatedRadio;
use super::{ConnectionState, Device, DiscoverySource, ScanResult};
use crate::config::DiscoveryConfig;
use crate::error::{BraillinkError, Result};
use crate::events::{Event, EventBus};
use crate::lock;
use crate::pairing::{DeviceRecord, PairingStore};

/// Extra time granted to a backend scan past its own timeout.
const SCAN_GRACE: Duration = Duration::from_secs(2);

struct PairingBinding {
    store: Arc<dyn PairingStore>,
    user: String,
}

pub struct ConnectionManager {
    radio: Arc<dyn Radio>,
    fallback_radio: Arc<dyn Radio>,
    config: DiscoveryConfig,
    events: EventBus,
    pairing: Option<PairingBinding>,
    state: watch::Sender<ConnectionState>,
    op_lock: tokio::sync::Mutex<()>,
    discovered: Mutex<HashMap<String, Device>>,
    active: Mutex<Option<Arc<Connection>>>,
    scan_cancel: Mutex<CancellationToken>,
}

impl ConnectionManager {
    pub fn new(radio: Arc<dyn Radio>, config: DiscoveryConfig, events: EventBus) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            radio,
            fallback_radio: Arc::new(SimulatedRadio::reference()),
            config,
            events,
            pairing: None,
            state,
            op_lock: tokio::sync::Mutex::new(()),
            discovered: Mutex::new(HashMap::new()),
            active: Mutex::new(None),
            scan_cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Record successful connections for `user` in `store`.
    pub fn with_pairing_store(mut self, store: Arc<dyn PairingStore>, user: impl Into<String>) -> Self {
        self.pairing = Some(PairingBinding {
            store,
            user: user.into(),
        });
        self
    }

    /// Route fallback devices through a specific radio instead of the
    /// built-in reference radio.
    pub fn with_fallback_radio(mut self, radio: Arc<dyn Radio>) -> Self {
        self.fallback_radio = radio;
        self
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that always holds the latest state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connection().is_some_and(|c| c.is_open())
    }

    /// Shared handle to the active link.
    pub fn connection(&self) -> Option<Arc<Connection>> {
        lock(&self.active).clone()
    }

    pub fn connected_device(&self) -> Option<Device> {
        self.connection()
            .filter(|c| c.is_open())
            .map(|c| c.device().clone())
    }

    /// Devices from the most recent scan, strongest first.
    pub fn discovered(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = lock(&self.discovered).values().cloned().collect();
        sort_by_signal(&mut devices);
        devices
    }

    pub async fn is_radio_enabled(&self) -> bool {
        self.radio.is_enabled().await
    }

    /// Power the adapter on. No-op when it already is.
    pub async fn enable_radio(&self) -> Result<()> {
        if self.radio.is_enabled().await {
            return Ok(());
        }
        info!("Powering on Bluetooth");
        self.radio.enable().await
    }

    /// Devices already bonded with the local adapter.
    pub async fn bonded_devices(&self) -> Result<Vec<Device>> {
        self.radio.check_permissions().await?;
        let mut devices: Vec<Device> = self
            .radio
            .bonded_devices()
            .await?
            .iter()
            .map(|adv| Device::from_advertisement(adv, DiscoverySource::Live))
            .collect();
        sort_by_signal(&mut devices);
        Ok(devices)
    }

    /// Pairing records for the configured user, if a store is attached.
    pub fn known_devices(&self) -> Result<Vec<DeviceRecord>> {
        match &self.pairing {
            Some(binding) => binding.store.get_last_known_devices(&binding.user),
            None => Ok(Vec::new()),
        }
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    /// Discover nearby devices for `scan_timeout`.
    ///
    /// Clears previous results. When nothing is found and fallback devices
    /// are allowed, returns the reference profiles tagged `Fallback`.
    pub async fn scan(&self, scan_timeout: Duration) -> Result<ScanResult> {
        // Shared by every scan pending or running until stop_scan fires it
        let cancel = {
            let mut current = lock(&self.scan_cancel);
            if current.is_cancelled() {
                *current = CancellationToken::new();
            }
            current.clone()
        };
        let _op = self.op_lock.lock().await;
        self.radio.check_permissions().await?;

        let resting = if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Idle
        };

        lock(&self.discovered).clear();

        if resting != ConnectionState::Connected {
            self.set_state(ConnectionState::Scanning);
        }
        self.events.publish(Event::ScanStarted);
        info!("Scanning for devices ({:?})", scan_timeout);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let radio = Arc::clone(&self.radio);
        let scan = async move {
            tokio::select! {
                result = radio.scan(scan_timeout, tx) => result,
                _ = cancel.cancelled() => {
                    debug!("Scan stopped early");
                    Ok(())
                }
                _ = tokio::time::sleep(scan_timeout + SCAN_GRACE) => {
                    warn!("Radio scan overran its timeout, stopping");
                    Ok(())
                }
            }
        };
        let collect = async {
            let mut found: HashMap<String, Device> = HashMap::new();
            while let Some(adv) = rx.recv().await {
                let device = Device::from_advertisement(&adv, DiscoverySource::Live);
                if found.insert(adv.id.clone(), device.clone()).is_none() {
                    debug!("Discovered {} ({}, {} dBm)", device.display_name, device.id, device.signal_strength);
                    self.events.publish(Event::DeviceDiscovered { device });
                }
            }
            found
        };
        let (scan_result, found) = tokio::join!(scan, collect);

        if let Err(e) = scan_result {
            warn!("Scan failed: {}", e);
            self.set_state(resting);
            self.events.publish(Event::ScanStopped {
                found: 0,
                source: DiscoverySource::Live,
            });
            return Err(e);
        }

        let (source, mut devices) = if found.is_empty() && self.config.allow_fallback_devices {
            info!("No devices found, offering reference devices");
            let devices = fallback::reference_devices();
            for device in &devices {
                self.events.publish(Event::DeviceDiscovered {
                    device: device.clone(),
                });
            }
            (DiscoverySource::Fallback, devices)
        } else {
            (DiscoverySource::Live, found.into_values().collect())
        };
        sort_by_signal(&mut devices);

        {
            let mut discovered = lock(&self.discovered);
            for device in &devices {
                discovered.insert(device.id.clone(), device.clone());
            }
        }

        self.set_state(resting);
        self.events.publish(Event::ScanStopped {
            found: devices.len(),
            source,
        });
        info!("Scan finished: {} device(s), {:?}", devices.len(), source);

        Ok(ScanResult { source, devices })
    }

    /// End in-flight scans early, including ones still waiting to start.
    /// No-op when not scanning.
    pub fn stop_scan(&self) {
        lock(&self.scan_cancel).cancel();
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Connect to a discovered or bonded device.
    ///
    /// Returns the connected device with firmware and battery merged in.
    pub async fn connect(&self, device_id: &str) -> Result<Device> {
        let _op = self.op_lock.lock().await;

        let current = self.connection();
        if let Some(conn) = &current {
            if conn.device_id() == device_id && conn.is_open() {
                debug!("Already connected to {}", device_id);
                return Ok(conn.device().clone());
            }
        }

        let device = self.lookup(device_id).await?;
        let radio = match device.source {
            DiscoverySource::Live => Arc::clone(&self.radio),
            DiscoverySource::Fallback => Arc::clone(&self.fallback_radio),
        };
        radio.check_permissions().await?;

        if let Some(conn) = current {
            info!("Disconnecting {} before connecting to {}", conn.device_id(), device_id);
            self.teardown().await;
        }

        self.set_state(ConnectionState::Connecting);
        info!("Connecting to {} ({})", device.display_name, device.id);

        match self.establish(radio.as_ref(), device).await {
            Ok(device) => Ok(device),
            Err(e) => {
                warn!("Connection to {} failed: {}", device_id, e);
                self.set_state(ConnectionState::ConnectionFailed);
                self.events.publish(Event::ConnectionFailed {
                    device_id: device_id.to_string(),
                    reason: e.to_string(),
                });
                self.set_state(ConnectionState::Idle);
                Err(e)
            }
        }
    }

    /// Tear down the active connection.
    ///
    /// Always ends in `Disconnected`; teardown errors are logged.
    pub async fn disconnect(&self) {
        let _op = self.op_lock.lock().await;
        if !self.teardown().await && self.state() == ConnectionState::Connected {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Verify the active link. On loss, transitions to `Disconnected` and
    /// publishes `DeviceDisconnected`. Returns whether the link is up.
    pub async fn check_link(&self) -> bool {
        let Some(conn) = self.connection() else {
            return false;
        };
        if conn.is_alive().await {
            return true;
        }

        let _op = self.op_lock.lock().await;
        let still_active = lock(&self.active)
            .as_ref()
            .is_some_and(|active| Arc::ptr_eq(active, &conn));
        if still_active {
            warn!("Link to {} lost", conn.device_id());
            self.teardown().await;
        }
        false
    }

    async fn lookup(&self, device_id: &str) -> Result<Device> {
        if let Some(device) = lock(&self.discovered).get(device_id) {
            return Ok(device.clone());
        }
        self.radio
            .bonded_devices()
            .await?
            .iter()
            .find(|adv| adv.id == device_id)
            .map(|adv| Device::from_advertisement(adv, DiscoverySource::Live))
            .ok_or_else(|| BraillinkError::DeviceNotFound(device_id.to_string()))
    }

    async fn establish(&self, radio: &dyn Radio, mut device: Device) -> Result<Device> {
        if !radio.is_paired(&device.id).await? {
            let limit = self.config.pairing_timeout();
            info!("Pairing with {}", device.id);
            timeout(limit, radio.pair(&device.id))
                .await
                .map_err(|_| BraillinkError::ConnectionTimeout(limit))??;
        }
        device.paired = true;

        let limit = self.config.connect_timeout();
        let link = timeout(limit, radio.connect(&device.id))
            .await
            .map_err(|_| BraillinkError::ConnectionTimeout(limit))??;

        match timeout(limit, link.info()).await {
            Ok(Ok(info)) => device.merge_info(&info),
            Ok(Err(e)) => warn!("Could not read device info: {}", e),
            Err(_) => warn!("Device info request timed out"),
        }
        device.connection_state = ConnectionState::Connected;
        device.last_seen = Utc::now();

        *lock(&self.active) = Some(Arc::new(Connection::new(device.clone(), link)));
        lock(&self.discovered).insert(device.id.clone(), device.clone());

        self.set_state(ConnectionState::Connected);
        self.events.publish(Event::DeviceConnected {
            device: device.clone(),
        });
        info!(
            "Connected to {} (firmware {}, battery {})",
            device.display_name,
            device.firmware_version.as_deref().unwrap_or("unknown"),
            device
                .battery_level
                .map(|b| format!("{}%", b))
                .unwrap_or_else(|| "unknown".to_string())
        );

        if let Some(binding) = &self.pairing {
            if let Err(e) = binding.store.record_pairing(&binding.user, &device) {
                warn!("Failed to record pairing for {}: {}", device.id, e);
            }
        }

        Ok(device)
    }

    /// Close and forget the active connection. Returns false if there was
    /// none. Caller must hold the operation lock.
    async fn teardown(&self) -> bool {
        let Some(conn) = lock(&self.active).take() else {
            return false;
        };
        let limit = self.config.connect_timeout();
        match timeout(limit, conn.close()).await {
            Ok(Ok(())) => debug!("Closed link to {}", conn.device_id()),
            Ok(Err(e)) => warn!("Teardown of {} failed: {}", conn.device_id(), e),
            Err(_) => warn!("Teardown of {} timed out", conn.device_id()),
        }
        if let Some(device) = lock(&self.discovered).get_mut(conn.device_id()) {
            device.connection_state = ConnectionState::Disconnected;
        }
        self.set_state(ConnectionState::Disconnected);
        self.events.publish(Event::DeviceDisconnected {
            device_id: conn.device_id().to_string(),
        });
        info!("Disconnected from {}", conn.device_id());
        true
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("Connection state {:?} -> {:?}", previous, next);
            self.events.publish(Event::ConnectionStateChanged { state: next });
        }
    }
}

fn sort_by_signal(devices: &mut [Device]) {
    devices.sort_by(|a, b| {
        b.signal_strength
            .cmp(&a.signal_strength)
            .then_with(|| a.id.cmp(&b.id))
    });
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::simulated::SimulatedDevice;
    use crate::pairing::MemoryPairingStore;
    use pretty_assertions::assert_eq;

    const NEAR: &str = "AA:00:00:00:00:01";
    const FAR: &str = "AA:00:00:00:00:02";
    const SCAN: Duration = Duration::from_millis(10);

    fn radio() -> SimulatedRadio {
        SimulatedRadio::new()
            .with_device(SimulatedDevice::new(FAR, "Far", -80))
            .with_device(SimulatedDevice::new(NEAR, "Near", -40).paired())
    }

    fn manager(radio: &SimulatedRadio, config: DiscoveryConfig) -> ConnectionManager {
        ConnectionManager::new(Arc::new(radio.clone()), config, EventBus::default())
    }

    #[tokio::test]
    async fn test_scan_sorts_and_returns_idle() {
        let radio = radio();
        let manager = manager(&radio, DiscoveryConfig::default());

        let result = manager.scan(SCAN).await.unwrap();
        assert_eq!(result.source, DiscoverySource::Live);
        let ids: Vec<&str> = result.devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec![NEAR, FAR]);
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(manager.discovered().len(), 2);
    }

    #[tokio::test]
    async fn test_scan_permission_denied_keeps_state() {
        let radio = radio();
        radio.set_faults(|f| f.deny_permission = true);
        let manager = manager(&radio, DiscoveryConfig::default());

        assert!(matches!(
            manager.scan(SCAN).await,
            Err(BraillinkError::PermissionDenied(_))
        ));
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_empty_scan_without_fallback() {
        let manager = manager(&SimulatedRadio::new(), DiscoveryConfig::default());
        let result = manager.scan(SCAN).await.unwrap();
        assert!(result.devices.is_empty());
        assert!(!result.is_fallback());
    }

    #[tokio::test]
    async fn test_empty_scan_with_fallback() {
        let config = DiscoveryConfig {
            allow_fallback_devices: true,
            ..DiscoveryConfig::default()
        };
        let manager = manager(&SimulatedRadio::new(), config);

        let result = manager.scan(SCAN).await.unwrap();
        assert!(result.is_fallback());
        assert!(!result.devices.is_empty());

        let device = manager.connect(&result.devices[0].id).await.unwrap();
        assert_eq!(device.source, DiscoverySource::Fallback);
        assert!(device.firmware_version.is_some());
    }

    #[tokio::test]
    async fn test_connect_unknown_device() {
        let manager = manager(&radio(), DiscoveryConfig::default());
        assert!(matches!(
            manager.connect("nope").await,
            Err(BraillinkError::DeviceNotFound(_))
        ));
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_connect_bonded_without_scan() {
        let radio = radio();
        let manager = manager(&radio, DiscoveryConfig::default());
        let device = manager.connect(NEAR).await.unwrap();
        assert_eq!(device.connection_state, ConnectionState::Connected);
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_connect_pairs_first() {
        let radio = radio();
        let manager = manager(&radio, DiscoveryConfig::default());
        manager.scan(SCAN).await.unwrap();

        assert!(!radio.is_device_paired(FAR));
        let device = manager.connect(FAR).await.unwrap();
        assert!(device.paired);
        assert!(radio.is_device_paired(FAR));
    }

    #[tokio::test]
    async fn test_pairing_failure_returns_to_idle() {
        let radio = radio();
        radio.set_faults(|f| f.fail_pairing = true);
        let manager = manager(&radio, DiscoveryConfig::default());
        manager.scan(SCAN).await.unwrap();

        let mut events = manager.events().subscribe();
        assert!(matches!(
            manager.connect(FAR).await,
            Err(BraillinkError::PairingFailed(_))
        ));
        assert_eq!(manager.state(), ConnectionState::Idle);

        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, Event::ConnectionFailed { .. }) {
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let radio = radio();
        radio.set_faults(|f| f.connect_delay = Duration::from_millis(200));
        let config = DiscoveryConfig {
            connect_timeout_ms: 20,
            ..DiscoveryConfig::default()
        };
        let manager = manager(&radio, config);

        assert!(matches!(
            manager.connect(NEAR).await,
            Err(BraillinkError::ConnectionTimeout(_))
        ));
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_switching_devices_disconnects_previous() {
        let radio = radio();
        let manager = manager(&radio, DiscoveryConfig::default());
        manager.scan(SCAN).await.unwrap();

        manager.connect(NEAR).await.unwrap();
        manager.connect(FAR).await.unwrap();
        assert_eq!(radio.close_count(), 1);
        assert_eq!(manager.connected_device().map(|d| d.id), Some(FAR.to_string()));
    }

    #[tokio::test]
    async fn test_unknown_id_keeps_active_link() {
        let radio = radio();
        let manager = manager(&radio, DiscoveryConfig::default());
        manager.connect(NEAR).await.unwrap();

        assert!(matches!(
            manager.connect("AA:00:00:00:DE:AD").await,
            Err(BraillinkError::DeviceNotFound(_))
        ));
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.connected_device().map(|d| d.id), Some(NEAR.to_string()));
        assert_eq!(radio.close_count(), 0);
    }

    #[tokio::test]
    async fn test_enable_radio() {
        let radio = radio();
        radio.set_faults(|f| f.radio_off = true);
        let manager = manager(&radio, DiscoveryConfig::default());
        assert!(!manager.is_radio_enabled().await);
        assert!(matches!(
            manager.scan(SCAN).await,
            Err(BraillinkError::RadioUnavailable(_))
        ));

        manager.enable_radio().await.unwrap();
        assert!(manager.is_radio_enabled().await);
        assert_eq!(manager.scan(SCAN).await.unwrap().devices.len(), 2);

        // Already on
        manager.enable_radio().await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_same_device_is_noop() {
        let radio = radio();
        let manager = manager(&radio, DiscoveryConfig::default());
        manager.connect(NEAR).await.unwrap();
        manager.connect(NEAR).await.unwrap();
        assert_eq!(radio.close_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let radio = radio();
        let manager = manager(&radio, DiscoveryConfig::default());
        manager.connect(NEAR).await.unwrap();

        manager.disconnect().await;
        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(radio.close_count(), 1);
    }

    #[tokio::test]
    async fn test_check_link_detects_loss() {
        let radio = radio();
        let manager = manager(&radio, DiscoveryConfig::default());
        manager.connect(NEAR).await.unwrap();
        assert!(manager.check_link().await);

        radio.drop_link();
        assert!(!manager.check_link().await);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.connection().is_none());
    }

    #[tokio::test]
    async fn test_pairing_recorded() {
        let radio = radio();
        let store = Arc::new(MemoryPairingStore::new());
        let manager = ConnectionManager::new(
            Arc::new(radio.clone()),
            DiscoveryConfig::default(),
            EventBus::default(),
        )
        .with_pairing_store(store.clone(), "ana");

        manager.connect(NEAR).await.unwrap();
        let records = manager.known_devices().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].device_id, NEAR);
        assert_eq!(store.get_last_known_devices("ana").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_scan_returns_early() {
        let radio = radio();
        let manager = Arc::new(manager(&radio, DiscoveryConfig::default()));

        let mut events = manager.events().subscribe();
        let scanning = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.scan(Duration::from_secs(30)).await })
        };
        let mut seen = 0;
        while seen < 2 {
            if let Event::DeviceDiscovered { .. } = events.recv().await.unwrap() {
                seen += 1;
            }
        }
        manager.stop_scan();

        let result = tokio::time::timeout(Duration::from_secs(5), scanning)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(result.devices.len(), 2);
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_stop_scan_reaches_scan_waiting_for_lock() {
        let radio = radio();
        radio.set_faults(|f| f.connect_delay = Duration::from_millis(200));
        let manager = Arc::new(manager(&radio, DiscoveryConfig::default()));

        let connecting = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.connect(NEAR).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let scanning = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.scan(Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.stop_scan();

        let result = tokio::time::timeout(Duration::from_secs(5), scanning)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert!(connecting.await.unwrap().is_ok());

        // A later scan is not affected by the earlier stop
        let started = std::time::Instant::now();
        manager.scan(Duration::from_millis(50)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
