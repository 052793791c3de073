//! # Pairing Records
//!
//! Remembers which devices a user has connected to. The core only needs two
//! capabilities, so storage is behind the [`PairingStore`] trait:
//!
//! - [`MemoryPairingStore`]: process-local, for tests and embedding apps
//! - [`JsonFilePairingStore`]: a single JSON file keyed by user

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::device::Device;
use crate::error::Result;
use crate::lock;

/// What is remembered about a paired device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    pub display_name: String,
    pub last_connected_at: DateTime<Utc>,
}

impl DeviceRecord {
    pub fn from_device(device: &Device) -> Self {
        Self {
            device_id: device.id.clone(),
            display_name: device.display_name.clone(),
            last_connected_at: Utc::now(),
        }
    }
}

pub trait PairingStore: Send + Sync {
    /// Records for `user`, most recently connected first.
    fn get_last_known_devices(&self, user: &str) -> Result<Vec<DeviceRecord>>;

    /// Insert or refresh the record for `device`.
    fn record_pairing(&self, user: &str, device: &Device) -> Result<()>;
}

type Records = HashMap<String, Vec<DeviceRecord>>;

/// Upsert by device id and keep most recent first.
fn upsert(records: &mut Vec<DeviceRecord>, record: DeviceRecord) {
    records.retain(|r| r.device_id != record.device_id);
    records.push(record);
    records.sort_by(|a, b| b.last_connected_at.cmp(&a.last_connected_at));
}

#[derive(Debug, Default)]
pub struct MemoryPairingStore {
    records: Mutex<Records>,
}

impl MemoryPairingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PairingStore for MemoryPairingStore {
    fn get_last_known_devices(&self, user: &str) -> Result<Vec<DeviceRecord>> {
        Ok(lock(&self.records).get(user).cloned().unwrap_or_default())
    }

    fn record_pairing(&self, user: &str, device: &Device) -> Result<()> {
        let mut records = lock(&self.records);
        upsert(
            records.entry(user.to_string()).or_default(),
            DeviceRecord::from_device(device),
        );
        Ok(())
    }
}

/// JSON file store. A missing file reads as empty; writes replace the file.
#[derive(Debug)]
pub struct JsonFilePairingStore {
    path: PathBuf,
    // serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl JsonFilePairingStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Records> {
        if !self.path.exists() {
            return Ok(Records::new());
        }
        let text = fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(Records::new());
        }
        Ok(serde_json::from_str(&text)?)
    }
}

impl PairingStore for JsonFilePairingStore {
    fn get_last_known_devices(&self, user: &str) -> Result<Vec<DeviceRecord>> {
        Ok(self.read_all()?.remove(user).unwrap_or_default())
    }

    fn record_pairing(&self, user: &str, device: &Device) -> Result<()> {
        let _guard = lock(&self.write_lock);
        let mut all = self.read_all()?;
        upsert(
            all.entry(user.to_string()).or_default(),
            DeviceRecord::from_device(device),
        );
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&all)?)?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Advertisement, DiscoverySource};

    fn device(id: &str, name: &str) -> Device {
        Device::from_advertisement(
            &Advertisement {
                id: id.to_string(),
                name: Some(name.to_string()),
                rssi: -50,
                paired: true,
            },
            DiscoverySource::Live,
        )
    }

    #[test]
    fn test_memory_store_upserts() {
        let store = MemoryPairingStore::new();
        store.record_pairing("ana", &device("A", "First")).unwrap();
        store.record_pairing("ana", &device("B", "Second")).unwrap();
        store.record_pairing("ana", &device("A", "First renamed")).unwrap();

        let records = store.get_last_known_devices("ana").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].device_id, "A");
        assert_eq!(records[0].display_name, "First renamed");
        assert!(store.get_last_known_devices("ben").unwrap().is_empty());
    }

    #[test]
    fn test_json_store_persists() {
        let path = std::env::temp_dir().join(format!(
            "braillink-pairings-{}.json",
            uuid::Uuid::new_v4()
        ));
        let store = JsonFilePairingStore::new(&path);
        assert!(store.get_last_known_devices("ana").unwrap().is_empty());

        store.record_pairing("ana", &device("A", "Embosser")).unwrap();

        let reopened = JsonFilePairingStore::new(&path);
        let records = reopened.get_last_known_devices("ana").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].display_name, "Embosser");

        let _ = fs::remove_file(&path);
    }
}
