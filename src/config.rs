//! # Configuration
//!
//! All tunables for the link, discovery, job pipeline and status poller.
//! Every section has defaults, so a config file only needs the values it
//! changes:
//!
//! ```json
//! {
//!   "link": { "max_chunk_size": 20, "chunk_delay_ms": 50 },
//!   "discovery": { "allow_fallback_devices": true }
//! }
//! ```
//!
//! Durations are stored as milliseconds and exposed as [`Duration`].

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BraillinkError, Result};
use crate::transfer::DEFAULT_MAX_CHUNK_SIZE;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BraillinkConfig {
    pub link: LinkConfig,
    pub discovery: DiscoveryConfig,
    pub jobs: JobConfig,
    pub status: StatusConfig,
    pub events: EventConfig,
}

impl BraillinkConfig {
    /// Load from a JSON file and validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            BraillinkError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    /// Parse from a JSON string and validate.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.link.max_chunk_size == 0 {
            return Err(BraillinkError::Config(
                "link.max_chunk_size must be at least 1".to_string(),
            ));
        }
        if self.link.write_timeout_ms == 0 {
            return Err(BraillinkError::Config(
                "link.write_timeout_ms must be positive".to_string(),
            ));
        }
        if self.events.capacity == 0 {
            return Err(BraillinkError::Config(
                "events.capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Link framing and pacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Maximum cells (bytes) per write
    pub max_chunk_size: usize,
    /// Pause between chunk writes so a slow embosser is never flooded
    pub chunk_delay_ms: u64,
    /// Deadline for a single chunk or command write
    pub write_timeout_ms: u64,
}

impl LinkConfig {
    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            chunk_delay_ms: 50,
            write_timeout_ms: 2_000,
        }
    }
}

/// Scan and connect behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub scan_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub pairing_timeout_ms: u64,
    /// Offer reference device profiles when a scan finds nothing.
    /// Meant for demo and test environments only.
    pub allow_fallback_devices: bool,
}

impl DiscoveryConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_millis(self.pairing_timeout_ms)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            scan_timeout_ms: 5_000,
            connect_timeout_ms: 10_000,
            pairing_timeout_ms: 15_000,
            allow_fallback_devices: false,
        }
    }
}

/// Print job pipeline behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Terminal jobs kept for the caller's UI
    pub history_capacity: usize,
    /// Refuse text with characters that have no Braille cell
    pub reject_unmapped: bool,
    /// Read device status before starting a job
    pub check_status_before_print: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            history_capacity: 20,
            reject_unmapped: true,
            check_status_before_print: true,
        }
    }
}

/// Status poller behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub poll_interval_ms: u64,
    pub read_timeout_ms: u64,
}

impl StatusConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            read_timeout_ms: 1_000,
        }
    }
}

/// Event channel sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Broadcast buffer; slow subscribers beyond this lag and skip events
    pub capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BraillinkConfig::default();
        assert_eq!(config.link.max_chunk_size, 20);
        assert_eq!(config.discovery.scan_timeout(), Duration::from_secs(5));
        assert!(!config.discovery.allow_fallback_devices);
        assert!(config.jobs.reject_unmapped);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = BraillinkConfig::from_json(
            r#"{ "link": { "chunk_delay_ms": 5 }, "discovery": { "allow_fallback_devices": true } }"#,
        )
        .unwrap();
        assert_eq!(config.link.chunk_delay(), Duration::from_millis(5));
        assert_eq!(config.link.max_chunk_size, 20);
        assert!(config.discovery.allow_fallback_devices);
        assert_eq!(config.jobs, JobConfig::default());
    }

    #[test]
    fn test_empty_object_is_default() {
        assert_eq!(BraillinkConfig::from_json("{}").unwrap(), BraillinkConfig::default());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let err = BraillinkConfig::from_json(r#"{ "link": { "max_chunk_size": 0 } }"#);
        assert!(matches!(err, Err(BraillinkError::Config(_))));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            BraillinkConfig::from_json("{ not json"),
            Err(BraillinkError::Json(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = BraillinkConfig::load("/nonexistent/braillink.json");
        assert!(matches!(err, Err(BraillinkError::Config(_))));
    }
}
