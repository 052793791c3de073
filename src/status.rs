//! # Status Poller
//!
//! Device health reporting. The embosser answers a `STATUS_REQUEST` with three
//! bytes:
//!
//! | Byte | Meaning                                  |
//! |------|------------------------------------------|
//! | 0    | Battery percent (values above 100 clamp) |
//! | 1    | Paper loaded (`1` = yes)                 |
//! | 2    | Error code (`0` = none, see [`ErrorCode`]) |
//!
//! Every snapshot is computed whole from one triple; nothing is partially
//! applied.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::StatusConfig;
use crate::device::ConnectionManager;
use crate::error::{BraillinkError, Result};
use crate::events::{Event, EventBus};
use crate::lock;
use crate::transfer::wire::STATUS_REPLY_LEN;

/// Hardware-reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    PaperJam,
    OutOfPaper,
    Overheating,
    LowBattery,
    CommunicationError,
    Unknown(u8),
}

impl ErrorCode {
    /// Map the wire byte. `0` means no error.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => None,
            1 => Some(Self::PaperJam),
            2 => Some(Self::OutOfPaper),
            3 => Some(Self::Overheating),
            4 => Some(Self::LowBattery),
            5 => Some(Self::CommunicationError),
            other => Some(Self::Unknown(other)),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::PaperJam => 1,
            Self::OutOfPaper => 2,
            Self::Overheating => 3,
            Self::LowBattery => 4,
            Self::CommunicationError => 5,
            Self::Unknown(code) => code,
        }
    }

    /// User-facing description.
    pub fn message(self) -> String {
        match self {
            Self::PaperJam => "Paper jam. Open the cover and clear the feed.".to_string(),
            Self::OutOfPaper => "Out of paper. Load Braille paper to continue.".to_string(),
            Self::Overheating => "Device is overheating. Let it cool down.".to_string(),
            Self::LowBattery => "Battery is low. Connect the charger.".to_string(),
            Self::CommunicationError => "Device reported a communication error.".to_string(),
            Self::Unknown(code) => format!("Unknown device error (code {})", code),
        }
    }

    /// Whether a job should not start while this error is reported.
    ///
    /// Low battery is a warning only.
    pub fn blocks_printing(self) -> bool {
        !matches!(self, Self::LowBattery)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// One health snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub connected: bool,
    pub battery_level: u8,
    pub paper_loaded: bool,
    pub error: Option<ErrorCode>,
    /// True when this is the last known-good snapshot rather than a fresh read
    pub stale: bool,
    pub read_at: DateTime<Utc>,
}

impl DeviceStatus {
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            battery_level: 0,
            paper_loaded: false,
            error: None,
            stale: false,
            read_at: Utc::now(),
        }
    }

    /// Fresh, connected, paper loaded, no blocking error.
    pub fn ready_to_print(&self) -> bool {
        self.connected
            && self.paper_loaded
            && self.error.is_none_or(|code| !code.blocks_printing())
    }

    /// The error that keeps a job from starting, if any.
    pub fn blocking_error(&self) -> Option<ErrorCode> {
        match self.error {
            Some(code) if code.blocks_printing() => Some(code),
            _ if !self.paper_loaded => Some(ErrorCode::OutOfPaper),
            _ => None,
        }
    }
}

/// Decode a status triple.
pub fn parse_status(bytes: [u8; 3]) -> DeviceStatus {
    let [battery, paper, error] = bytes;
    DeviceStatus {
        connected: true,
        battery_level: battery.min(100),
        paper_loaded: paper == 1,
        error: ErrorCode::from_byte(error),
        stale: false,
        read_at: Utc::now(),
    }
}

/// Reads device health through the manager's active connection.
pub struct StatusPoller {
    manager: Arc<ConnectionManager>,
    events: EventBus,
    config: StatusConfig,
    last_good: Mutex<Option<DeviceStatus>>,
}

impl StatusPoller {
    pub fn new(manager: Arc<ConnectionManager>, events: EventBus, config: StatusConfig) -> Self {
        Self {
            manager,
            events,
            config,
            last_good: Mutex::new(None),
        }
    }

    /// Last successfully read snapshot.
    pub fn last_status(&self) -> Option<DeviceStatus> {
        lock(&self.last_good).clone()
    }

    /// Read current status.
    ///
    /// - Not connected: a fresh disconnected snapshot
    /// - Link busy or read failed: last known-good snapshot marked stale
    pub async fn read_status(&self) -> DeviceStatus {
        let Some(conn) = self.manager.connection().filter(|c| c.is_open()) else {
            return self.report_disconnected();
        };

        match conn.try_read_status(self.config.read_timeout()).await {
            Ok(bytes) => self.accept(parse_status(bytes)),
            Err(BraillinkError::LinkBusy) => {
                debug!("Status read skipped, link busy");
                self.stale_snapshot(conn.device().battery_level)
            }
            Err(e) => {
                warn!("Status read from {} failed: {}", conn.device_id(), e);
                if !self.manager.check_link().await && !self.manager.is_connected() {
                    return self.report_disconnected();
                }
                self.stale_snapshot(conn.device().battery_level)
            }
        }
    }

    /// Apply a status triple pushed by the device.
    ///
    /// Fewer than three bytes is rejected and nothing changes. Extra bytes
    /// are ignored.
    pub fn apply_notification(&self, bytes: &[u8]) -> Result<DeviceStatus> {
        let triple: [u8; STATUS_REPLY_LEN] = bytes
            .get(..STATUS_REPLY_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| {
                BraillinkError::InvalidInput(format!(
                    "status notification needs {} bytes, got {}",
                    STATUS_REPLY_LEN,
                    bytes.len()
                ))
            })?;
        Ok(self.accept(parse_status(triple)))
    }

    /// Poll every `interval` until `cancel` fires.
    pub fn spawn_polling(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let status = self.read_status().await;
                        debug!(
                            "Polled status: connected={} battery={} stale={}",
                            status.connected, status.battery_level, status.stale
                        );
                    }
                }
            }
            debug!("Status polling stopped");
        })
    }

    fn report_disconnected(&self) -> DeviceStatus {
        lock(&self.last_good).take();
        let status = DeviceStatus::disconnected();
        self.events.publish(Event::StatusUpdated {
            status: status.clone(),
        });
        status
    }

    fn accept(&self, status: DeviceStatus) -> DeviceStatus {
        *lock(&self.last_good) = Some(status.clone());
        self.events.publish(Event::StatusUpdated {
            status: status.clone(),
        });
        status
    }

    fn stale_snapshot(&self, battery_hint: Option<u8>) -> DeviceStatus {
        match lock(&self.last_good).clone() {
            Some(mut status) => {
                status.stale = true;
                status
            }
            None => DeviceStatus {
                connected: true,
                battery_level: battery_hint.unwrap_or(0),
                paper_loaded: false,
                error: None,
                stale: true,
                read_at: Utc::now(),
            },
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_status_fields() {
        let status = parse_status([85, 1, 0]);
        assert!(status.connected);
        assert_eq!(status.battery_level, 85);
        assert!(status.paper_loaded);
        assert_eq!(status.error, None);
        assert!(!status.stale);
        assert!(status.ready_to_print());
    }

    #[test]
    fn test_parse_status_clamps_battery() {
        assert_eq!(parse_status([250, 1, 0]).battery_level, 100);
    }

    #[test]
    fn test_paper_flag_is_exactly_one() {
        assert!(!parse_status([50, 0, 0]).paper_loaded);
        assert!(!parse_status([50, 2, 0]).paper_loaded);
    }

    #[test]
    fn test_error_table() {
        assert_eq!(ErrorCode::from_byte(0), None);
        assert_eq!(ErrorCode::from_byte(1), Some(ErrorCode::PaperJam));
        assert_eq!(ErrorCode::from_byte(2), Some(ErrorCode::OutOfPaper));
        assert_eq!(ErrorCode::from_byte(3), Some(ErrorCode::Overheating));
        assert_eq!(ErrorCode::from_byte(4), Some(ErrorCode::LowBattery));
        assert_eq!(ErrorCode::from_byte(5), Some(ErrorCode::CommunicationError));
        assert_eq!(ErrorCode::from_byte(42), Some(ErrorCode::Unknown(42)));
        assert_eq!(ErrorCode::Unknown(42).to_byte(), 42);
        assert!(ErrorCode::Unknown(42).to_string().contains("42"));
    }

    #[test]
    fn test_blocking_errors() {
        let low = parse_status([10, 1, 4]);
        assert!(low.ready_to_print());
        assert_eq!(low.blocking_error(), None);

        let jam = parse_status([90, 1, 1]);
        assert!(!jam.ready_to_print());
        assert_eq!(jam.blocking_error(), Some(ErrorCode::PaperJam));

        let empty = parse_status([90, 0, 0]);
        assert_eq!(empty.blocking_error(), Some(ErrorCode::OutOfPaper));
    }
}
