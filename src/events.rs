//! # Event Channel
//!
//! Lifecycle events for UI and notification layers, fanned out over a
//! `tokio::sync::broadcast` channel. Each subscriber sees events in publish
//! order. Dropping a receiver unsubscribes it; a subscriber that falls more
//! than `capacity` events behind gets `RecvError::Lagged` and skips ahead.

use log::trace;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::device::{ConnectionState, Device, DiscoverySource};
use crate::job::{JobFailure, JobId};
use crate::status::DeviceStatus;

/// Default broadcast buffer.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    ScanStarted,
    /// First sighting of a device during the current scan
    DeviceDiscovered { device: Device },
    ScanStopped { found: usize, source: DiscoverySource },
    ConnectionStateChanged { state: ConnectionState },
    DeviceConnected { device: Device },
    DeviceDisconnected { device_id: String },
    ConnectionFailed { device_id: String, reason: String },
    PrintQueued { job_id: JobId },
    PrintStarted { job_id: JobId },
    PrintProgress { job_id: JobId, percent: u8 },
    PrintCompleted { job_id: JobId },
    PrintError { job_id: JobId, reason: JobFailure },
    StatusUpdated { status: DeviceStatus },
}

impl Event {
    /// Job the event belongs to, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Self::PrintQueued { job_id }
            | Self::PrintStarted { job_id }
            | Self::PrintProgress { job_id, .. }
            | Self::PrintCompleted { job_id }
            | Self::PrintError { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }
}

/// Cloneable publisher handle. All clones share one channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn publish(&self, event: Event) {
        trace!("event: {:?}", event);
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
