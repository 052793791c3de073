//! # Print Jobs
//!
//! A job is one Braille payload bound for the device that was connected when
//! it was submitted.
//!
//! ```text
//! Queued ──▶ Printing ──▶ Completed
//!    │           │
//!    └───────────┴──▶ Error(JobFailure)
//! ```
//!
//! Progress only moves forward and reaches 100 only after the last chunk is
//! written.

pub mod pipeline;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::braille::DotCell;
use crate::error::BraillinkError;
use crate::status::ErrorCode;

pub use pipeline::{JobHandle, PrintPipeline};

pub type JobId = Uuid;

/// Why a job ended in `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum JobFailure {
    #[error("cancelled")]
    Cancelled,

    #[error("device disconnected")]
    Disconnected,

    #[error("no device connected")]
    NotConnected,

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("write timed out")]
    WriteTimeout,

    #[error("device reported: {0}")]
    DeviceReported(ErrorCode),
}

impl From<&BraillinkError> for JobFailure {
    fn from(err: &BraillinkError) -> Self {
        match err {
            BraillinkError::NotConnected => Self::Disconnected,
            BraillinkError::WriteTimeout(_) => Self::WriteTimeout,
            BraillinkError::DeviceReported(code) => Self::DeviceReported(*code),
            other => Self::Transfer(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Printing,
    Completed,
    Error(JobFailure),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error(_))
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        match self {
            Self::Error(reason) => Some(reason),
            _ => None,
        }
    }
}

/// What to print.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Translated with the grade-1 codec at submission
    Text(String),
    /// Already-translated cells, sent as-is
    Cells(Vec<DotCell>),
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<DotCell>> for Payload {
    fn from(cells: Vec<DotCell>) -> Self {
        Self::Cells(cells)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintJob {
    pub id: JobId,
    pub device_id: String,
    pub payload: Vec<DotCell>,
    pub status: JobStatus,
    /// Percent, never decreases
    pub progress: u8,
    /// Cells written so far
    pub dots_completed: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PrintJob {
    pub fn new(device_id: impl Into<String>, payload: Vec<DotCell>) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id: device_id.into(),
            payload,
            status: JobStatus::Queued,
            progress: 0,
            dots_completed: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn cell_count(&self) -> usize {
        self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_failure_from_error() {
        assert_eq!(JobFailure::from(&BraillinkError::NotConnected), JobFailure::Disconnected);
        assert_eq!(
            JobFailure::from(&BraillinkError::WriteTimeout(Duration::from_millis(5))),
            JobFailure::WriteTimeout
        );
        assert!(matches!(
            JobFailure::from(&BraillinkError::Transfer("boom".to_string())),
            JobFailure::Transfer(msg) if msg.contains("boom")
        ));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Printing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Error(JobFailure::Cancelled).is_terminal());
    }

    #[test]
    fn test_new_job_is_queued() {
        let job = PrintJob::new("dev", Vec::new());
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0);
        assert!(job.finished_at.is_none());
    }
}
