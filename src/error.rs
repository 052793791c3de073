//! # Error Types
//!
//! This module defines error types used throughout the braillink library.
//!
//! Codec and chunker errors are returned synchronously to the caller.
//! Connection and transfer errors surface both as a returned `Err` and, where
//! a job or connection is involved, as a terminal state change plus an event.

use std::time::Duration;

use thiserror::Error;

use crate::status::ErrorCode;

/// Main error type for braillink operations
#[derive(Debug, Error)]
pub enum BraillinkError {
    /// Radio or location permission not granted. Never retried internally.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No usable Bluetooth adapter (missing, powered off, tooling absent)
    #[error("Radio unavailable: {0}")]
    RadioUnavailable(String),

    /// Device id not present in the last scan or the bonded set
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Scan, pairing, or connect exceeded its deadline
    #[error("Connection timed out after {0:?}")]
    ConnectionTimeout(Duration),

    /// The device must be paired before this operation
    #[error("Pairing required for {0}")]
    PairingRequired(String),

    /// Pairing was attempted and rejected
    #[error("Pairing failed: {0}")]
    PairingFailed(String),

    /// No active connection
    #[error("Not connected to a device")]
    NotConnected,

    /// The link is in use by another operation
    #[error("Link busy")]
    LinkBusy,

    /// Mid-transfer write failure, carries the underlying cause
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// A single chunk write exceeded the per-write timeout
    #[error("Write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// Paper, battery, thermal or comm issue reported by the hardware itself
    #[error("Device reported error: {0}")]
    DeviceReported(ErrorCode),

    /// Malformed input (bad dot position, empty payload, zero chunk size)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Text contained characters with no Braille mapping
    #[error("Unmapped characters: {0:?}")]
    UnmappedCharacters(Vec<char>),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error wrapper
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used across the crate.
pub type Result<T, E = BraillinkError> = std::result::Result<T, E>;
