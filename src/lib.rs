//! # Braillink - Braille Embosser Link Library
//!
//! Braillink translates text into six-dot Braille and streams it to a
//! Bluetooth embosser. It provides:
//!
//! - **Codec**: grade-1 text ↔ Braille cells with capital and numeral indicators
//! - **Transfer**: byte packing and link-sized chunking
//! - **Device**: discovery, pairing and connection lifecycle
//! - **Jobs**: a queued print pipeline with progress and cancellation
//! - **Status**: battery, paper and error reporting
//!
//! ## Quick Start
//!
//! ```
//! use braillink::braille;
//! use braillink::transfer;
//!
//! let translation = braille::encode("Hi 42");
//! assert_eq!(translation.unicode_string, "⠠⠓⠊⠀⠼⠙⠃");
//!
//! let chunks = transfer::chunk(&translation.cells, 4)?;
//! assert_eq!(chunks.len(), 2);
//!
//! assert_eq!(braille::decode_cells(&translation.cells), "Hi 42");
//! # Ok::<(), braillink::BraillinkError>(())
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`braille`] | Cell model, character table, encoder and decoder |
//! | [`transfer`] | Chunker and wire command bytes |
//! | [`device`] | Connection manager and radio backends |
//! | [`job`] | Print jobs and the print pipeline |
//! | [`status`] | Status parsing and polling |
//! | [`events`] | Lifecycle event channel |
//! | [`pairing`] | Remembered devices per user |
//! | [`session`] | Everything wired together |
//! | [`config`] | Tunables |
//! | [`error`] | Error types |

pub mod braille;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod job;
pub mod pairing;
pub mod session;
pub mod status;
pub mod transfer;

// Re-exports for convenience
pub use config::BraillinkConfig;
pub use device::{ConnectionManager, ConnectionState, Device, DiscoverySource};
pub use error::{BraillinkError, Result};
pub use events::{Event, EventBus};
pub use job::{JobFailure, JobHandle, JobStatus, PrintJob, PrintPipeline};
pub use session::Session;
pub use status::{DeviceStatus, ErrorCode, StatusPoller};

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
