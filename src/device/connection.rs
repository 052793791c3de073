//! Shared handle to the active link.
//!
//! The manager owns the handle; the pipeline and the status poller borrow a
//! clone of the `Arc` for the duration of one job or one read. All link I/O
//! goes through a single async mutex, so writes and status reads never
//! interleave on the wire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::timeout;

use super::backend::{Link, LinkInfo};
use super::Device;
use crate::error::{BraillinkError, Result};

pub struct Connection {
    device: Device,
    link: Box<dyn Link>,
    io: Mutex<()>,
    open: AtomicBool,
}

impl Connection {
    pub(crate) fn new(device: Device, link: Box<dyn Link>) -> Self {
        Self {
            device,
            link,
            io: Mutex::new(()),
            open: AtomicBool::new(true),
        }
    }

    /// Device snapshot taken when the connection was established.
    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    /// False once the manager has torn the connection down.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Open and the backend still reports the link up.
    pub async fn is_alive(&self) -> bool {
        self.is_open() && self.link.is_connected().await
    }

    /// Write one chunk or command, waiting for exclusive access to the link.
    pub async fn write(&self, data: &[u8], deadline: Duration) -> Result<()> {
        let _io = self.io.lock().await;
        if !self.is_open() {
            return Err(BraillinkError::NotConnected);
        }
        timeout(deadline, self.link.write(data))
            .await
            .map_err(|_| BraillinkError::WriteTimeout(deadline))?
    }

    /// Read the status triple without waiting for the link.
    ///
    /// Fails with `LinkBusy` if a write is in flight.
    pub async fn try_read_status(&self, deadline: Duration) -> Result<[u8; 3]> {
        let _io = self.io.try_lock().map_err(|_| BraillinkError::LinkBusy)?;
        if !self.is_open() {
            return Err(BraillinkError::NotConnected);
        }
        timeout(deadline, self.link.read_status())
            .await
            .map_err(|_| BraillinkError::ConnectionTimeout(deadline))?
    }

    pub(crate) async fn info(&self, deadline: Duration) -> Result<LinkInfo> {
        let _io = self.io.lock().await;
        timeout(deadline, self.link.info())
            .await
            .map_err(|_| BraillinkError::ConnectionTimeout(deadline))?
    }

    /// Mark closed, then tear down the link once in-flight I/O finishes.
    ///
    /// Only the first call reaches the backend.
    pub(crate) async fn close(&self) -> Result<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let _io = self.io.lock().await;
        self.link.close().await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("device", &self.device.id)
            .field("open", &self.is_open())
            .finish()
    }
}
