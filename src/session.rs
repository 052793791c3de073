//! # Session
//!
//! Wires one radio to the full stack: event bus, connection manager, status
//! poller and print pipeline, all sharing a single configuration.
//!
//! ```no_run
//! use std::sync::Arc;
//! use braillink::{BraillinkConfig, Session};
//! use braillink::device::simulated::SimulatedRadio;
//!
//! # async fn demo() -> braillink::Result<()> {
//! let session = Session::new(Arc::new(SimulatedRadio::reference()), BraillinkConfig::default());
//! let found = session.manager().scan(session.config().discovery.scan_timeout()).await?;
//! session.manager().connect(&found.devices[0].id).await?;
//!
//! let mut job = session.submit_print_request_text("Hello 42")?;
//! println!("{:?}", job.wait().await);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::braille::DotCell;
use crate::config::BraillinkConfig;
use crate::device::{ConnectionManager, Radio};
use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::job::{JobHandle, PrintPipeline};
use crate::pairing::PairingStore;
use crate::status::StatusPoller;

pub struct Session {
    config: BraillinkConfig,
    events: EventBus,
    manager: Arc<ConnectionManager>,
    poller: Arc<StatusPoller>,
    pipeline: PrintPipeline,
    polling: CancellationToken,
}

impl Session {
    /// Build a session. Must be called inside a Tokio runtime.
    pub fn new(radio: Arc<dyn Radio>, config: BraillinkConfig) -> Self {
        Self::build(ConnectionManager::new(
            radio,
            config.discovery.clone(),
            EventBus::new(config.events.capacity),
        ), config)
    }

    /// Build a session that records connections for `user`.
    pub fn with_pairing_store(
        radio: Arc<dyn Radio>,
        config: BraillinkConfig,
        store: Arc<dyn PairingStore>,
        user: impl Into<String>,
    ) -> Self {
        let manager = ConnectionManager::new(
            radio,
            config.discovery.clone(),
            EventBus::new(config.events.capacity),
        )
        .with_pairing_store(store, user);
        Self::build(manager, config)
    }

    fn build(manager: ConnectionManager, config: BraillinkConfig) -> Self {
        let events = manager.events().clone();
        let manager = Arc::new(manager);
        let poller = Arc::new(StatusPoller::new(
            Arc::clone(&manager),
            events.clone(),
            config.status.clone(),
        ));
        let pipeline = PrintPipeline::new(
            Arc::clone(&manager),
            Some(Arc::clone(&poller)),
            events.clone(),
            config.link.clone(),
            config.jobs.clone(),
        );
        Self {
            config,
            events,
            manager,
            poller,
            pipeline,
            polling: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &BraillinkConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn poller(&self) -> &Arc<StatusPoller> {
        &self.poller
    }

    pub fn pipeline(&self) -> &PrintPipeline {
        &self.pipeline
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Translate `text` and queue it for the connected device.
    pub fn submit_print_request_text(&self, text: &str) -> Result<JobHandle> {
        self.pipeline.submit_text(text)
    }

    /// Queue pre-translated cells for the connected device.
    pub fn submit_print_request_cells(&self, cells: Vec<DotCell>) -> Result<JobHandle> {
        self.pipeline.submit_cells(cells)
    }

    /// Start background status polling at the configured interval. Stops
    /// when the session is dropped.
    pub fn start_polling(&self) -> JoinHandle<()> {
        Arc::clone(&self.poller).spawn_polling(
            self.config.status.poll_interval(),
            self.polling.child_token(),
        )
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.polling.cancel();
    }
}
