//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use braillink::device::simulated::{SimulatedDevice, SimulatedRadio};
use braillink::{BraillinkConfig, Event, Session};
use tokio::sync::broadcast;

pub const EMBOSSER: &str = "00:11:62:AA:BB:01";
pub const SPARE: &str = "00:11:62:AA:BB:02";

/// Radio with one paired embosser and one unpaired spare.
pub fn radio() -> SimulatedRadio {
    SimulatedRadio::new()
        .with_device(SimulatedDevice::new(EMBOSSER, "Desk Embosser", -48).paired())
        .with_device(SimulatedDevice::new(SPARE, "Spare Embosser", -75))
}

/// Fast timings so suites finish quickly.
pub fn config() -> BraillinkConfig {
    let mut config = BraillinkConfig::default();
    config.discovery.scan_timeout_ms = 10;
    config.discovery.connect_timeout_ms = 1_000;
    config.link.chunk_delay_ms = 1;
    config.link.write_timeout_ms = 1_000;
    config.status.read_timeout_ms = 200;
    config
}

pub fn session(radio: &SimulatedRadio, config: BraillinkConfig) -> Session {
    Session::new(Arc::new(radio.clone()), config)
}

pub async fn connected_session(radio: &SimulatedRadio, config: BraillinkConfig) -> Session {
    let session = session(radio, config);
    session
        .manager()
        .connect(EMBOSSER)
        .await
        .expect("connect to simulated embosser");
    session
}

/// Everything currently buffered on the receiver.
pub fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Wait for the first event matching `pred`, failing after two seconds.
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<Event>, mut pred: F) -> Event
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Text long enough to need several chunks.
pub fn long_text(words: usize) -> String {
    vec!["braille"; words].join(" ")
}
