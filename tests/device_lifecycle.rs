//! # Device Lifecycle Tests
//!
//! Connection manager state transitions, fallback discovery, pairing
//! records and status reads against the simulated radio.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use braillink::device::simulated::SimulatedRadio;
use braillink::device::{Advertisement, ConnectionManager, Link, Radio};
use braillink::pairing::{JsonFilePairingStore, PairingStore};
use braillink::{BraillinkError, ConnectionState, DiscoverySource, ErrorCode, Event, EventBus, Session};
use common::{EMBOSSER, SPARE, config, connected_session, drain, long_text, radio, session, wait_for};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

fn states(events: &[Event]) -> Vec<ConnectionState> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::ConnectionStateChanged { state } => Some(*state),
            _ => None,
        })
        .collect()
}

// ============================================================================
// STATE MACHINE
// ============================================================================

#[tokio::test]
async fn test_scan_then_connect_transitions() {
    let radio = radio();
    let session = session(&radio, config());
    let mut events = session.subscribe();
    let manager = session.manager();

    let result = manager.scan(Duration::from_millis(10)).await.unwrap();
    assert_eq!(result.source, DiscoverySource::Live);
    assert_eq!(result.devices[0].id, EMBOSSER);
    assert_eq!(result.devices[1].id, SPARE);

    let device = manager.connect(EMBOSSER).await.unwrap();
    assert_eq!(device.connection_state, ConnectionState::Connected);
    assert_eq!(manager.state(), ConnectionState::Connected);

    let events = drain(&mut events);
    assert_eq!(
        states(&events),
        vec![
            ConnectionState::Scanning,
            ConnectionState::Idle,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ]
    );
    assert!(matches!(events.first(), Some(Event::ConnectionStateChanged { .. })));
    assert!(events.iter().any(|e| matches!(e, Event::ScanStarted)));
    assert!(events.iter().any(|e| matches!(e, Event::ScanStopped { found: 2, .. })));
    assert!(events.iter().any(|e| matches!(e, Event::DeviceConnected { .. })));
}

#[tokio::test]
async fn test_discovery_events_are_deduplicated() {
    let radio = radio();
    let session = session(&radio, config());
    let mut events = session.subscribe();

    session.manager().scan(Duration::from_millis(10)).await.unwrap();
    session.manager().scan(Duration::from_millis(10)).await.unwrap();

    let discovered = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, Event::DeviceDiscovered { .. }))
        .count();
    // two devices, two scans
    assert_eq!(discovered, 4);
    assert_eq!(session.manager().discovered().len(), 2);
}

/// Radio that replays a fixed advertisement sequence and cannot connect.
struct ReplayRadio {
    sightings: Vec<Advertisement>,
}

#[async_trait]
impl Radio for ReplayRadio {
    async fn check_permissions(&self) -> braillink::Result<()> {
        Ok(())
    }

    async fn is_enabled(&self) -> bool {
        true
    }

    async fn enable(&self) -> braillink::Result<()> {
        Ok(())
    }

    async fn scan(
        &self,
        _timeout: Duration,
        found: mpsc::UnboundedSender<Advertisement>,
    ) -> braillink::Result<()> {
        for adv in &self.sightings {
            let _ = found.send(adv.clone());
        }
        Ok(())
    }

    async fn bonded_devices(&self) -> braillink::Result<Vec<Advertisement>> {
        Ok(Vec::new())
    }

    async fn is_paired(&self, _id: &str) -> braillink::Result<bool> {
        Ok(true)
    }

    async fn pair(&self, _id: &str) -> braillink::Result<()> {
        Ok(())
    }

    async fn connect(&self, id: &str) -> braillink::Result<Box<dyn Link>> {
        Err(BraillinkError::DeviceNotFound(id.to_string()))
    }
}

#[tokio::test]
async fn test_repeated_sightings_keep_latest_signal() {
    let sighting = |rssi| Advertisement {
        id: EMBOSSER.to_string(),
        name: Some("Desk Embosser".to_string()),
        rssi,
        paired: true,
    };
    let radio = ReplayRadio {
        sightings: vec![sighting(-90), sighting(-30), sighting(-60)],
    };
    let manager = ConnectionManager::new(
        Arc::new(radio),
        config().discovery,
        EventBus::default(),
    );
    let mut events = manager.events().subscribe();

    let result = manager.scan(Duration::from_millis(10)).await.unwrap();
    assert_eq!(result.devices.len(), 1);
    assert_eq!(result.devices[0].signal_strength, -60);
    assert_eq!(manager.discovered()[0].signal_strength, -60);

    let discovered = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, Event::DeviceDiscovered { .. }))
        .count();
    assert_eq!(discovered, 1);
}

#[tokio::test]
async fn test_connect_to_unknown_id_keeps_current_link() {
    let radio = radio();
    let session = connected_session(&radio, config()).await;
    let mut events = session.subscribe();

    assert!(matches!(
        session.manager().connect("00:11:62:DE:AD:00").await,
        Err(BraillinkError::DeviceNotFound(_))
    ));
    assert_eq!(session.manager().state(), ConnectionState::Connected);
    assert!(session.manager().is_connected());
    assert_eq!(radio.close_count(), 0);
    assert!(
        !drain(&mut events)
            .iter()
            .any(|e| matches!(e, Event::DeviceDisconnected { .. }))
    );
}

#[tokio::test]
async fn test_disconnect_ends_disconnected() {
    let radio = radio();
    let session = connected_session(&radio, config()).await;
    let mut events = session.subscribe();

    session.manager().disconnect().await;

    assert_eq!(session.manager().state(), ConnectionState::Disconnected);
    assert!(session.manager().connected_device().is_none());
    let events = drain(&mut events);
    assert_eq!(states(&events), vec![ConnectionState::Disconnected]);
    assert!(events.iter().any(
        |e| matches!(e, Event::DeviceDisconnected { device_id } if device_id == EMBOSSER)
    ));
}

#[tokio::test]
async fn test_disconnect_with_failing_teardown() {
    let radio = radio();
    let session = connected_session(&radio, config()).await;
    radio.set_faults(|f| f.fail_close = true);

    session.manager().disconnect().await;

    assert_eq!(session.manager().state(), ConnectionState::Disconnected);
    assert!(!session.manager().is_connected());
    assert_eq!(radio.close_count(), 1);
}

#[tokio::test]
async fn test_reconnect_after_disconnect() {
    let radio = radio();
    let session = connected_session(&radio, config()).await;
    session.manager().disconnect().await;

    session.manager().connect(EMBOSSER).await.unwrap();
    assert_eq!(session.manager().state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_connection_failure_returns_to_idle() {
    let radio = radio();
    radio.set_faults(|f| f.fail_connect = true);
    let session = session(&radio, config());
    let mut events = session.subscribe();

    assert!(session.manager().connect(EMBOSSER).await.is_err());

    let events = drain(&mut events);
    assert_eq!(
        states(&events),
        vec![
            ConnectionState::Connecting,
            ConnectionState::ConnectionFailed,
            ConnectionState::Idle,
        ]
    );
    assert!(events.iter().any(
        |e| matches!(e, Event::ConnectionFailed { device_id, .. } if device_id == EMBOSSER)
    ));
}

#[tokio::test]
async fn test_permission_denied_surfaces_immediately() {
    let radio = radio();
    radio.set_faults(|f| f.deny_permission = true);
    let session = session(&radio, config());
    let mut events = session.subscribe();

    assert!(matches!(
        session.manager().scan(Duration::from_secs(30)).await,
        Err(BraillinkError::PermissionDenied(_))
    ));
    assert!(drain(&mut events).is_empty());
}

// ============================================================================
// FALLBACK DISCOVERY
// ============================================================================

#[tokio::test]
async fn test_empty_scan_stays_live_by_default() {
    let session = session(&SimulatedRadio::new(), config());
    let result = session.manager().scan(Duration::from_millis(10)).await.unwrap();
    assert_eq!(result.source, DiscoverySource::Live);
    assert!(result.devices.is_empty());
}

#[tokio::test]
async fn test_fallback_devices_are_tagged_and_printable() {
    let mut config = config();
    config.discovery.allow_fallback_devices = true;
    let session = session(&SimulatedRadio::new(), config);
    let mut events = session.subscribe();

    let result = session.manager().scan(Duration::from_millis(10)).await.unwrap();
    assert!(result.is_fallback());
    assert!(result.devices.iter().all(|d| d.source == DiscoverySource::Fallback));

    let discovered: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            Event::DeviceDiscovered { device } => Some(device.source),
            _ => None,
        })
        .collect();
    assert!(!discovered.is_empty());
    assert!(discovered.iter().all(|s| *s == DiscoverySource::Fallback));

    let device = session.manager().connect(&result.devices[0].id).await.unwrap();
    assert_eq!(device.source, DiscoverySource::Fallback);

    let mut job = session.submit_print_request_text("demo").unwrap();
    assert_eq!(job.wait().await, braillink::JobStatus::Completed);
}

// ============================================================================
// PAIRING RECORDS
// ============================================================================

#[tokio::test]
async fn test_connection_is_recorded_for_user() {
    let path = std::env::temp_dir().join(format!("braillink-lifecycle-{}.json", uuid::Uuid::new_v4()));
    let store = Arc::new(JsonFilePairingStore::new(&path));
    let radio = radio();
    let session = Session::with_pairing_store(Arc::new(radio.clone()), config(), store.clone(), "sam");

    session.manager().scan(Duration::from_millis(10)).await.unwrap();
    session.manager().connect(SPARE).await.unwrap();
    assert!(radio.is_device_paired(SPARE));

    let records = store.get_last_known_devices("sam").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].device_id, SPARE);
    assert_eq!(records[0].display_name, "Spare Embosser");
    assert_eq!(session.manager().known_devices().unwrap(), records);

    let _ = std::fs::remove_file(&path);
}

// ============================================================================
// STATUS
// ============================================================================

#[tokio::test]
async fn test_status_read_and_stale_fallback() {
    let radio = radio();
    radio.set_status(EMBOSSER, [150, 1, 4]);
    let session = connected_session(&radio, config()).await;
    let poller = session.poller();

    let fresh = poller.read_status().await;
    assert!(fresh.connected);
    assert_eq!(fresh.battery_level, 100);
    assert_eq!(fresh.error, Some(ErrorCode::LowBattery));
    assert!(!fresh.stale);

    radio.set_faults(|f| f.fail_status_read = true);
    let stale = poller.read_status().await;
    assert!(stale.stale);
    assert_eq!(stale.battery_level, 100);
    assert_eq!(stale.error, Some(ErrorCode::LowBattery));
}

#[tokio::test]
async fn test_status_when_disconnected() {
    let radio = radio();
    let session = session(&radio, config());
    let status = session.poller().read_status().await;
    assert!(!status.connected);
    assert!(!status.stale);
}

#[tokio::test]
async fn test_status_read_on_lost_link_reports_disconnected() {
    let radio = radio();
    let session = connected_session(&radio, config()).await;
    let poller = session.poller();
    assert!(poller.read_status().await.connected);

    radio.drop_link();
    let status = poller.read_status().await;
    assert!(!status.connected);
    assert!(!status.stale);
    assert_eq!(poller.last_status(), None);
    assert_eq!(session.manager().state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_status_is_stale_while_link_busy() {
    let radio = radio();
    let session = connected_session(&radio, config()).await;
    let mut events = session.subscribe();
    radio.set_faults(|f| f.write_delay = Duration::from_millis(200));

    let mut job = session.submit_print_request_text(&long_text(3)).unwrap();
    wait_for(&mut events, |e| matches!(e, Event::PrintStarted { .. })).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let status = session.poller().read_status().await;
    assert!(status.stale);

    job.wait().await;
}

#[tokio::test]
async fn test_status_notification() {
    let radio = radio();
    let session = connected_session(&radio, config()).await;
    let mut events = session.subscribe();

    assert!(matches!(
        session.poller().apply_notification(&[10, 1]),
        Err(BraillinkError::InvalidInput(_))
    ));
    assert!(drain(&mut events).is_empty());

    let status = session.poller().apply_notification(&[60, 1, 1]).unwrap();
    assert_eq!(status.error, Some(ErrorCode::PaperJam));
    assert_eq!(session.poller().last_status(), Some(status.clone()));
    assert!(matches!(
        drain(&mut events).as_slice(),
        [Event::StatusUpdated { .. }]
    ));
}

#[tokio::test]
async fn test_background_polling_publishes_updates() {
    let radio = radio();
    let mut config = config();
    config.status.poll_interval_ms = 10;
    let session = connected_session(&radio, config).await;
    let mut events = session.subscribe();

    let handle = session.start_polling();
    let event = wait_for(&mut events, |e| matches!(e, Event::StatusUpdated { .. })).await;
    assert!(matches!(event, Event::StatusUpdated { status } if status.connected));

    drop(session);
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("polling stops with the session")
        .unwrap();
}
