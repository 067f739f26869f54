//! Session lifecycle tests against the mock transport.
//!
//! These cover the behaviors the hub has to get right with a single shared
//! radio: one session per identity, reconnect-with-backoff, terminal Lost
//! handling, parked incompatible devices, and sink failure isolation.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use taghub_core::mock::{MemorySink, MockPeer, MockTransport};
use taghub_core::{
    Advertisement, BackoffPolicy, DeviceIdentity, EventBus, LinkTimeouts, Measurement, RadioGate,
    ScanConfig, ScanCoordinator, SensorChannel, SessionConfig, SessionRegistry, SessionState,
    SinkOptions, SinkWriter,
};

const ADDRESS: &str = "B0:91:22:F7:05:1C";
const WAIT: Duration = Duration::from_secs(5);

fn fast_config(channels: Vec<SensorChannel>) -> SessionConfig {
    SessionConfig {
        channels,
        backoff: BackoffPolicy::fixed(Duration::from_millis(10)),
        timeouts: LinkTimeouts {
            connect: Duration::from_millis(250),
            resolve: Duration::from_millis(250),
            subscribe: Duration::from_millis(250),
        },
        max_consecutive_failures: 3,
        max_unreachable: Duration::from_secs(60),
        ..Default::default()
    }
}

fn sink_options() -> SinkOptions {
    SinkOptions {
        write_timeout: Duration::from_millis(250),
        max_attempts: 1,
        retry_delay: Duration::from_millis(1),
    }
}

struct Harness {
    transport: Arc<MockTransport>,
    sink: Arc<MemorySink>,
    registry: Arc<SessionRegistry>,
    cancel: CancellationToken,
    reaper: Option<JoinHandle<()>>,
}

impl Harness {
    fn new(config: SessionConfig, with_reaper: bool) -> Self {
        let transport = MockTransport::new();
        let sink = Arc::new(MemorySink::new());
        let registry = SessionRegistry::new(
            transport.clone(),
            Arc::new(RadioGate::new()),
            SinkWriter::new(sink.clone(), sink_options()),
            config,
            EventBus::default(),
        );
        let cancel = CancellationToken::new();
        let reaper = with_reaper
            .then(|| tokio::spawn(Arc::clone(&registry).reap(cancel.child_token())));
        Self {
            transport,
            sink,
            registry,
            cancel,
            reaper,
        }
    }

    fn advertisement(&self) -> Advertisement {
        Advertisement {
            identity: DeviceIdentity::new(ADDRESS),
            local_name: Some("CC2650 SensorTag".to_string()),
            rssi: Some(-55),
            services: vec![taghub_types::uuid::MOTION_SERVICE],
        }
    }

    async fn teardown(mut self) {
        self.cancel.cancel();
        self.registry.shutdown().await;
        if let Some(reaper) = self.reaper.take() {
            let _ = reaper.await;
        }
    }
}

/// 24576 * 165/65536 - 40 = 21.875 °C, 32768 * 100/65536 = 50 %RH.
const HUMIDITY_PAYLOAD: [u8; 4] = [0x00, 0x60, 0x00, 0x80];

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn session_reaches_active_and_delivers_measurements() {
    let harness = Harness::new(
        fast_config(vec![SensorChannel::Humidity, SensorChannel::Battery]),
        false,
    );
    let peer = harness.transport.add_peer(MockPeer::new(ADDRESS));

    assert!(harness.registry.observe(&harness.advertisement()).await);
    let handle = harness
        .registry
        .get(&DeviceIdentity::new(ADDRESS))
        .await
        .expect("session should exist");
    assert!(handle.wait_for(SessionState::Active, WAIT).await);

    // The humidity sensor got its period, subscription, and enable write;
    // battery has no config characteristic so it was only subscribed.
    let subscriptions = peer.subscriptions();
    assert!(subscriptions.contains(&SensorChannel::Humidity.data_uuid()));
    assert!(subscriptions.contains(&SensorChannel::Battery.data_uuid()));
    let written: Vec<_> = peer.written();
    assert!(
        written
            .iter()
            .any(|(uuid, value)| *uuid == SensorChannel::Humidity.config_uuid().unwrap()
                && value == &[0x01])
    );
    assert!(
        written
            .iter()
            .any(|(uuid, value)| *uuid == SensorChannel::Humidity.period_uuid().unwrap()
                && value == &[0xFF])
    );

    assert!(peer.push(SensorChannel::Humidity, &HUMIDITY_PAYLOAD));
    assert!(peer.push(SensorChannel::Battery, &[87]));

    let sink = harness.sink.clone();
    assert!(wait_until(|| sink.records().len() == 2).await);

    let records = harness.sink.records();
    assert_eq!(records[0].device, DeviceIdentity::new(ADDRESS));
    assert_eq!(
        records[0].measurement,
        Measurement::Humidity {
            temperature_c: 21.875,
            humidity_pct: 50.0
        }
    );
    assert_eq!(records[1].measurement, Measurement::Battery { level_pct: 87 });

    harness.teardown().await;
}

#[tokio::test]
async fn link_loss_triggers_reconnect_back_to_active() {
    let harness = Harness::new(fast_config(vec![SensorChannel::Humidity]), false);
    let peer = harness.transport.add_peer(MockPeer::new(ADDRESS));

    harness.registry.observe(&harness.advertisement()).await;
    let handle = harness
        .registry
        .get(&DeviceIdentity::new(ADDRESS))
        .await
        .expect("session should exist");
    assert!(handle.wait_for(SessionState::Active, WAIT).await);
    assert_eq!(peer.connect_count(), 1);

    peer.drop_link();

    let peer_probe = peer.clone();
    assert!(wait_until(move || peer_probe.connect_count() >= 2).await);
    assert!(handle.wait_for(SessionState::Active, WAIT).await);

    // The reconnected link delivers measurements as before.
    assert!(peer.push(SensorChannel::Humidity, &HUMIDITY_PAYLOAD));
    let sink = harness.sink.clone();
    assert!(wait_until(|| !sink.records().is_empty()).await);

    harness.teardown().await;
}

#[tokio::test]
async fn unresponsive_device_is_lost_and_rediscovery_starts_fresh() {
    let harness = Harness::new(fast_config(vec![SensorChannel::Humidity]), true);
    let peer = harness.transport.add_peer(MockPeer::new(ADDRESS));
    peer.fail_connects(u32::MAX);

    harness.registry.observe(&harness.advertisement()).await;
    let first = harness
        .registry
        .get(&DeviceIdentity::new(ADDRESS))
        .await
        .expect("session should exist");

    assert!(first.wait_for(SessionState::Lost, WAIT).await);

    // The reaper removes the entry, making room for a fresh session.
    let registry = Arc::clone(&harness.registry);
    let identity = DeviceIdentity::new(ADDRESS);
    let deadline = tokio::time::Instant::now() + WAIT;
    while registry.get(&identity).await.is_some() {
        assert!(tokio::time::Instant::now() < deadline, "entry not removed");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    peer.fail_connects(0);
    assert!(harness.registry.observe(&harness.advertisement()).await);
    let second = harness
        .registry
        .get(&identity)
        .await
        .expect("fresh session should exist");
    assert!(!second.same_session(&first));
    assert!(second.wait_for(SessionState::Active, WAIT).await);

    harness.teardown().await;
}

#[tokio::test]
async fn concurrent_discovery_reports_create_one_session() {
    let harness = Harness::new(fast_config(vec![SensorChannel::Humidity]), false);
    harness.transport.add_peer(MockPeer::new(ADDRESS));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let registry = Arc::clone(&harness.registry);
        tasks.push(tokio::spawn(async move {
            registry.lookup_or_create(&DeviceIdentity::new(ADDRESS)).await
        }));
    }

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }

    assert_eq!(harness.registry.session_count().await, 1);
    for handle in &handles[1..] {
        assert!(handle.same_session(&handles[0]));
    }

    harness.teardown().await;
}

#[tokio::test]
async fn missing_channel_parks_session_without_retry_loop() {
    let harness = Harness::new(
        fast_config(vec![SensorChannel::Humidity, SensorChannel::Pressure]),
        true,
    );
    let peer = harness.transport.add_peer(MockPeer::new(ADDRESS));
    peer.remove_channel(SensorChannel::Pressure);

    harness.registry.observe(&harness.advertisement()).await;
    let handle = harness
        .registry
        .get(&DeviceIdentity::new(ADDRESS))
        .await
        .expect("session should exist");
    assert!(handle.wait_for(SessionState::Lost, WAIT).await);

    // Parked, not removed: rediscovery must not spawn a new session that
    // would loop forever against a device that will never match.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!harness.registry.observe(&harness.advertisement()).await);
    assert_eq!(harness.registry.session_count().await, 1);
    assert_eq!(peer.connect_count(), 1);

    harness.teardown().await;
}

#[tokio::test]
async fn rejected_notification_enablement_parks_session() {
    let harness = Harness::new(fast_config(vec![SensorChannel::Temperature]), true);
    let peer = harness.transport.add_peer(MockPeer::new(ADDRESS));
    peer.refuse_subscribe(SensorChannel::Temperature.data_uuid());

    harness.registry.observe(&harness.advertisement()).await;
    let handle = harness
        .registry
        .get(&DeviceIdentity::new(ADDRESS))
        .await
        .expect("session should exist");
    assert!(handle.wait_for(SessionState::Lost, WAIT).await);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(peer.connect_count(), 1);

    harness.teardown().await;
}

#[tokio::test]
async fn bad_payload_is_dropped_without_tearing_down_the_session() {
    let harness = Harness::new(fast_config(vec![SensorChannel::Humidity]), false);
    let peer = harness.transport.add_peer(MockPeer::new(ADDRESS));

    harness.registry.observe(&harness.advertisement()).await;
    let handle = harness
        .registry
        .get(&DeviceIdentity::new(ADDRESS))
        .await
        .expect("session should exist");
    assert!(handle.wait_for(SessionState::Active, WAIT).await);

    // Truncated payload, then the all-zero warm-up sentinel, then a real one.
    assert!(peer.push(SensorChannel::Humidity, &[0x00, 0x60]));
    assert!(peer.push(SensorChannel::Humidity, &[0x00, 0x00, 0x00, 0x00]));
    assert!(peer.push(SensorChannel::Humidity, &HUMIDITY_PAYLOAD));

    let sink = harness.sink.clone();
    assert!(wait_until(|| !sink.records().is_empty()).await);
    assert_eq!(harness.sink.records().len(), 1);
    assert_eq!(handle.state(), SessionState::Active);
    assert_eq!(peer.connect_count(), 1);

    harness.teardown().await;
}

#[tokio::test]
async fn sink_failures_drop_records_but_leave_connectivity_alone() {
    let harness = Harness::new(fast_config(vec![SensorChannel::Battery]), false);
    let peer = harness.transport.add_peer(MockPeer::new(ADDRESS));

    harness.registry.observe(&harness.advertisement()).await;
    let handle = harness
        .registry
        .get(&DeviceIdentity::new(ADDRESS))
        .await
        .expect("session should exist");
    assert!(handle.wait_for(SessionState::Active, WAIT).await);

    harness.sink.fail_next(3);
    for level in [10u8, 20, 30, 40] {
        assert!(peer.push(SensorChannel::Battery, &[level]));
    }

    let sink = harness.sink.clone();
    assert!(wait_until(|| sink.write_attempts() == 4).await);

    // Three records dropped with a log line, the fourth stored; the
    // session's connectivity state never wavered.
    let records = harness.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].measurement, Measurement::Battery { level_pct: 40 });
    assert_eq!(handle.state(), SessionState::Active);
    assert_eq!(peer.connect_count(), 1);

    harness.teardown().await;
}

#[tokio::test]
async fn scanner_deduplicates_and_ignores_unrelated_devices() {
    let harness = Harness::new(fast_config(vec![SensorChannel::Humidity]), false);
    harness.transport.add_peer(MockPeer::new(ADDRESS));
    harness.transport.add_advertisement(Advertisement {
        identity: DeviceIdentity::new("11:22:33:44:55:66"),
        local_name: Some("Fitness Band".to_string()),
        rssi: Some(-70),
        services: vec![taghub_types::uuid::BATTERY_SERVICE],
    });
    // A tag, but too weak to be worth a session.
    harness.transport.add_advertisement(Advertisement {
        identity: DeviceIdentity::new("77:88:99:AA:BB:CC"),
        local_name: Some("CC2650 SensorTag".to_string()),
        rssi: Some(-120),
        services: vec![taghub_types::uuid::MOTION_SERVICE],
    });

    let scanner = ScanCoordinator::new(
        harness.transport.clone(),
        Arc::new(RadioGate::new()),
        Arc::clone(&harness.registry),
        ScanConfig {
            duration: Duration::from_millis(1),
            interval: Duration::from_millis(10),
            max_consecutive_failures: 5,
            ..Default::default()
        },
    );

    let cancel = CancellationToken::new();
    let scan_cancel = cancel.clone();
    let scan_task = tokio::spawn(async move { scanner.run(scan_cancel).await });

    let transport = harness.transport.clone();
    assert!(wait_until(move || transport.scan_count() >= 4).await);
    cancel.cancel();
    scan_task.await.unwrap().unwrap();

    // Repeated sightings of a managed tag spawn no extra sessions, and the
    // unrelated advertiser is never reported at all.
    assert_eq!(harness.registry.session_count().await, 1);
    assert!(
        harness
            .registry
            .get(&DeviceIdentity::new("11:22:33:44:55:66"))
            .await
            .is_none()
    );

    harness.teardown().await;
}

#[tokio::test]
async fn adapter_busy_defers_scan_cycle() {
    let harness = Harness::new(fast_config(vec![SensorChannel::Humidity]), false);
    harness.transport.add_peer(MockPeer::new(ADDRESS));
    harness.transport.fail_scans(2);

    let scanner = ScanCoordinator::new(
        harness.transport.clone(),
        Arc::new(RadioGate::new()),
        Arc::clone(&harness.registry),
        ScanConfig {
            duration: Duration::from_millis(1),
            interval: Duration::from_millis(10),
            max_consecutive_failures: 5,
            ..Default::default()
        },
    );

    let cancel = CancellationToken::new();
    let scan_cancel = cancel.clone();
    let scan_task = tokio::spawn(async move { scanner.run(scan_cancel).await });

    // Two failed cycles are tolerated; discovery succeeds on the third.
    let registry = Arc::clone(&harness.registry);
    let identity = DeviceIdentity::new(ADDRESS);
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if registry.get(&identity).await.is_some() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "tag never discovered");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    cancel.cancel();
    scan_task.await.unwrap().unwrap();
    harness.teardown().await;
}

#[tokio::test]
async fn persistent_adapter_failure_is_fatal() {
    let harness = Harness::new(fast_config(vec![SensorChannel::Humidity]), false);
    harness.transport.fail_scans(u32::MAX);

    let scanner = ScanCoordinator::new(
        harness.transport.clone(),
        Arc::new(RadioGate::new()),
        Arc::clone(&harness.registry),
        ScanConfig {
            duration: Duration::from_millis(1),
            interval: Duration::from_millis(5),
            max_consecutive_failures: 3,
            ..Default::default()
        },
    );

    let result = scanner.run(CancellationToken::new()).await;
    assert!(matches!(result, Err(taghub_core::Error::Adapter(_))));

    harness.teardown().await;
}

#[tokio::test]
async fn operator_removal_cancels_queued_session() {
    let harness = Harness::new(fast_config(vec![SensorChannel::Humidity]), true);
    let peer = harness.transport.add_peer(MockPeer::new(ADDRESS));
    peer.fail_connects(u32::MAX);

    harness.registry.observe(&harness.advertisement()).await;
    let identity = DeviceIdentity::new(ADDRESS);
    let handle = harness
        .registry
        .get(&identity)
        .await
        .expect("session should exist");

    // Removal while the session is between retries abandons its pending
    // radio work without side effects.
    harness.registry.mark_lost(&identity).await;
    assert!(handle.is_lost() || handle.wait_for(SessionState::Lost, WAIT).await);
    assert!(harness.registry.get(&identity).await.is_none());

    harness.teardown().await;
}
