//! Mock transport and sink for testing without BLE hardware.
//!
//! [`MockTransport`] implements [`RadioTransport`] over scripted in-memory
//! peers: connect failures, missing characteristics, and subscription
//! refusals can be injected, and notifications are pushed by the test.
//! [`MemorySink`] implements [`MeasurementSink`] with failure injection.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use taghub_types::{DeviceIdentity, MeasurementRecord, SensorChannel};

use crate::error::{Error, Result};
use crate::sink::MeasurementSink;
use crate::transport::{
    Advertisement, DeviceLink, Notification, NotificationStream, RadioTransport,
};

/// A scripted in-memory peripheral.
pub struct MockPeer {
    identity: DeviceIdentity,
    characteristics: Mutex<Vec<Uuid>>,
    refuse_subscribe: Mutex<HashSet<Uuid>>,
    connect_failures: AtomicU32,
    connects: AtomicU32,
    connected: AtomicBool,
    writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
    subscriptions: Mutex<Vec<Uuid>>,
    link_tx: Mutex<Option<mpsc::UnboundedSender<Notification>>>,
}

impl MockPeer {
    /// Create a peer exposing the full SensorTag characteristic set.
    pub fn new(address: &str) -> Self {
        let mut characteristics = Vec::new();
        for channel in SensorChannel::ALL {
            characteristics.push(channel.data_uuid());
            characteristics.extend(channel.config_uuid());
            characteristics.extend(channel.period_uuid());
        }
        Self {
            identity: DeviceIdentity::new(address),
            characteristics: Mutex::new(characteristics),
            refuse_subscribe: Mutex::new(HashSet::new()),
            connect_failures: AtomicU32::new(0),
            connects: AtomicU32::new(0),
            connected: AtomicBool::new(false),
            writes: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            link_tx: Mutex::new(None),
        }
    }

    /// The peer's identity.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Fail the next `count` connect attempts.
    pub fn fail_connects(&self, count: u32) {
        self.connect_failures.store(count, Ordering::SeqCst);
    }

    /// Remove a channel's data characteristic, making the peer incompatible
    /// with configurations that require it.
    pub fn remove_channel(&self, channel: SensorChannel) {
        self.characteristics
            .lock()
            .unwrap()
            .retain(|uuid| *uuid != channel.data_uuid());
    }

    /// Refuse subscription attempts on a characteristic.
    pub fn refuse_subscribe(&self, characteristic: Uuid) {
        self.refuse_subscribe.lock().unwrap().insert(characteristic);
    }

    /// Push a notification payload for a channel into the current link.
    ///
    /// Returns `false` if no link is up.
    pub fn push(&self, channel: SensorChannel, payload: &[u8]) -> bool {
        self.push_raw(channel.data_uuid(), payload)
    }

    /// Push a notification for an arbitrary characteristic.
    pub fn push_raw(&self, characteristic: Uuid, payload: &[u8]) -> bool {
        let guard = self.link_tx.lock().unwrap();
        match guard.as_ref() {
            Some(tx) => tx
                .send(Notification {
                    uuid: characteristic,
                    value: payload.to_vec(),
                })
                .is_ok(),
            None => false,
        }
    }

    /// Drop the current link, ending its notification stream.
    pub fn drop_link(&self) {
        self.link_tx.lock().unwrap().take();
        self.connected.store(false, Ordering::SeqCst);
    }

    /// How many times a connection was established.
    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// All characteristic writes the peer has seen.
    pub fn written(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.writes.lock().unwrap().clone()
    }

    /// All subscriptions the peer has accepted.
    pub fn subscriptions(&self) -> Vec<Uuid> {
        self.subscriptions.lock().unwrap().clone()
    }

    fn try_connect(self: Arc<Self>) -> Result<Arc<dyn DeviceLink>> {
        let remaining = self.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.connect_failures.store(remaining - 1, Ordering::SeqCst);
            }
            return Err(Error::OutOfRange(self.identity.clone()));
        }

        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.link_tx.lock().unwrap() = Some(tx);

        Ok(Arc::new(MockLink {
            peer: Arc::clone(&self),
            rx: Mutex::new(Some(rx)),
        }))
    }
}

/// Scripted radio transport over a set of [`MockPeer`]s.
pub struct MockTransport {
    peers: Mutex<HashMap<DeviceIdentity, Arc<MockPeer>>>,
    extra_advertisements: Mutex<Vec<Advertisement>>,
    scan_failures: AtomicU32,
    scans: AtomicU32,
}

impl MockTransport {
    /// Create an empty transport.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            peers: Mutex::new(HashMap::new()),
            extra_advertisements: Mutex::new(Vec::new()),
            scan_failures: AtomicU32::new(0),
            scans: AtomicU32::new(0),
        })
    }

    /// Register a peer; it will appear in every scan.
    pub fn add_peer(&self, peer: MockPeer) -> Arc<MockPeer> {
        let peer = Arc::new(peer);
        self.peers
            .lock()
            .unwrap()
            .insert(peer.identity().clone(), Arc::clone(&peer));
        peer
    }

    /// Add a non-peer advertisement to scan results (e.g. an unrelated
    /// device the coordinator should ignore).
    pub fn add_advertisement(&self, advertisement: Advertisement) {
        self.extra_advertisements.lock().unwrap().push(advertisement);
    }

    /// Fail the next `count` scans with an adapter-busy error.
    pub fn fail_scans(&self, count: u32) {
        self.scan_failures.store(count, Ordering::SeqCst);
    }

    /// How many scans have been requested.
    pub fn scan_count(&self) -> u32 {
        self.scans.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RadioTransport for MockTransport {
    async fn scan(&self, _duration: Duration) -> Result<Vec<Advertisement>> {
        self.scans.fetch_add(1, Ordering::SeqCst);

        let remaining = self.scan_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.scan_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Adapter("adapter busy".to_string()));
        }

        let mut advertisements: Vec<Advertisement> = self
            .peers
            .lock()
            .unwrap()
            .values()
            .map(|peer| Advertisement {
                identity: peer.identity().clone(),
                local_name: Some("CC2650 SensorTag".to_string()),
                rssi: Some(-55),
                services: vec![taghub_types::uuid::MOTION_SERVICE],
            })
            .collect();
        advertisements.extend(self.extra_advertisements.lock().unwrap().iter().cloned());
        Ok(advertisements)
    }

    async fn connect(&self, identity: &DeviceIdentity) -> Result<Arc<dyn DeviceLink>> {
        let peer = self
            .peers
            .lock()
            .unwrap()
            .get(identity)
            .cloned()
            .ok_or_else(|| Error::OutOfRange(identity.clone()))?;
        peer.try_connect()
    }
}

struct MockLink {
    peer: Arc<MockPeer>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
}

#[async_trait]
impl DeviceLink for MockLink {
    async fn resolve_services(&self) -> Result<()> {
        Ok(())
    }

    async fn characteristics(&self) -> Vec<Uuid> {
        self.peer.characteristics.lock().unwrap().clone()
    }

    async fn write(&self, characteristic: Uuid, value: &[u8]) -> Result<()> {
        if !self.peer.connected.load(Ordering::SeqCst) {
            return Err(Error::LinkLost);
        }
        self.peer
            .writes
            .lock()
            .unwrap()
            .push((characteristic, value.to_vec()));
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        if self
            .peer
            .refuse_subscribe
            .lock()
            .unwrap()
            .contains(&characteristic)
        {
            return Err(Error::SubscribeRejected {
                characteristic,
                reason: "refused by peripheral".to_string(),
            });
        }
        if !self
            .peer
            .characteristics
            .lock()
            .unwrap()
            .contains(&characteristic)
        {
            return Err(Error::SubscribeRejected {
                characteristic,
                reason: "no such characteristic".to_string(),
            });
        }
        self.peer.subscriptions.lock().unwrap().push(characteristic);
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        let rx = self.rx.lock().unwrap().take().ok_or(Error::LinkLost)?;
        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|notification| (notification, rx))
        })))
    }

    async fn disconnect(&self) -> Result<()> {
        self.peer.drop_link();
        Ok(())
    }
}

/// In-memory measurement sink with failure injection.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<MeasurementRecord>>,
    fail_next: AtomicU32,
    attempts: AtomicU32,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` writes.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Records accepted so far.
    pub fn records(&self) -> Vec<MeasurementRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Total write attempts, including failed ones.
    pub fn write_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MeasurementSink for MemorySink {
    async fn write(&self, record: &MeasurementRecord) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::SinkUnavailable("injected failure".to_string()));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}
