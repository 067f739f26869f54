//! Radio transport capability interface.
//!
//! The platform Bluetooth stack is abstracted as a small capability set:
//! scan, connect, resolve services, subscribe, receive notifications,
//! disconnect. The production binding over btleplug lives in [`crate::btle`];
//! tests drive the same traits through [`crate::mock`].

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use uuid::Uuid;

use taghub_types::DeviceIdentity;

use crate::error::Result;

/// A device sighted during a discovery scan.
///
/// Ephemeral: consumed by the session registry immediately after the scan
/// cycle and not retained.
#[derive(Debug, Clone)]
pub struct Advertisement {
    /// Identity derived from the hardware address.
    pub identity: DeviceIdentity,
    /// Advertised local name, if present.
    pub local_name: Option<String>,
    /// Signal strength at discovery time.
    pub rssi: Option<i16>,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
}

impl Advertisement {
    /// Whether the advertisement carries the given service UUID.
    pub fn advertises(&self, service: Uuid) -> bool {
        self.services.contains(&service)
    }
}

/// A characteristic value pushed by a connected peripheral.
#[derive(Debug, Clone)]
pub struct Notification {
    /// The characteristic the value came from.
    pub uuid: Uuid,
    /// The raw payload.
    pub value: Vec<u8>,
}

/// Stream of notifications from one link. Ends when the link is lost.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Notification> + Send>>;

/// The shared radio's discovery and connection capabilities.
///
/// Implementations are not required to serialize calls themselves; callers
/// route radio-exclusive operations (scan, connect) through the
/// [`crate::gate::RadioGate`].
#[async_trait]
pub trait RadioTransport: Send + Sync {
    /// Run one discovery scan of the given duration and report sightings.
    async fn scan(&self, duration: Duration) -> Result<Vec<Advertisement>>;

    /// Establish a connection to the identified device.
    async fn connect(&self, identity: &DeviceIdentity) -> Result<Arc<dyn DeviceLink>>;
}

/// An established connection to one peripheral.
///
/// Exactly one live link exists per device identity; the owning session
/// holds it exclusively until disconnect.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Discover the peripheral's services and characteristics.
    async fn resolve_services(&self) -> Result<()>;

    /// UUIDs of all characteristics found by service resolution.
    async fn characteristics(&self) -> Vec<Uuid>;

    /// Write a value to a characteristic.
    async fn write(&self, characteristic: Uuid, value: &[u8]) -> Result<()>;

    /// Enable notifications on a characteristic.
    async fn subscribe(&self, characteristic: Uuid) -> Result<()>;

    /// The link's notification stream.
    ///
    /// May be taken once per link; the stream ends on link loss.
    async fn notifications(&self) -> Result<NotificationStream>;

    /// Tear the connection down.
    async fn disconnect(&self) -> Result<()>;
}
