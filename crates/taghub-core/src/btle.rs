//! btleplug-backed radio transport.
//!
//! Binds the [`RadioTransport`]/[`DeviceLink`] capability traits to the
//! platform Bluetooth stack via btleplug. Scanning filters on the TI
//! movement service so unrelated advertisers never reach the registry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::time::sleep;
use tracing::{debug, info};
use uuid::Uuid;

use taghub_types::DeviceIdentity;

use crate::error::{Error, Result};
use crate::transport::{
    Advertisement, DeviceLink, Notification, NotificationStream, RadioTransport,
};

/// Radio transport over the platform Bluetooth stack.
pub struct BtleTransport {
    adapter: Adapter,
}

impl BtleTransport {
    /// Open the Bluetooth adapter.
    ///
    /// `identifier` selects among multiple adapters by index (`"0"`) or by
    /// a substring of the adapter's info string (`"hci1"`); `None` takes
    /// the first adapter. Fails with [`Error::Adapter`] when no adapter is
    /// available, which callers treat as an unrecoverable startup error.
    pub async fn new(identifier: Option<&str>) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        if adapters.is_empty() {
            return Err(Error::Adapter("no Bluetooth adapter available".to_string()));
        }

        let adapter = match identifier {
            None => adapters.into_iter().next(),
            Some(id) => {
                if let Ok(index) = id.parse::<usize>() {
                    adapters.into_iter().nth(index)
                } else {
                    let mut selected = None;
                    for adapter in adapters {
                        let info = adapter.adapter_info().await.unwrap_or_default();
                        if info.contains(id) {
                            selected = Some(adapter);
                            break;
                        }
                    }
                    selected
                }
            }
        };

        let adapter = adapter
            .ok_or_else(|| Error::Adapter(format!("adapter '{}' not found", identifier.unwrap_or("0"))))?;
        info!(
            adapter = %adapter.adapter_info().await.unwrap_or_else(|_| "unknown".to_string()),
            "Bluetooth adapter opened"
        );
        Ok(Self { adapter })
    }

    async fn find_peripheral(&self, identity: &DeviceIdentity) -> Result<Option<Peripheral>> {
        for peripheral in self.adapter.peripherals().await? {
            if let Ok(Some(properties)) = peripheral.properties().await {
                if DeviceIdentity::new(properties.address.to_string()) == *identity {
                    return Ok(Some(peripheral));
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl RadioTransport for BtleTransport {
    async fn scan(&self, duration: Duration) -> Result<Vec<Advertisement>> {
        let filter = ScanFilter {
            services: vec![taghub_types::uuid::MOTION_SERVICE],
        };
        self.adapter.start_scan(filter).await?;
        sleep(duration).await;
        self.adapter.stop_scan().await?;

        let mut discovered = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            let Ok(Some(properties)) = peripheral.properties().await else {
                continue;
            };
            discovered.push(Advertisement {
                identity: DeviceIdentity::new(properties.address.to_string()),
                local_name: properties.local_name,
                rssi: properties.rssi,
                services: properties.services,
            });
        }
        debug!(seen = discovered.len(), "scan finished");
        Ok(discovered)
    }

    async fn connect(&self, identity: &DeviceIdentity) -> Result<Arc<dyn DeviceLink>> {
        let peripheral = self
            .find_peripheral(identity)
            .await?
            .ok_or_else(|| Error::OutOfRange(identity.clone()))?;

        peripheral.connect().await?;
        debug!(device = %identity, "link established");

        Ok(Arc::new(BtleLink {
            peripheral,
            identity: identity.clone(),
        }))
    }
}

/// One established btleplug connection.
struct BtleLink {
    peripheral: Peripheral,
    identity: DeviceIdentity,
}

impl BtleLink {
    fn characteristic(&self, uuid: Uuid) -> Result<btleplug::api::Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|characteristic| characteristic.uuid == uuid)
            .ok_or_else(|| Error::Incompatible {
                identity: self.identity.clone(),
                detail: format!("characteristic {uuid} not present"),
            })
    }
}

#[async_trait]
impl DeviceLink for BtleLink {
    async fn resolve_services(&self) -> Result<()> {
        self.peripheral.discover_services().await?;
        Ok(())
    }

    async fn characteristics(&self) -> Vec<Uuid> {
        self.peripheral
            .characteristics()
            .into_iter()
            .map(|characteristic| characteristic.uuid)
            .collect()
    }

    async fn write(&self, characteristic: Uuid, value: &[u8]) -> Result<()> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral
            .write(&characteristic, value, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        let characteristic = self.characteristic(characteristic)?;
        self.peripheral.subscribe(&characteristic).await?;
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        let stream = self.peripheral.notifications().await?;
        Ok(Box::pin(stream.map(|notification| Notification {
            uuid: notification.uuid,
            value: notification.value,
        })))
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}
