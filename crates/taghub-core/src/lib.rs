//! BLE session management for TI SensorTag peripherals.
//!
//! This crate is the device lifecycle manager of the hub: it discovers
//! nearby tags, maintains one connection per tag, subscribes to their
//! measurement notifications, decodes payloads, and hands records to a
//! measurement sink. Each tag is driven by its own state machine through
//! discovery → connection → service resolution → subscription → active
//! reception → reconnection on failure, while all radio-exclusive adapter
//! operations (scanning, connecting) are serialized through a single gate.
//!
//! # Architecture
//!
//! - [`transport`]: capability traits over the Bluetooth stack, with the
//!   production btleplug binding in [`btle`] and a scripted in-memory
//!   implementation in [`mock`]
//! - [`gate`]: FIFO serialization of radio-exclusive operations
//! - [`session`]: per-tag lifecycle state machine
//! - [`registry`]: identity → session table, at most one session per tag
//! - [`scanner`]: recurring discovery scan cycle
//! - [`sink`]: measurement consumer interface with bounded-retry delivery
//! - [`hub`]: wiring of the above into one runnable unit
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use taghub_core::btle::BtleTransport;
//! use taghub_core::mock::MemorySink;
//! use taghub_core::{HubConfig, TagHub};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(BtleTransport::new(None).await?);
//!     let sink = Arc::new(MemorySink::new());
//!     let hub = TagHub::new(transport, sink, HubConfig::default());
//!
//!     let cancel = CancellationToken::new();
//!     hub.run(cancel).await?;
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod btle;
pub mod error;
pub mod events;
pub mod gate;
pub mod hub;
pub mod mock;
pub mod registry;
pub mod scanner;
pub mod session;
pub mod sink;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use error::{Error, Result};
pub use events::{EventBus, EventReceiver, EventSender, SessionEvent};
pub use gate::{RadioGate, RadioPermit};
pub use hub::{HubConfig, TagHub};
pub use registry::SessionRegistry;
pub use scanner::{ScanConfig, ScanCoordinator};
pub use session::{LinkTimeouts, LostReason, SessionConfig, SessionHandle, SessionState};
pub use sink::{MeasurementSink, SinkOptions, SinkWriter};
pub use transport::{Advertisement, DeviceLink, Notification, NotificationStream, RadioTransport};

// Re-export the data model for convenience.
pub use taghub_types::{
    decode, decode_motion, AccelRange, DecodeError, DeviceIdentity, Measurement,
    MeasurementRecord, SensorChannel,
};
