//! Platform-agnostic types for TI SensorTag peripherals.
//!
//! This crate contains the data model shared by the hub and any consumers
//! of its measurement stream:
//!
//! - [`DeviceIdentity`]: stable identity of a tag across reconnections
//! - [`SensorChannel`]: the six sensor channels a tag exposes
//! - [`Measurement`] / [`MeasurementRecord`]: decoded physical values
//! - [`decode`]: pure conversion of raw notification payloads
//!
//! No Bluetooth types appear here; the BLE plumbing lives in `taghub-core`.

pub mod channel;
pub mod error;
pub mod identity;
pub mod measurement;
pub mod uuid;

pub use channel::{AccelRange, SensorChannel};
pub use error::DecodeError;
pub use identity::DeviceIdentity;
pub use measurement::{decode, decode_motion, Measurement, MeasurementRecord};
