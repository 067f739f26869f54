//! SensorTag hub daemon.
//!
//! Wires the lifecycle manager from `taghub-core` to a TOML configuration
//! and an InfluxDB line-protocol UDP sink. The binary lives in `main.rs`;
//! this library exposes the pieces for testing.

pub mod config;
pub mod influx;

pub use config::{Config, ConfigError};
pub use influx::LineProtocolSink;
