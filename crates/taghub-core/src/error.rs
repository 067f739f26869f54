//! Error types for taghub-core.
//!
//! Errors fall into a small number of categories with distinct handling:
//!
//! | Category | Variants | Handling |
//! |----------|----------|----------|
//! | Transient link | [`Error::Bluetooth`], [`Error::OutOfRange`], [`Error::Timeout`], [`Error::LinkLost`] | retried with backoff |
//! | Incompatible device | [`Error::Incompatible`] | logged once, session parked |
//! | Bad payload | [`Error::Decode`] | measurement dropped, session unaffected |
//! | Sink failure | [`Error::SinkUnavailable`] | record dropped after bounded retry |
//! | Adapter failure | [`Error::Adapter`] | scan cycle deferred; fatal past a threshold |
//!
//! Per-device errors never propagate to other devices' sessions; only
//! [`Error::Adapter`] is process-wide.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use taghub_types::{DecodeError, DeviceIdentity};

/// Errors that can occur while managing tag sessions.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error from the platform stack.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Device was not reachable for a connect attempt.
    #[error("device {0} not in range")]
    OutOfRange(DeviceIdentity),

    /// Operation exceeded its bounded wait.
    #[error("operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// The link to a connected device was lost.
    #[error("link to device lost")]
    LinkLost,

    /// The peripheral rejected a notification subscription.
    #[error("subscription to {characteristic} rejected: {reason}")]
    SubscribeRejected {
        /// The characteristic that could not be subscribed.
        characteristic: Uuid,
        /// The peripheral's reason, as reported by the stack.
        reason: String,
    },

    /// Device does not expose the expected services/characteristics.
    ///
    /// Not retried: a device that lacks a channel will never grow it.
    #[error("incompatible device {identity}: {detail}")]
    Incompatible {
        /// The offending device.
        identity: DeviceIdentity,
        /// What was missing or rejected.
        detail: String,
    },

    /// A notification payload could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The measurement sink could not accept a record.
    #[error("measurement sink unavailable: {0}")]
    SinkUnavailable(String),

    /// Radio-adapter-level failure; no per-device recovery is possible.
    #[error("Bluetooth adapter failure: {0}")]
    Adapter(String),

    /// Operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid configuration provided.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Whether a retry with backoff can plausibly succeed.
    ///
    /// Transient link errors are retried; device-shape and configuration
    /// errors are not. Adapter errors are handled at the process level.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Bluetooth(_) | Error::OutOfRange(_) | Error::Timeout { .. } | Error::LinkLost
        )
    }
}

/// Result type alias using taghub-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
