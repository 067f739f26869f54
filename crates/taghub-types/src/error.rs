//! Error types for payload decoding.

use thiserror::Error;

use crate::channel::SensorChannel;

/// Errors that can occur when decoding a raw sensor payload.
///
/// Decoding never fabricates a value: a payload that does not match the
/// channel's byte layout exactly is rejected.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    /// Payload length does not match the channel's fixed layout.
    #[error("{channel} payload has wrong length: expected {expected} bytes, got {actual}")]
    WrongLength {
        /// The channel being decoded.
        channel: SensorChannel,
        /// Expected payload size.
        expected: usize,
        /// Actual payload size received.
        actual: usize,
    },

    /// All-zero payload, emitted by a sensor that has not produced its
    /// first conversion yet.
    #[error("{channel} payload is all zeros (sensor not ready)")]
    NotReady {
        /// The channel being decoded.
        channel: SensorChannel,
    },

    /// Encoded value is outside the channel's valid range.
    #[error("{channel} value out of range: {detail}")]
    OutOfRange {
        /// The channel being decoded.
        channel: SensorChannel,
        /// Description of the invalid value.
        detail: String,
    },
}

/// Result type alias using [`DecodeError`].
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;
