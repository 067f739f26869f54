//! Decoded measurements and the raw payload decoder.
//!
//! Each sensor channel has a fixed manufacturer-specific byte layout.
//! Decoding is pure: the same payload always yields the same value, and a
//! payload that does not match the layout is rejected rather than guessed at.

use bytes::Buf;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::channel::{AccelRange, SensorChannel};
use crate::error::{DecodeError, DecodeResult};
use crate::identity::DeviceIdentity;

/// A decoded physical measurement from one sensor channel.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum Measurement {
    /// IR thermopile: object (target) and ambient (die) temperature in °C.
    Temperature {
        object_c: f32,
        ambient_c: f32,
    },
    /// Humidity sensor: on-chip temperature in °C and relative humidity in %.
    Humidity {
        temperature_c: f32,
        humidity_pct: f32,
    },
    /// Barometer: on-chip temperature in °C and pressure in hPa.
    Pressure {
        temperature_c: f32,
        pressure_hpa: f32,
    },
    /// 9-axis motion: gyroscope in deg/s, acceleration in g, magnetic field in µT.
    Motion {
        gyro_dps: [f32; 3],
        accel_g: [f32; 3],
        mag_ut: [f32; 3],
    },
    /// Ambient light in lux.
    Luminosity {
        lux: f32,
    },
    /// Battery charge in percent (0-100).
    Battery {
        level_pct: u8,
    },
}

impl Measurement {
    /// The channel this measurement came from.
    pub fn channel(&self) -> SensorChannel {
        match self {
            Measurement::Temperature { .. } => SensorChannel::Temperature,
            Measurement::Humidity { .. } => SensorChannel::Humidity,
            Measurement::Pressure { .. } => SensorChannel::Pressure,
            Measurement::Motion { .. } => SensorChannel::Motion,
            Measurement::Luminosity { .. } => SensorChannel::Luminosity,
            Measurement::Battery { .. } => SensorChannel::Battery,
        }
    }

    /// Flatten the measurement into named numeric fields.
    ///
    /// Field names follow the original logger's export schema, so downstream
    /// series keep their historical names.
    pub fn fields(&self) -> Vec<(&'static str, f64)> {
        match *self {
            Measurement::Temperature { object_c, ambient_c } => vec![
                ("temp_ir", f64::from(object_c)),
                ("temp_die", f64::from(ambient_c)),
            ],
            Measurement::Humidity { temperature_c, humidity_pct } => vec![
                ("temp_rh", f64::from(temperature_c)),
                ("humidity", f64::from(humidity_pct)),
            ],
            Measurement::Pressure { temperature_c, pressure_hpa } => vec![
                ("temp_p", f64::from(temperature_c)),
                ("pressure", f64::from(pressure_hpa)),
            ],
            Measurement::Motion { gyro_dps, accel_g, mag_ut } => vec![
                ("gyro_x", f64::from(gyro_dps[0])),
                ("gyro_y", f64::from(gyro_dps[1])),
                ("gyro_z", f64::from(gyro_dps[2])),
                ("acc_x", f64::from(accel_g[0])),
                ("acc_y", f64::from(accel_g[1])),
                ("acc_z", f64::from(accel_g[2])),
                ("mag_x", f64::from(mag_ut[0])),
                ("mag_y", f64::from(mag_ut[1])),
                ("mag_z", f64::from(mag_ut[2])),
            ],
            Measurement::Luminosity { lux } => vec![("lux", f64::from(lux))],
            Measurement::Battery { level_pct } => {
                vec![("battery_level", f64::from(level_pct))]
            }
        }
    }
}

/// A decoded measurement bound to the tag that produced it.
///
/// Records are immutable values: produced by the decoder, consumed once by
/// the measurement sink.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MeasurementRecord {
    /// The tag the measurement came from.
    pub device: DeviceIdentity,
    /// The decoded value(s).
    pub measurement: Measurement,
    /// When the notification carrying the payload arrived.
    pub captured_at: time::OffsetDateTime,
}

/// Decode a raw notification payload for the given channel.
///
/// Motion is decoded at the power-on ±2 g accelerometer range; use
/// [`decode_motion`] when a different range was configured.
///
/// # Errors
///
/// Returns [`DecodeError::WrongLength`] when the payload does not match the
/// channel's fixed size, [`DecodeError::NotReady`] for the all-zero payload
/// a sensor emits before its first conversion, and
/// [`DecodeError::OutOfRange`] for encodings outside the channel's domain.
#[must_use = "decoding returns a Result that should be handled"]
pub fn decode(channel: SensorChannel, data: &[u8]) -> DecodeResult<Measurement> {
    check_layout(channel, data)?;

    match channel {
        SensorChannel::Temperature => decode_temperature(data),
        SensorChannel::Humidity => decode_humidity(data),
        SensorChannel::Pressure => decode_pressure(data),
        SensorChannel::Motion => decode_motion_scaled(data, AccelRange::default()),
        SensorChannel::Luminosity => decode_luminosity(data),
        SensorChannel::Battery => decode_battery(data),
    }
}

/// Decode a motion payload with an explicit accelerometer range.
#[must_use = "decoding returns a Result that should be handled"]
pub fn decode_motion(data: &[u8], range: AccelRange) -> DecodeResult<Measurement> {
    check_layout(SensorChannel::Motion, data)?;
    decode_motion_scaled(data, range)
}

/// Validate payload length and reject the not-ready sentinel.
///
/// Every sensor delivers all-zero payloads until its first conversion
/// completes; a zero battery payload is a legitimate (empty) reading, so
/// battery is exempt from the sentinel check.
fn check_layout(channel: SensorChannel, data: &[u8]) -> DecodeResult<()> {
    let expected = channel.expected_len();
    if data.len() != expected {
        return Err(DecodeError::WrongLength {
            channel,
            expected,
            actual: data.len(),
        });
    }
    if channel != SensorChannel::Battery && data.iter().all(|&b| b == 0) {
        return Err(DecodeError::NotReady { channel });
    }
    Ok(())
}

fn decode_temperature(data: &[u8]) -> DecodeResult<Measurement> {
    let mut buf = data;
    let object_c = f32::from(buf.get_i16_le()) / 128.0;
    let ambient_c = f32::from(buf.get_i16_le()) / 128.0;
    Ok(Measurement::Temperature { object_c, ambient_c })
}

fn decode_humidity(data: &[u8]) -> DecodeResult<Measurement> {
    let mut buf = data;
    let temperature_c = f32::from(buf.get_i16_le()) * 165.0 / 65536.0 - 40.0;
    let humidity_pct = f32::from(buf.get_u16_le()) * 100.0 / 65536.0;
    Ok(Measurement::Humidity { temperature_c, humidity_pct })
}

fn decode_pressure(data: &[u8]) -> DecodeResult<Measurement> {
    let temperature_c = i24_le(&data[0..3]) as f32 / 100.0;
    let pressure_hpa = i24_le(&data[3..6]) as f32 / 100.0;
    Ok(Measurement::Pressure { temperature_c, pressure_hpa })
}

fn decode_motion_scaled(data: &[u8], range: AccelRange) -> DecodeResult<Measurement> {
    let mut buf = data;
    let mut axes = [0i16; 9];
    for axis in &mut axes {
        *axis = buf.get_i16_le();
    }

    let scale = |v: i16, factor: f32| f32::from(v) * factor / 32768.0;
    let gyro_dps = [
        scale(axes[0], 250.0),
        scale(axes[1], 250.0),
        scale(axes[2], 250.0),
    ];
    let accel_g = [
        scale(axes[3], range.as_g()),
        scale(axes[4], range.as_g()),
        scale(axes[5], range.as_g()),
    ];
    let mag_ut = [
        f32::from(axes[6]),
        f32::from(axes[7]),
        f32::from(axes[8]),
    ];
    Ok(Measurement::Motion { gyro_dps, accel_g, mag_ut })
}

fn decode_luminosity(data: &[u8]) -> DecodeResult<Measurement> {
    let mut buf = data;
    let raw = buf.get_u16_le();
    // 12-bit mantissa with a 4-bit binary exponent, in units of 0.01 lux.
    let mantissa = u32::from(raw & 0x0FFF);
    let exponent = raw >> 12;
    let lux = 0.01 * (mantissa << exponent) as f32;
    Ok(Measurement::Luminosity { lux })
}

fn decode_battery(data: &[u8]) -> DecodeResult<Measurement> {
    let level_pct = data[0];
    if level_pct > 100 {
        return Err(DecodeError::OutOfRange {
            channel: SensorChannel::Battery,
            detail: format!("battery level {level_pct} exceeds 100%"),
        });
    }
    Ok(Measurement::Battery { level_pct })
}

/// Sign-extend a little-endian 24-bit value.
fn i24_le(bytes: &[u8]) -> i32 {
    let v = i32::from(bytes[0]) | i32::from(bytes[1]) << 8 | i32::from(bytes[2]) << 16;
    (v << 8) >> 8
}
