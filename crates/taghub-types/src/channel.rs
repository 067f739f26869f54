//! Sensor channels exposed by a SensorTag.

use core::fmt;

use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::uuid as uuids;

/// The sensor channels a tag exposes, one per GATT data characteristic.
///
/// The five TI channels follow the vendor pattern of a service with
/// data/config/period characteristics; battery is the standard Battery
/// service and has neither config nor period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SensorChannel {
    /// IR thermopile temperature (TMP007): object and ambient temperature.
    Temperature,
    /// Humidity sensor (HDC1000): temperature and relative humidity.
    Humidity,
    /// Barometer (BMP280): temperature and pressure.
    Pressure,
    /// 9-axis motion (MPU-9250): gyroscope, accelerometer, magnetometer.
    Motion,
    /// Ambient light (OPT3001): illuminance.
    Luminosity,
    /// Battery level (standard Battery service).
    Battery,
}

/// Accelerometer full-scale range for the motion channel.
///
/// Selected via the motion config characteristic and applied as the decode
/// scale factor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AccelRange {
    /// ±2 g (power-on default).
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "2"))]
    G2,
    /// ±4 g.
    #[cfg_attr(feature = "serde", serde(rename = "4"))]
    G4,
    /// ±8 g.
    #[cfg_attr(feature = "serde", serde(rename = "8"))]
    G8,
    /// ±16 g.
    #[cfg_attr(feature = "serde", serde(rename = "16"))]
    G16,
}

impl AccelRange {
    /// Full-scale range in g.
    pub fn as_g(&self) -> f32 {
        match self {
            AccelRange::G2 => 2.0,
            AccelRange::G4 => 4.0,
            AccelRange::G8 => 8.0,
            AccelRange::G16 => 16.0,
        }
    }

    /// Range selector bits for the motion enable command.
    fn index(&self) -> u16 {
        match self {
            AccelRange::G2 => 0,
            AccelRange::G4 => 1,
            AccelRange::G8 => 2,
            AccelRange::G16 => 3,
        }
    }
}

impl SensorChannel {
    /// All channels, in a fixed order.
    pub const ALL: [SensorChannel; 6] = [
        SensorChannel::Temperature,
        SensorChannel::Humidity,
        SensorChannel::Pressure,
        SensorChannel::Motion,
        SensorChannel::Luminosity,
        SensorChannel::Battery,
    ];

    /// The GATT service UUID containing this channel's characteristics.
    pub fn service_uuid(&self) -> Uuid {
        match self {
            SensorChannel::Temperature => uuids::TEMPERATURE_SERVICE,
            SensorChannel::Humidity => uuids::HUMIDITY_SERVICE,
            SensorChannel::Pressure => uuids::PRESSURE_SERVICE,
            SensorChannel::Motion => uuids::MOTION_SERVICE,
            SensorChannel::Luminosity => uuids::LUMINOSITY_SERVICE,
            SensorChannel::Battery => uuids::BATTERY_SERVICE,
        }
    }

    /// The data characteristic that delivers measurement notifications.
    pub fn data_uuid(&self) -> Uuid {
        match self {
            SensorChannel::Temperature => uuids::TEMPERATURE_DATA,
            SensorChannel::Humidity => uuids::HUMIDITY_DATA,
            SensorChannel::Pressure => uuids::PRESSURE_DATA,
            SensorChannel::Motion => uuids::MOTION_DATA,
            SensorChannel::Luminosity => uuids::LUMINOSITY_DATA,
            SensorChannel::Battery => uuids::BATTERY_LEVEL,
        }
    }

    /// The configuration characteristic enabling the sensor, if any.
    pub fn config_uuid(&self) -> Option<Uuid> {
        match self {
            SensorChannel::Temperature => Some(uuids::TEMPERATURE_CONFIG),
            SensorChannel::Humidity => Some(uuids::HUMIDITY_CONFIG),
            SensorChannel::Pressure => Some(uuids::PRESSURE_CONFIG),
            SensorChannel::Motion => Some(uuids::MOTION_CONFIG),
            SensorChannel::Luminosity => Some(uuids::LUMINOSITY_CONFIG),
            SensorChannel::Battery => None,
        }
    }

    /// The measurement period characteristic, if any.
    pub fn period_uuid(&self) -> Option<Uuid> {
        match self {
            SensorChannel::Temperature => Some(uuids::TEMPERATURE_PERIOD),
            SensorChannel::Humidity => Some(uuids::HUMIDITY_PERIOD),
            SensorChannel::Pressure => Some(uuids::PRESSURE_PERIOD),
            SensorChannel::Motion => Some(uuids::MOTION_PERIOD),
            SensorChannel::Luminosity => Some(uuids::LUMINOSITY_PERIOD),
            SensorChannel::Battery => None,
        }
    }

    /// Map a data characteristic UUID back to its channel.
    pub fn from_data_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.data_uuid() == uuid)
    }

    /// Exact payload size of this channel's data characteristic.
    pub fn expected_len(&self) -> usize {
        match self {
            SensorChannel::Temperature => 4,
            SensorChannel::Humidity => 4,
            SensorChannel::Pressure => 6,
            SensorChannel::Motion => 18,
            SensorChannel::Luminosity => 2,
            SensorChannel::Battery => 1,
        }
    }

    /// The value written to the config characteristic to enable the sensor.
    ///
    /// Motion takes a two-byte bitmask enabling all nine axes plus the
    /// accelerometer range selector; the other sensors take a single `1`.
    pub fn enable_command(&self, accel_range: AccelRange) -> Vec<u8> {
        match self {
            SensorChannel::Motion => {
                (0x007Fu16 | (accel_range.index() << 8)).to_le_bytes().to_vec()
            }
            _ => vec![0x01],
        }
    }

    /// The value written to the config characteristic to disable the sensor.
    pub fn disable_command(&self) -> Vec<u8> {
        match self {
            SensorChannel::Motion => vec![0x00, 0x00],
            _ => vec![0x00],
        }
    }
}

impl fmt::Display for SensorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorChannel::Temperature => write!(f, "temperature"),
            SensorChannel::Humidity => write!(f, "humidity"),
            SensorChannel::Pressure => write!(f, "pressure"),
            SensorChannel::Motion => write!(f, "motion"),
            SensorChannel::Luminosity => write!(f, "luminosity"),
            SensorChannel::Battery => write!(f, "battery"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_data_uuid_roundtrip() {
        for channel in SensorChannel::ALL {
            assert_eq!(SensorChannel::from_data_uuid(channel.data_uuid()), Some(channel));
        }
    }

    #[test]
    fn test_from_data_uuid_unknown() {
        assert_eq!(SensorChannel::from_data_uuid(crate::uuid::ti_uuid(0xCCC1)), None);
    }

    #[test]
    fn test_battery_has_no_config_or_period() {
        assert!(SensorChannel::Battery.config_uuid().is_none());
        assert!(SensorChannel::Battery.period_uuid().is_none());
    }

    #[test]
    fn test_motion_enable_command_encodes_range() {
        assert_eq!(
            SensorChannel::Motion.enable_command(AccelRange::G2),
            vec![0x7F, 0x00]
        );
        assert_eq!(
            SensorChannel::Motion.enable_command(AccelRange::G8),
            vec![0x7F, 0x02]
        );
        assert_eq!(
            SensorChannel::Motion.enable_command(AccelRange::G16),
            vec![0x7F, 0x03]
        );
    }

    #[test]
    fn test_scalar_enable_command() {
        assert_eq!(
            SensorChannel::Humidity.enable_command(AccelRange::default()),
            vec![0x01]
        );
        assert_eq!(SensorChannel::Humidity.disable_command(), vec![0x00]);
    }
}
