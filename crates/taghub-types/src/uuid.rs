//! Bluetooth UUIDs for TI SensorTag peripherals.
//!
//! TI sensor services use a vendor 128-bit base with the 16-bit short code
//! in the top word; standard services (battery) use the Bluetooth SIG base.

use uuid::Uuid;

/// Expand a TI 16-bit short code into the vendor 128-bit UUID.
///
/// `0xAA00` becomes `f000aa00-0451-4000-b000-000000000000`.
pub const fn ti_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((0xF000_0000u128 | short as u128) << 96) | 0x0451_4000_B000_0000_0000_0000)
}

/// Expand a Bluetooth SIG 16-bit short code into the standard 128-bit UUID.
///
/// `0x2A19` becomes `00002a19-0000-1000-8000-00805f9b34fb`.
pub const fn sig_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_1000_8000_0080_5F9B_34FB)
}

// --- IR temperature (TMP007) ---

pub const TEMPERATURE_SERVICE: Uuid = ti_uuid(0xAA00);
pub const TEMPERATURE_DATA: Uuid = ti_uuid(0xAA01);
pub const TEMPERATURE_CONFIG: Uuid = ti_uuid(0xAA02);
pub const TEMPERATURE_PERIOD: Uuid = ti_uuid(0xAA03);

// --- Humidity (HDC1000) ---

pub const HUMIDITY_SERVICE: Uuid = ti_uuid(0xAA20);
pub const HUMIDITY_DATA: Uuid = ti_uuid(0xAA21);
pub const HUMIDITY_CONFIG: Uuid = ti_uuid(0xAA22);
pub const HUMIDITY_PERIOD: Uuid = ti_uuid(0xAA23);

// --- Barometric pressure (BMP280) ---
//
// The barometer's period characteristic is 0xAA44, not 0xAA43.

pub const PRESSURE_SERVICE: Uuid = ti_uuid(0xAA40);
pub const PRESSURE_DATA: Uuid = ti_uuid(0xAA41);
pub const PRESSURE_CONFIG: Uuid = ti_uuid(0xAA42);
pub const PRESSURE_PERIOD: Uuid = ti_uuid(0xAA44);

// --- Optical / luminosity (OPT3001) ---

pub const LUMINOSITY_SERVICE: Uuid = ti_uuid(0xAA70);
pub const LUMINOSITY_DATA: Uuid = ti_uuid(0xAA71);
pub const LUMINOSITY_CONFIG: Uuid = ti_uuid(0xAA72);
pub const LUMINOSITY_PERIOD: Uuid = ti_uuid(0xAA73);

// --- Motion, 9-axis (MPU-9250) ---

pub const MOTION_SERVICE: Uuid = ti_uuid(0xAA80);
pub const MOTION_DATA: Uuid = ti_uuid(0xAA81);
pub const MOTION_CONFIG: Uuid = ti_uuid(0xAA82);
pub const MOTION_PERIOD: Uuid = ti_uuid(0xAA83);

// --- Standard services ---

pub const BATTERY_SERVICE: Uuid = sig_uuid(0x180F);
pub const BATTERY_LEVEL: Uuid = sig_uuid(0x2A19);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ti_uuid_expansion() {
        assert_eq!(
            ti_uuid(0xAA00).to_string(),
            "f000aa00-0451-4000-b000-000000000000"
        );
        assert_eq!(
            ti_uuid(0xAA81).to_string(),
            "f000aa81-0451-4000-b000-000000000000"
        );
    }

    #[test]
    fn test_sig_uuid_expansion() {
        assert_eq!(
            sig_uuid(0x2A19).to_string(),
            "00002a19-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            sig_uuid(0x180F).to_string(),
            "0000180f-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_pressure_period_is_aa44() {
        assert_eq!(
            PRESSURE_PERIOD.to_string(),
            "f000aa44-0451-4000-b000-000000000000"
        );
    }

    #[test]
    fn test_data_uuids_are_distinct() {
        let uuids = [
            TEMPERATURE_DATA,
            HUMIDITY_DATA,
            PRESSURE_DATA,
            LUMINOSITY_DATA,
            MOTION_DATA,
            BATTERY_LEVEL,
        ];
        for (i, a) in uuids.iter().enumerate() {
            for b in &uuids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
