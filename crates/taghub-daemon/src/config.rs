//! Daemon configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use taghub_core::{BackoffPolicy, HubConfig, ScanConfig, SessionConfig, SinkOptions};
use taghub_types::{AccelRange, SensorChannel};

/// Default configuration file looked for next to the process.
pub const DEFAULT_CONFIG_PATH: &str = "taghub.toml";

/// Daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bluetooth adapter selection.
    pub adapter: AdapterConfig,
    /// Discovery scan settings.
    pub scan: ScanSection,
    /// Per-device session settings.
    pub session: SessionSection,
    /// Measurement sink settings.
    pub sink: SinkSection,
}

impl Config {
    /// Load configuration from the default path, falling back to defaults
    /// when no file exists.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Path::new(DEFAULT_CONFIG_PATH);
        if path.exists() {
            Self::load_validated(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.scan.validate());
        errors.extend(self.session.validate());
        errors.extend(self.sink.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Translate into the hub's runtime configuration.
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            session: SessionConfig {
                channels: self.session.channels.clone(),
                accel_range: self.session.accel_range,
                measurement_period: Duration::from_millis(self.session.measurement_period_ms),
                backoff: BackoffPolicy::default()
                    .initial_delay(Duration::from_secs(self.session.backoff_initial_secs))
                    .max_delay(Duration::from_secs(self.session.backoff_max_secs)),
                max_consecutive_failures: self.session.max_consecutive_failures,
                max_unreachable: Duration::from_secs(self.session.max_unreachable_secs),
                ..Default::default()
            },
            scan: ScanConfig {
                duration: Duration::from_secs(self.scan.duration_secs),
                interval: Duration::from_secs(self.scan.interval_secs),
                min_rssi: self.scan.min_rssi,
                ..Default::default()
            },
            sink: SinkOptions {
                write_timeout: Duration::from_millis(self.sink.write_timeout_ms),
                max_attempts: self.sink.max_attempts,
                ..Default::default()
            },
        }
    }
}

/// Bluetooth adapter selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Adapter identifier: an index (`"0"`) or a name substring (`"hci1"`).
    /// Unset means the first available adapter.
    pub name: Option<String>,
}

/// Discovery scan settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    /// How long each discovery scan runs, in seconds.
    pub duration_secs: u64,
    /// Pause between scan cycles, in seconds.
    pub interval_secs: u64,
    /// Ignore tags advertising weaker than this RSSI (dBm).
    pub min_rssi: i16,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            duration_secs: 5,
            interval_secs: 60,
            min_rssi: -110,
        }
    }
}

impl ScanSection {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.duration_secs == 0 {
            errors.push(ValidationError {
                field: "scan.duration_secs".to_string(),
                message: "scan duration must be > 0".to_string(),
            });
        }
        if self.interval_secs == 0 {
            errors.push(ValidationError {
                field: "scan.interval_secs".to_string(),
                message: "scan interval must be > 0".to_string(),
            });
        }
        errors
    }
}

/// Per-device session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Initial reconnect backoff delay, in seconds.
    pub backoff_initial_secs: u64,
    /// Maximum reconnect backoff delay, in seconds.
    pub backoff_max_secs: u64,
    /// Consecutive connect failures before a tag is given up on.
    pub max_consecutive_failures: u32,
    /// Total unreachable time before a tag is given up on, in seconds.
    pub max_unreachable_secs: u64,
    /// Device-side measurement period, in milliseconds (100-2550).
    pub measurement_period_ms: u64,
    /// Sensor channels to enable on each tag.
    pub channels: Vec<SensorChannel>,
    /// Accelerometer full-scale range (2, 4, 8, or 16 g).
    pub accel_range: AccelRange,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            backoff_initial_secs: 1,
            backoff_max_secs: 60,
            max_consecutive_failures: 5,
            max_unreachable_secs: 900,
            measurement_period_ms: 2550,
            channels: SensorChannel::ALL.to_vec(),
            accel_range: AccelRange::default(),
        }
    }
}

impl SessionSection {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.backoff_initial_secs == 0 {
            errors.push(ValidationError {
                field: "session.backoff_initial_secs".to_string(),
                message: "initial backoff must be > 0".to_string(),
            });
        }
        if self.backoff_max_secs < self.backoff_initial_secs {
            errors.push(ValidationError {
                field: "session.backoff_max_secs".to_string(),
                message: "max backoff must be >= initial backoff".to_string(),
            });
        }
        if self.max_consecutive_failures == 0 {
            errors.push(ValidationError {
                field: "session.max_consecutive_failures".to_string(),
                message: "must be >= 1".to_string(),
            });
        }
        if !(100..=2550).contains(&self.measurement_period_ms) {
            errors.push(ValidationError {
                field: "session.measurement_period_ms".to_string(),
                message: format!(
                    "period {} ms outside the representable 100-2550 ms",
                    self.measurement_period_ms
                ),
            });
        }
        if self.channels.is_empty() {
            errors.push(ValidationError {
                field: "session.channels".to_string(),
                message: "at least one channel must be enabled".to_string(),
            });
        }
        errors
    }
}

/// Measurement sink settings.
///
/// The sink speaks InfluxDB line protocol over UDP, where authentication
/// and database routing are handled server-side; only the endpoint and
/// measurement name are needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkSection {
    /// UDP endpoint in `host:port` form.
    pub endpoint: String,
    /// Measurement name written to the series.
    pub measurement: String,
    /// Bounded wait for a single write, in milliseconds.
    pub write_timeout_ms: u64,
    /// Attempts per record before it is dropped.
    pub max_attempts: u32,
}

impl Default for SinkSection {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:8089".to_string(),
            measurement: "sensortag".to_string(),
            write_timeout_ms: 5000,
            max_attempts: 2,
        }
    }
}

impl SinkSection {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        let parts: Vec<&str> = self.endpoint.rsplitn(2, ':').collect();
        if parts.len() != 2 || parts[1].is_empty() {
            errors.push(ValidationError {
                field: "sink.endpoint".to_string(),
                message: format!(
                    "invalid endpoint '{}': expected format 'host:port'",
                    self.endpoint
                ),
            });
        } else {
            match parts[0].parse::<u16>() {
                Ok(0) | Err(_) => {
                    errors.push(ValidationError {
                        field: "sink.endpoint".to_string(),
                        message: format!("invalid port '{}': must be a number 1-65535", parts[0]),
                    });
                }
                Ok(_) => {}
            }
        }

        if self.measurement.is_empty() {
            errors.push(ValidationError {
                field: "sink.measurement".to_string(),
                message: "measurement name cannot be empty".to_string(),
            });
        }
        if self.max_attempts == 0 {
            errors.push(ValidationError {
                field: "sink.max_attempts".to_string(),
                message: "must be >= 1".to_string(),
            });
        }
        errors
    }
}

/// A single configuration validation failure.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Dotted path to the offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Could not read the configuration file.
    #[error("failed to read config from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file is not valid TOML or has unexpected structure.
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// The configuration failed validation.
    #[error("invalid configuration: {}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().expect("default config should be valid");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [adapter]
            name = "hci1"

            [scan]
            duration_secs = 10
            interval_secs = 120

            [session]
            backoff_initial_secs = 2
            backoff_max_secs = 30
            max_consecutive_failures = 8
            channels = ["humidity", "pressure", "battery"]
            accel_range = "8"

            [sink]
            endpoint = "influx.local:8089"
            measurement = "lab"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.adapter.name.as_deref(), Some("hci1"));
        assert_eq!(config.scan.duration_secs, 10);
        assert_eq!(config.session.max_consecutive_failures, 8);
        assert_eq!(
            config.session.channels,
            vec![
                SensorChannel::Humidity,
                SensorChannel::Pressure,
                SensorChannel::Battery
            ]
        );
        assert_eq!(config.session.accel_range, AccelRange::G8);
        assert_eq!(config.sink.endpoint, "influx.local:8089");
        assert_eq!(config.sink.measurement, "lab");
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = toml::from_str("[sink]\nendpoint = \"10.0.0.2:9999\"\n").unwrap();
        assert_eq!(config.sink.endpoint, "10.0.0.2:9999");
        assert_eq!(config.sink.measurement, "sensortag");
        assert_eq!(config.scan.interval_secs, 60);
        assert_eq!(config.session.channels.len(), 6);
    }

    #[test]
    fn test_validation_rejects_bad_endpoint() {
        let mut config = Config::default();
        config.sink.endpoint = "no-port".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sink.endpoint"));
    }

    #[test]
    fn test_validation_rejects_unrepresentable_period() {
        let mut config = Config::default();
        config.session.measurement_period_ms = 50;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("measurement_period_ms"));
    }

    #[test]
    fn test_validation_rejects_inverted_backoff() {
        let mut config = Config::default();
        config.session.backoff_initial_secs = 90;
        config.session.backoff_max_secs = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hub_config_translation() {
        let mut config = Config::default();
        config.session.backoff_initial_secs = 3;
        config.scan.duration_secs = 7;
        config.sink.max_attempts = 4;

        let hub = config.hub_config();
        assert_eq!(hub.session.backoff.initial_delay, Duration::from_secs(3));
        assert_eq!(hub.scan.duration, Duration::from_secs(7));
        assert_eq!(hub.sink.max_attempts, 4);
        hub.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taghub.toml");
        std::fs::write(&path, "[scan]\nduration_secs = 3\n").unwrap();

        let config = Config::load_validated(&path).unwrap();
        assert_eq!(config.scan.duration_secs, 3);

        let missing = Config::load(dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
