//! Recurring discovery scanning.
//!
//! The scan coordinator owns the shared adapter's discovery mode: it runs a
//! scan cycle of configured duration, reports tag sightings to the session
//! registry, and sleeps until the next cycle. Scanning is radio-exclusive
//! and routes through the gate like connect attempts do.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::gate::RadioGate;
use crate::registry::SessionRegistry;
use crate::transport::{Advertisement, RadioTransport};

/// Scan loop configuration.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// How long each discovery scan runs.
    pub duration: Duration,
    /// Pause between scan cycles.
    pub interval: Duration,
    /// Sightings weaker than this RSSI are ignored; a tag at the edge of
    /// range would only produce a flapping session.
    pub min_rssi: i16,
    /// Consecutive scan failures tolerated before the adapter is declared
    /// dead and the error surfaces as fatal.
    pub max_consecutive_failures: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(5),
            interval: Duration::from_secs(60),
            min_rssi: -110,
            max_consecutive_failures: 5,
        }
    }
}

impl ScanConfig {
    /// Validate the configuration and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.duration.is_zero() {
            return Err(Error::InvalidConfig(
                "scan duration must be > 0".to_string(),
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err(Error::InvalidConfig(
                "max consecutive scan failures must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Drives the recurring discovery scan.
pub struct ScanCoordinator {
    transport: Arc<dyn RadioTransport>,
    gate: Arc<RadioGate>,
    registry: Arc<SessionRegistry>,
    config: ScanConfig,
}

impl ScanCoordinator {
    /// Create a coordinator over the shared transport and gate.
    pub fn new(
        transport: Arc<dyn RadioTransport>,
        gate: Arc<RadioGate>,
        registry: Arc<SessionRegistry>,
        config: ScanConfig,
    ) -> Self {
        Self {
            transport,
            gate,
            registry,
            config,
        }
    }

    /// Run scan cycles until cancelled.
    ///
    /// Adapter-busy errors defer the cycle; once
    /// [`ScanConfig::max_consecutive_failures`] cycles fail in a row the
    /// adapter is considered gone and [`Error::Adapter`] is returned.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(
            duration = ?self.config.duration,
            interval = ?self.config.interval,
            "starting discovery loop"
        );
        let mut consecutive_failures = 0u32;

        loop {
            match self.sweep(&cancel).await {
                Ok(None) => return Ok(()),
                Ok(Some(advertisements)) => {
                    consecutive_failures = 0;
                    let mut tags = 0usize;
                    for advertisement in &advertisements {
                        if !is_tag(advertisement) {
                            continue;
                        }
                        if advertisement
                            .rssi
                            .is_some_and(|rssi| rssi < self.config.min_rssi)
                        {
                            debug!(
                                device = %advertisement.identity,
                                rssi = ?advertisement.rssi,
                                "tag too weak, ignoring"
                            );
                            continue;
                        }
                        tags += 1;
                        self.registry.observe(advertisement).await;
                    }
                    debug!(seen = advertisements.len(), tags, "scan cycle complete");
                }
                Err(e) => {
                    consecutive_failures += 1;
                    if consecutive_failures >= self.config.max_consecutive_failures {
                        return Err(Error::Adapter(format!(
                            "scanning failed {consecutive_failures} times in a row: {e}"
                        )));
                    }
                    warn!(
                        error = %e,
                        consecutive_failures,
                        "scan cycle failed, deferring"
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = sleep(self.config.interval) => {}
            }
        }
    }

    /// One radio-exclusive scan. `Ok(None)` means the loop was cancelled.
    async fn sweep(&self, cancel: &CancellationToken) -> Result<Option<Vec<Advertisement>>> {
        let permit = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            permit = self.gate.acquire("scan") => permit?,
        };
        let result = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            result = self.transport.scan(self.config.duration) => result,
        };
        drop(permit);
        result.map(Some)
    }
}

/// Whether an advertisement looks like a SensorTag.
///
/// Tags advertise the TI movement service; the name check catches firmware
/// that omits the service list from its advertisement.
fn is_tag(advertisement: &Advertisement) -> bool {
    advertisement.advertises(taghub_types::uuid::MOTION_SERVICE)
        || advertisement
            .local_name
            .as_deref()
            .is_some_and(|name| name.to_lowercase().contains("sensortag"))
}
