//! Measurement sink interface and bounded-retry delivery.
//!
//! The sink is an external collaborator: it receives decoded records and is
//! responsible for durable storage. The hub never blocks indefinitely on a
//! slow sink; each record gets a bounded wait and a bounded number of
//! attempts, after which it is dropped with a log line and the session
//! carries on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use taghub_types::MeasurementRecord;

use crate::error::Result;

/// Consumer of decoded measurement records.
#[async_trait]
pub trait MeasurementSink: Send + Sync {
    /// Accept one record for storage/export.
    async fn write(&self, record: &MeasurementRecord) -> Result<()>;
}

/// Delivery policy for [`SinkWriter`].
#[derive(Debug, Clone)]
pub struct SinkOptions {
    /// Bounded wait for a single write call.
    pub write_timeout: Duration,
    /// Total attempts per record before it is dropped.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub retry_delay: Duration,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(5),
            max_attempts: 2,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Wraps a sink with the bounded-wait, drop-on-sustained-failure policy.
#[derive(Clone)]
pub struct SinkWriter {
    sink: Arc<dyn MeasurementSink>,
    options: SinkOptions,
}

impl SinkWriter {
    /// Create a writer with the given delivery policy.
    pub fn new(sink: Arc<dyn MeasurementSink>, options: SinkOptions) -> Self {
        Self { sink, options }
    }

    /// Deliver one record.
    ///
    /// Returns `true` if the sink accepted it, `false` if the record was
    /// dropped after all attempts failed. Never returns an error:
    /// sink trouble must not affect the session's connectivity state.
    pub async fn deliver(&self, record: &MeasurementRecord) -> bool {
        for attempt in 1..=self.options.max_attempts {
            match timeout(self.options.write_timeout, self.sink.write(record)).await {
                Ok(Ok(())) => return true,
                Ok(Err(e)) => {
                    debug!(
                        device = %record.device,
                        attempt,
                        error = %e,
                        "sink write failed"
                    );
                }
                Err(_) => {
                    debug!(
                        device = %record.device,
                        attempt,
                        timeout = ?self.options.write_timeout,
                        "sink write timed out"
                    );
                }
            }
            if attempt < self.options.max_attempts {
                sleep(self.options.retry_delay).await;
            }
        }

        warn!(
            device = %record.device,
            channel = %record.measurement.channel(),
            attempts = self.options.max_attempts,
            "dropping measurement record, sink unavailable"
        );
        false
    }
}

impl std::fmt::Debug for SinkWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkWriter")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
