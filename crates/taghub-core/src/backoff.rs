//! Reconnect backoff policy.

use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};

/// Exponential backoff policy for reconnect scheduling.
///
/// Delays grow by `multiplier` per consecutive failure, capped at
/// `max_delay`, with optional jitter to avoid synchronized retries across
/// devices.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Growth factor per attempt (1.0 = constant delay).
    pub multiplier: f64,
    /// Whether to add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy with a fixed delay (no growth, no jitter).
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Set the initial delay.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Calculate the delay for a given attempt number (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let delayed = if self.jitter {
            capped * (1.0 + rand::rng().random::<f64>() * 0.25)
        } else {
            capped
        };

        Duration::from_secs_f64(delayed)
    }

    /// Validate the policy and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.multiplier < 1.0 {
            return Err(Error::InvalidConfig(
                "backoff multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.initial_delay.is_zero() {
            return Err(Error::InvalidConfig(
                "initial backoff delay must be > 0".to_string(),
            ));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::InvalidConfig(
                "max backoff delay must be >= initial delay".to_string(),
            ));
        }
        Ok(())
    }
}
