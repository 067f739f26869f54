//! Per-tag connection lifecycle.
//!
//! Each discovered tag gets one session that drives the connection through
//! connect, service resolution, notification subscription, measurement
//! decoding, and reconnection on failure. A session runs as its own task;
//! all mutation of session state is confined to that task, and the registry
//! holds only a [`SessionHandle`] for observation and cancellation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use taghub_types::{
    decode, decode_motion, AccelRange, DecodeError, DeviceIdentity, MeasurementRecord,
    SensorChannel,
};

use crate::backoff::BackoffPolicy;
use crate::error::{Error, Result};
use crate::events::{EventBus, SessionEvent};
use crate::gate::RadioGate;
use crate::sink::SinkWriter;
use crate::transport::{DeviceLink, Notification, NotificationStream, RadioTransport};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created from a discovery report, not yet scheduled.
    Discovered,
    /// Waiting for the radio gate or for link establishment.
    Connecting,
    /// Connected, resolving services and characteristics.
    ServiceResolving,
    /// Enabling sensors and notifications.
    Subscribing,
    /// Receiving measurement notifications.
    Active,
    /// Link was lost; about to schedule a reconnect.
    Disconnected,
    /// Waiting out the reconnect backoff.
    Retrying,
    /// Terminal: removed, incompatible, or given up on.
    Lost,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Discovered => "discovered",
            SessionState::Connecting => "connecting",
            SessionState::ServiceResolving => "service-resolving",
            SessionState::Subscribing => "subscribing",
            SessionState::Active => "active",
            SessionState::Disconnected => "disconnected",
            SessionState::Retrying => "retrying",
            SessionState::Lost => "lost",
        };
        f.write_str(name)
    }
}

/// Why a session reached [`SessionState::Lost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LostReason {
    /// Consecutive-failure limit exceeded.
    MaxFailures,
    /// Unreachable for longer than the configured threshold.
    Unreachable,
    /// Device lacks required channels or rejected notification enablement.
    Incompatible,
    /// Removed by the operator.
    Removed,
}

/// Per-step bounded waits for link operations.
///
/// Every connect/resolve/subscribe step has a bounded wait; exceeding it
/// feeds the retry logic rather than hanging the session.
#[derive(Debug, Clone)]
pub struct LinkTimeouts {
    /// Timeout for establishing a connection.
    pub connect: Duration,
    /// Timeout for service resolution after connection.
    pub resolve: Duration,
    /// Timeout for each sensor-enable write and subscription.
    pub subscribe: Duration,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            resolve: Duration::from_secs(10),
            subscribe: Duration::from_secs(10),
        }
    }
}

/// Configuration shared by all sessions.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Channels to enable and subscribe on each tag.
    pub channels: Vec<SensorChannel>,
    /// Accelerometer full-scale range for the motion channel.
    pub accel_range: AccelRange,
    /// Device-side measurement period (clamped to the 100 ms - 2.55 s the
    /// period characteristic can express).
    pub measurement_period: Duration,
    /// Bounded waits for link operations.
    pub timeouts: LinkTimeouts,
    /// Reconnect backoff policy.
    pub backoff: BackoffPolicy,
    /// Consecutive connect failures before the session is given up on.
    pub max_consecutive_failures: u32,
    /// Total unreachable time before the session is given up on.
    pub max_unreachable: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channels: SensorChannel::ALL.to_vec(),
            accel_range: AccelRange::default(),
            measurement_period: Duration::from_millis(2550),
            timeouts: LinkTimeouts::default(),
            backoff: BackoffPolicy::default(),
            max_consecutive_failures: 5,
            max_unreachable: Duration::from_secs(15 * 60),
        }
    }
}

impl SessionConfig {
    /// Validate the configuration and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        self.backoff.validate()?;
        if self.channels.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one sensor channel must be configured".to_string(),
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err(Error::InvalidConfig(
                "max consecutive failures must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Encode a measurement period as the period-characteristic value
/// (10 ms units, 100 ms to 2.55 s).
fn period_command(period: Duration) -> u8 {
    (period.as_millis() / 10).clamp(10, 255) as u8
}

/// Terminal notice a session sends back to the registry.
#[derive(Debug, Clone)]
pub(crate) struct LostNotice {
    pub identity: DeviceIdentity,
    pub reason: LostReason,
}

/// Everything a session task needs from its surroundings.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub transport: Arc<dyn RadioTransport>,
    pub gate: Arc<RadioGate>,
    pub sink: SinkWriter,
    pub config: SessionConfig,
    pub events: EventBus,
    pub lost_tx: mpsc::UnboundedSender<LostNotice>,
}

/// Observer handle for a running session.
///
/// Clones share the same underlying session; [`SessionHandle::same_session`]
/// tells whether two handles refer to one session.
#[derive(Clone)]
pub struct SessionHandle {
    identity: DeviceIdentity,
    state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SessionHandle {
    /// The tag this session manages.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Whether the session has reached its terminal state.
    pub fn is_lost(&self) -> bool {
        self.state() == SessionState::Lost
    }

    /// Whether two handles refer to the same session.
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.task, &other.task)
    }

    /// Wait until the session reaches `target`, bounded by `wait`.
    ///
    /// Returns `false` if the bound elapsed or the session ended in a
    /// different state.
    pub async fn wait_for(&self, target: SessionState, wait: Duration) -> bool {
        let mut rx = self.state.clone();
        let reached = timeout(wait, async {
            loop {
                if *rx.borrow() == target {
                    return;
                }
                if rx.changed().await.is_err() {
                    // Task finished; the state can no longer change.
                    return;
                }
            }
        })
        .await;
        reached.is_ok() && self.state() == target
    }

    /// Request the session to stop.
    ///
    /// The session abandons any queued radio-gate wait or backoff sleep
    /// without side effects and settles in [`SessionState::Lost`].
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the session task to finish.
    pub(crate) async fn join(&self) {
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Spawn a session task for a newly discovered tag.
pub(crate) fn spawn_session(identity: DeviceIdentity, ctx: SessionContext) -> SessionHandle {
    let (state_tx, state_rx) = watch::channel(SessionState::Discovered);
    let cancel = CancellationToken::new();

    let runner = SessionRunner {
        identity: identity.clone(),
        ctx,
        cancel: cancel.clone(),
        state_tx,
        state: SessionState::Discovered,
        consecutive_failures: 0,
        last_active: Instant::now(),
        subscribed: HashSet::new(),
    };
    let task = tokio::spawn(runner.run());

    SessionHandle {
        identity,
        state: state_rx,
        cancel,
        task: Arc::new(Mutex::new(Some(task))),
    }
}

/// The session state machine. Owned entirely by its task.
struct SessionRunner {
    identity: DeviceIdentity,
    ctx: SessionContext,
    cancel: CancellationToken,
    state_tx: watch::Sender<SessionState>,
    state: SessionState,
    consecutive_failures: u32,
    /// Last time the device was known reachable (session start, or the most
    /// recent decoded notification).
    last_active: Instant,
    subscribed: HashSet<SensorChannel>,
}

impl SessionRunner {
    async fn run(mut self) {
        loop {
            match self.cycle().await {
                Ok(()) => {
                    warn!(device = %self.identity, "link lost, scheduling reconnect");
                }
                Err(Error::Cancelled) => return self.finish(LostReason::Removed),
                Err(e @ Error::Incompatible { .. }) => {
                    error!(device = %self.identity, error = %e, "parking session");
                    return self.finish(LostReason::Incompatible);
                }
                Err(e) => {
                    self.consecutive_failures += 1;
                    warn!(
                        device = %self.identity,
                        failures = self.consecutive_failures,
                        error = %e,
                        "connection attempt failed"
                    );
                }
            }

            if self.consecutive_failures >= self.ctx.config.max_consecutive_failures {
                warn!(
                    device = %self.identity,
                    limit = self.ctx.config.max_consecutive_failures,
                    "consecutive-failure limit reached"
                );
                return self.finish(LostReason::MaxFailures);
            }
            if self.last_active.elapsed() >= self.ctx.config.max_unreachable {
                warn!(
                    device = %self.identity,
                    threshold = ?self.ctx.config.max_unreachable,
                    "unreachable past threshold"
                );
                return self.finish(LostReason::Unreachable);
            }

            self.set_state(SessionState::Retrying);
            let attempt = self.consecutive_failures.saturating_sub(1);
            let delay = self.ctx.config.backoff.delay_for_attempt(attempt);
            debug!(device = %self.identity, delay = ?delay, "backing off before reconnect");
            tokio::select! {
                _ = self.cancel.cancelled() => return self.finish(LostReason::Removed),
                _ = sleep(delay) => {}
            }
        }
    }

    /// One pass through connect → resolve → subscribe → active.
    ///
    /// Returns `Ok(())` when an established link was lost (retry without
    /// counting a failure) and `Err` for failed attempts, cancellation, or
    /// an incompatible device.
    async fn cycle(&mut self) -> Result<()> {
        let connect_timeout = self.ctx.config.timeouts.connect;

        self.set_state(SessionState::Connecting);
        let permit = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            permit = self.ctx.gate.acquire("connect") => permit?,
        };
        let link = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            result = timeout(connect_timeout, self.ctx.transport.connect(&self.identity)) => {
                result.map_err(|_| Error::timeout("connect", connect_timeout))??
            }
        };
        drop(permit);

        // Service resolution and subscription run on the established link;
        // the radio is free for other sessions from here on.
        let stream = match self.establish(link.as_ref()).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = link.disconnect().await;
                return Err(e);
            }
        };

        self.set_state(SessionState::Active);
        self.consecutive_failures = 0;
        self.last_active = Instant::now();
        info!(device = %self.identity, channels = self.subscribed.len(), "session active");

        let outcome = self.pump(stream).await;

        self.subscribed.clear();
        self.set_state(SessionState::Disconnected);
        let _ = link.disconnect().await;
        outcome
    }

    /// Resolve services, verify the configured channels are present, and
    /// enable notifications on all of them.
    async fn establish(&mut self, link: &dyn DeviceLink) -> Result<NotificationStream> {
        let timeouts = self.ctx.config.timeouts.clone();

        self.set_state(SessionState::ServiceResolving);
        timeout(timeouts.resolve, link.resolve_services())
            .await
            .map_err(|_| Error::timeout("resolve services", timeouts.resolve))??;

        let available = link.characteristics().await;
        let missing: Vec<SensorChannel> = self
            .ctx
            .config
            .channels
            .iter()
            .copied()
            .filter(|channel| !available.contains(&channel.data_uuid()))
            .collect();
        if !missing.is_empty() {
            let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
            return Err(Error::Incompatible {
                identity: self.identity.clone(),
                detail: format!("missing channels: {}", names.join(", ")),
            });
        }

        self.set_state(SessionState::Subscribing);
        let stream = link.notifications().await?;
        for channel in self.ctx.config.channels.clone() {
            self.enable_channel(link, channel).await?;
        }
        Ok(stream)
    }

    /// Enable one sensor channel: set its period, subscribe to its data
    /// characteristic, then switch the sensor on.
    async fn enable_channel(&mut self, link: &dyn DeviceLink, channel: SensorChannel) -> Result<()> {
        let wait = self.ctx.config.timeouts.subscribe;

        if let Some(period) = channel.period_uuid() {
            let value = [period_command(self.ctx.config.measurement_period)];
            timeout(wait, link.write(period, &value))
                .await
                .map_err(|_| Error::timeout("write measurement period", wait))??;
        }

        match timeout(wait, link.subscribe(channel.data_uuid())).await {
            Err(_) => return Err(Error::timeout("enable notifications", wait)),
            // A peripheral that refuses notification enablement will keep
            // refusing; treat it like a missing characteristic.
            Ok(Err(e)) => {
                return Err(Error::Incompatible {
                    identity: self.identity.clone(),
                    detail: format!("notification enablement rejected for {channel}: {e}"),
                });
            }
            Ok(Ok(())) => {}
        }

        if let Some(config) = channel.config_uuid() {
            let value = channel.enable_command(self.ctx.config.accel_range);
            timeout(wait, link.write(config, &value))
                .await
                .map_err(|_| Error::timeout("enable sensor", wait))??;
        }

        self.subscribed.insert(channel);
        debug!(device = %self.identity, %channel, "channel enabled");
        Ok(())
    }

    /// Consume notifications until the link is lost or the session is
    /// cancelled. Per-device notifications are handled in arrival order.
    async fn pump(&mut self, mut stream: NotificationStream) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                item = stream.next() => match item {
                    Some(notification) => self.handle_notification(notification).await,
                    None => return Ok(()),
                },
            }
        }
    }

    async fn handle_notification(&mut self, notification: Notification) {
        let Some(channel) = SensorChannel::from_data_uuid(notification.uuid) else {
            trace!(
                device = %self.identity,
                characteristic = %notification.uuid,
                "notification from unmapped characteristic"
            );
            return;
        };

        let decoded = if channel == SensorChannel::Motion {
            decode_motion(&notification.value, self.ctx.config.accel_range)
        } else {
            decode(channel, &notification.value)
        };

        match decoded {
            Ok(measurement) => {
                self.last_active = Instant::now();
                let record = MeasurementRecord {
                    device: self.identity.clone(),
                    measurement,
                    captured_at: time::OffsetDateTime::now_utc(),
                };
                self.ctx.events.send(SessionEvent::Reading {
                    identity: self.identity.clone(),
                    channel,
                });
                if !self.ctx.sink.deliver(&record).await {
                    self.ctx.events.send(SessionEvent::ReadingDropped {
                        identity: self.identity.clone(),
                        reason: "sink unavailable".to_string(),
                    });
                }
            }
            Err(e @ DecodeError::NotReady { .. }) => {
                // Routine during sensor warm-up.
                debug!(device = %self.identity, %channel, "skipping payload: {e}");
            }
            Err(e) => {
                warn!(
                    device = %self.identity,
                    %channel,
                    error = %e,
                    "dropping undecodable payload"
                );
                self.ctx.events.send(SessionEvent::ReadingDropped {
                    identity: self.identity.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    fn set_state(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        self.state_tx.send_replace(to);
        debug!(device = %self.identity, %from, %to, "session state changed");
        self.ctx.events.send(SessionEvent::StateChanged {
            identity: self.identity.clone(),
            from,
            to,
        });
    }

    fn finish(mut self, reason: LostReason) {
        self.set_state(SessionState::Lost);
        self.ctx.events.send(SessionEvent::Lost {
            identity: self.identity.clone(),
            reason,
        });
        let _ = self.ctx.lost_tx.send(LostNotice {
            identity: self.identity.clone(),
            reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_command_units() {
        assert_eq!(period_command(Duration::from_millis(2550)), 0xFF);
        assert_eq!(period_command(Duration::from_secs(1)), 100);
        assert_eq!(period_command(Duration::from_millis(100)), 10);
    }

    #[test]
    fn test_period_command_clamps() {
        assert_eq!(period_command(Duration::from_millis(20)), 10);
        assert_eq!(period_command(Duration::from_secs(60)), 0xFF);
    }

    #[test]
    fn test_session_config_validation() {
        assert!(SessionConfig::default().validate().is_ok());

        let no_channels = SessionConfig {
            channels: Vec::new(),
            ..Default::default()
        };
        assert!(no_channels.validate().is_err());

        let no_retries = SessionConfig {
            max_consecutive_failures: 0,
            ..Default::default()
        };
        assert!(no_retries.validate().is_err());
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::ServiceResolving.to_string(), "service-resolving");
        assert_eq!(SessionState::Lost.to_string(), "lost");
    }
}
