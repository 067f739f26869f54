//! Process-wide table of live sessions.
//!
//! The registry maps device identity to its session and enforces at most
//! one session per identity, no matter how many concurrent discovery
//! reports name the same tag. Sessions report their terminal state back
//! through a channel; the registry's reaper removes entries for tags worth
//! rediscovering and keeps incompatible tags parked.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use taghub_types::DeviceIdentity;

use crate::events::{EventBus, SessionEvent};
use crate::gate::RadioGate;
use crate::session::{
    spawn_session, LostNotice, LostReason, SessionConfig, SessionContext, SessionHandle,
    SessionState,
};
use crate::sink::SinkWriter;
use crate::transport::{Advertisement, RadioTransport};

/// Registry of sessions keyed by device identity.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<DeviceIdentity, SessionHandle>>,
    ctx: SessionContext,
    lost_rx: Mutex<Option<mpsc::UnboundedReceiver<LostNotice>>>,
}

impl SessionRegistry {
    /// Create a registry sharing the given transport, gate, and sink.
    pub fn new(
        transport: Arc<dyn RadioTransport>,
        gate: Arc<RadioGate>,
        sink: SinkWriter,
        config: SessionConfig,
        events: EventBus,
    ) -> Arc<Self> {
        let (lost_tx, lost_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            ctx: SessionContext {
                transport,
                gate,
                sink,
                config,
                events,
                lost_tx,
            },
            lost_rx: Mutex::new(Some(lost_rx)),
        })
    }

    /// Handle one discovery report.
    ///
    /// A tag already holding a session (in any state, including a parked
    /// incompatible one) is not re-reported; a new tag gets a session in
    /// `Discovered` state. Returns whether a session was created.
    pub async fn observe(&self, advertisement: &Advertisement) -> bool {
        let created = {
            let mut sessions = self.sessions.lock().await;
            if sessions.contains_key(&advertisement.identity) {
                trace!(device = %advertisement.identity, "already managed, skipping");
                false
            } else {
                let handle = spawn_session(advertisement.identity.clone(), self.ctx.clone());
                sessions.insert(advertisement.identity.clone(), handle);
                true
            }
        };

        if created {
            info!(
                device = %advertisement.identity,
                name = ?advertisement.local_name,
                rssi = ?advertisement.rssi,
                "tag discovered"
            );
            self.ctx.events.send(SessionEvent::Discovered {
                identity: advertisement.identity.clone(),
                rssi: advertisement.rssi,
            });
        }
        created
    }

    /// Return the session for an identity, creating one in `Discovered`
    /// state if none exists.
    ///
    /// Creation is serialized against concurrent calls for the same
    /// identity: N concurrent calls yield handles to one session.
    pub async fn lookup_or_create(&self, identity: &DeviceIdentity) -> SessionHandle {
        let mut sessions = self.sessions.lock().await;
        if let Some(handle) = sessions.get(identity) {
            return handle.clone();
        }
        info!(device = %identity, "creating session");
        let handle = spawn_session(identity.clone(), self.ctx.clone());
        sessions.insert(identity.clone(), handle.clone());
        handle
    }

    /// Get the session for an identity, if any.
    pub async fn get(&self, identity: &DeviceIdentity) -> Option<SessionHandle> {
        self.sessions.lock().await.get(identity).cloned()
    }

    /// Remove a session, cancelling it if it is still running.
    ///
    /// A later discovery of the same identity creates a fresh session.
    pub async fn mark_lost(&self, identity: &DeviceIdentity) {
        let handle = self.sessions.lock().await.remove(identity);
        if let Some(handle) = handle {
            handle.cancel();
            handle.join().await;
            info!(device = %identity, "session removed");
        }
    }

    /// Number of tracked sessions (including parked ones).
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Snapshot of all sessions and their states.
    pub async fn states(&self) -> Vec<(DeviceIdentity, SessionState)> {
        self.sessions
            .lock()
            .await
            .iter()
            .map(|(identity, handle)| (identity.clone(), handle.state()))
            .collect()
    }

    /// Consume terminal notices from sessions until cancelled.
    ///
    /// May be run at most once per registry; the hub spawns it alongside
    /// the scan loop.
    pub async fn reap(self: Arc<Self>, cancel: CancellationToken) {
        let Some(mut rx) = self.lost_rx.lock().await.take() else {
            return;
        };
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                notice = rx.recv() => match notice {
                    Some(notice) => self.handle_lost(notice).await,
                    None => break,
                },
            }
        }
    }

    async fn handle_lost(&self, notice: LostNotice) {
        match notice.reason {
            // Parked: the entry stays so rediscovery does not spawn fresh
            // sessions against a device that will never match.
            LostReason::Incompatible => {
                debug!(device = %notice.identity, "session parked");
            }
            LostReason::MaxFailures | LostReason::Unreachable | LostReason::Removed => {
                self.mark_lost(&notice.identity).await;
            }
        }
    }

    /// Cancel all sessions and wait for their tasks to finish.
    pub async fn shutdown(&self) {
        let handles: Vec<SessionHandle> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain().map(|(_, handle)| handle).collect()
        };
        for handle in &handles {
            handle.cancel();
        }
        for handle in handles {
            handle.join().await;
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry").finish_non_exhaustive()
    }
}
