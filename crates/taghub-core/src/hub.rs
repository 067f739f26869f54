//! Top-level wiring of scanner, registry, and sink.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::Result;
use crate::events::EventBus;
use crate::gate::RadioGate;
use crate::registry::SessionRegistry;
use crate::scanner::{ScanConfig, ScanCoordinator};
use crate::session::SessionConfig;
use crate::sink::{MeasurementSink, SinkOptions, SinkWriter};
use crate::transport::RadioTransport;

/// Configuration for the hub.
#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    /// Per-session lifecycle configuration.
    pub session: SessionConfig,
    /// Discovery scan configuration.
    pub scan: ScanConfig,
    /// Sink delivery policy.
    pub sink: SinkOptions,
}

impl HubConfig {
    /// Validate the configuration and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        self.session.validate()?;
        self.scan.validate()
    }
}

/// The device lifecycle manager.
///
/// Owns the radio gate, the session registry, and the scan coordinator;
/// [`TagHub::run`] drives discovery and session reaping until cancelled or
/// until the adapter fails beyond recovery.
pub struct TagHub {
    registry: Arc<SessionRegistry>,
    scanner: ScanCoordinator,
    events: EventBus,
}

impl TagHub {
    /// Wire a hub over the given transport and measurement sink.
    pub fn new(
        transport: Arc<dyn RadioTransport>,
        sink: Arc<dyn MeasurementSink>,
        config: HubConfig,
    ) -> Self {
        let gate = Arc::new(RadioGate::new());
        let events = EventBus::default();
        let writer = SinkWriter::new(sink, config.sink);
        let registry = SessionRegistry::new(
            Arc::clone(&transport),
            Arc::clone(&gate),
            writer,
            config.session,
            events.clone(),
        );
        let scanner = ScanCoordinator::new(transport, gate, Arc::clone(&registry), config.scan);

        Self {
            registry,
            scanner,
            events,
        }
    }

    /// The hub's event bus.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Run discovery and session management until cancelled.
    ///
    /// Returns `Err` only for an unrecoverable adapter failure; all
    /// per-device trouble is contained in the sessions. On exit, every
    /// session is cancelled and awaited.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let reaper = tokio::spawn(Arc::clone(&self.registry).reap(cancel.child_token()));

        let result = self.scanner.run(cancel.clone()).await;

        cancel.cancel();
        self.registry.shutdown().await;
        let _ = reaper.await;

        info!("hub stopped");
        result
    }
}
