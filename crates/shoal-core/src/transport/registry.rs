//! Transport stub registry
//!
//! Holds zero or one live stub per [`TransportKind`]. Stubs are built lazily
//! from registered factories on first use and dropped again when stopped, so
//! the next use builds a fresh one.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{TransportFactory, TransportStub};
use crate::error::ShoalError;
use crate::types::TransportKind;

/// Registry of transport factories and their live stubs
#[derive(Default)]
pub struct TransportRegistry {
    factories: RwLock<HashMap<TransportKind, TransportFactory>>,
    stubs: Mutex<HashMap<TransportKind, TransportStub>>,
}

impl TransportRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory for a kind.
    ///
    /// An existing stub of that kind is stopped and evicted; the next use
    /// builds one from the new factory.
    pub async fn register_factory(&self, kind: TransportKind, factory: TransportFactory) {
        self.factories.write().insert(kind, factory);

        let previous = self.stubs.lock().await.remove(&kind);
        if let Some(stub) = previous {
            info!(%kind, "Replacing transport stub");
            if let Err(e) = stub.stop().await {
                warn!(%kind, error = %e, "Failed to stop replaced transport stub");
            }
        }
    }

    /// Whether a factory is registered for `kind`
    pub fn supports(&self, kind: TransportKind) -> bool {
        self.factories.read().contains_key(&kind)
    }

    /// The stub for `kind`, building it on first use
    pub async fn get_stub(&self, kind: TransportKind) -> Result<TransportStub, ShoalError> {
        let mut stubs = self.stubs.lock().await;
        if let Some(stub) = stubs.get(&kind) {
            return Ok(stub.clone());
        }

        let factory = self
            .factories
            .read()
            .get(&kind)
            .cloned()
            .ok_or_else(|| ShoalError::UnsupportedTransport(kind.to_string()))?;
        let stub = factory()?;
        debug!(%kind, stream = stub.is_stream(), "Created transport stub");

        stubs.insert(kind, stub.clone());
        Ok(stub)
    }

    /// Start the transport for `kind`, building its stub if needed
    pub async fn start(&self, kind: TransportKind) -> Result<(), ShoalError> {
        let stub = self.get_stub(kind).await?;
        if stub.started() {
            return Ok(());
        }
        stub.start().await?;
        info!(%kind, "Transport started");
        Ok(())
    }

    /// Stop the transport for `kind` and evict its stub. No-op if none is live.
    pub async fn stop(&self, kind: TransportKind) -> Result<(), ShoalError> {
        let stub = self.stubs.lock().await.remove(&kind);
        match stub {
            Some(stub) => {
                stub.stop().await?;
                info!(%kind, "Transport stopped");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Whether a live stub of `kind` is running. Never builds a stub.
    pub async fn is_started(&self, kind: TransportKind) -> bool {
        self.stubs
            .lock()
            .await
            .get(&kind)
            .is_some_and(TransportStub::started)
    }

    /// Whether any live stub is running
    pub async fn any_started(&self) -> bool {
        self.stubs.lock().await.values().any(TransportStub::started)
    }

    /// Start every kind, best effort.
    ///
    /// Kinds without a factory, or whose start fails, are logged and
    /// skipped. Returns the kinds that are running afterwards.
    pub async fn start_all(&self) -> Vec<TransportKind> {
        let mut started = Vec::new();
        for kind in TransportKind::ALL {
            if !self.supports(kind) {
                debug!(%kind, "No transport registered, skipping");
                continue;
            }
            match self.start(kind).await {
                Ok(()) => started.push(kind),
                Err(e) => warn!(%kind, error = %e, "Failed to start transport"),
            }
        }
        started
    }

    /// Stop and evict every live stub. Failures are logged.
    pub async fn stop_all(&self) {
        let stubs: Vec<TransportStub> = self.stubs.lock().await.drain().map(|(_, s)| s).collect();
        for stub in stubs {
            let kind = stub.kind();
            match stub.stop().await {
                Ok(()) => info!(%kind, "Transport stopped"),
                Err(e) => warn!(%kind, error = %e, "Failed to stop transport"),
            }
        }
    }

    /// Kinds with a live stub
    pub async fn live_kinds(&self) -> Vec<TransportKind> {
        let mut kinds: Vec<TransportKind> = self.stubs.lock().await.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<TransportKind> = self.factories.read().keys().copied().collect();
        kinds.sort();
        f.debug_struct("TransportRegistry")
            .field("factories", &kinds)
            .finish_non_exhaustive()
    }
}
