//! Shared runtime state for the HTTP surface.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use gridpulse_store::{PrimaryStore, SecondaryStore};

use crate::broker::BrokerEvent;
use crate::hub::FanoutHub;

/// Liveness flags maintained by the broker loop, read by `/api/health`.
#[derive(Debug, Default)]
pub struct Health {
    broker_connected: AtomicBool,
}

impl Health {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_broker_connected(&self, connected: bool) {
        self.broker_connected.store(connected, Ordering::Relaxed);
    }

    pub fn broker_connected(&self) -> bool {
        self.broker_connected.load(Ordering::Relaxed)
    }
}

/// Late-bindable handle to the secondary store, shared between the
/// pipeline, the API handlers, and the background connect loop. Starts
/// empty when the store is unreachable at startup and is filled in once a
/// retry succeeds.
pub struct SecondarySlot<S> {
    inner: Arc<RwLock<Option<S>>>,
}

impl<S> Clone for SecondarySlot<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Clone> SecondarySlot<S> {
    pub fn new(initial: Option<S>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    /// Current store handle, if one is connected.
    pub fn get(&self) -> Option<S> {
        self.inner.read().clone()
    }

    /// Install a store once a connect attempt succeeds.
    pub fn set(&self, store: S) {
        *self.inner.write() = Some(store);
    }

    pub fn available(&self) -> bool {
        self.inner.read().is_some()
    }
}

/// Everything the API handlers need, cheap to clone per request.
#[derive(Clone)]
pub struct AppContext {
    pub primary: PrimaryStore,
    pub secondary: SecondarySlot<SecondaryStore>,
    pub hub: FanoutHub,
    pub health: Arc<Health>,
    /// Injection point for `/api/ingest`; shares the broker event channel so
    /// injected messages take the exact same path as broker traffic.
    pub ingest_tx: mpsc::Sender<BrokerEvent>,
}
