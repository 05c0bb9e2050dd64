//! Live fan-out hub.
//!
//! Every connected push listener gets its own bounded queue. Delivery is
//! best-effort per listener: a slow consumer loses events rather than
//! stalling ingestion or other listeners.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

use gridpulse_common::{PushEvent, TelemetryRecord, current_timestamp_millis};

/// Per-listener queue depth. Sized for bursts of a few seconds of typical
/// device chatter, not for a consumer that never reads.
pub const LISTENER_QUEUE_DEPTH: usize = 64;

/// Registry of live push listeners.
#[derive(Clone, Default)]
pub struct FanoutHub {
    listeners: Arc<RwLock<HashMap<Uuid, mpsc::Sender<String>>>>,
}

impl FanoutHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new listener and hand back its id and event stream.
    ///
    /// The first message on the stream is a greeting frame so clients can
    /// confirm the channel is live before any telemetry arrives.
    pub fn subscribe(&self) -> (Uuid, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(LISTENER_QUEUE_DEPTH);
        let id = Uuid::new_v4();

        let greeting = format!(
            r#"{{"type":"hello","ts":{}}}"#,
            current_timestamp_millis()
        );
        // Queue is empty at this point, so the greeting always fits.
        let _ = tx.try_send(greeting);

        self.listeners.write().insert(id, tx);
        tracing::debug!(listener = %id, "Push listener connected");

        (id, rx)
    }

    /// Remove a listener.
    pub fn unsubscribe(&self, id: Uuid) {
        if self.listeners.write().remove(&id).is_some() {
            tracing::debug!(listener = %id, "Push listener disconnected");
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver a record to every live listener.
    ///
    /// The event is serialized once and cloned per listener. A full queue
    /// drops this event for that listener only; a closed queue removes the
    /// listener.
    pub fn broadcast(&self, record: &TelemetryRecord) {
        let event = PushEvent::from_record(record);
        let frame = match serde_json::to_string(&event) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize push event");
                return;
            }
        };

        let mut closed = Vec::new();
        {
            let listeners = self.listeners.read();
            for (id, tx) in listeners.iter() {
                match tx.try_send(frame.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(listener = %id, "Push queue full, dropping event");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        closed.push(*id);
                    }
                }
            }
        }

        for id in closed {
            self.unsubscribe(id);
        }
    }
}
