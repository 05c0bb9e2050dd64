//! Ingestion pipeline: broker events in, stores and live listeners out.
//!
//! The two store writes and the fan-out are independent failure domains.
//! A failed write is logged against its own store and the record still
//! reaches the other targets.

use tokio::sync::{mpsc, watch};

use gridpulse_common::normalize;
use gridpulse_store::TelemetryWriter;

use crate::broker::BrokerEvent;
use crate::hub::FanoutHub;
use crate::state::SecondarySlot;

/// Consumes broker events and distributes normalized records.
pub struct Pipeline<P, S> {
    primary: P,
    secondary: SecondarySlot<S>,
    hub: FanoutHub,
    events: mpsc::Receiver<BrokerEvent>,
}

impl<P, S> Pipeline<P, S>
where
    P: TelemetryWriter,
    S: TelemetryWriter + Clone,
{
    pub fn new(
        primary: P,
        secondary: SecondarySlot<S>,
        hub: FanoutHub,
        events: mpsc::Receiver<BrokerEvent>,
    ) -> Self {
        Self {
            primary,
            secondary,
            hub,
            events,
        }
    }

    /// Process events until shutdown or until the event channel closes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("Pipeline shutting down");
                        break;
                    }
                }
                event = self.events.recv() => match event {
                    Some(BrokerEvent::Message { topic, payload }) => {
                        self.handle_message(&topic, &payload).await;
                    }
                    Some(BrokerEvent::Connected) => {
                        tracing::info!("Broker link established");
                    }
                    Some(BrokerEvent::Disconnected) => {
                        tracing::warn!("Broker link lost");
                    }
                    None => {
                        tracing::info!("Event channel closed, pipeline stopping");
                        break;
                    }
                },
            }
        }
    }

    async fn handle_message(&self, topic: &str, payload: &[u8]) {
        let record = normalize(topic, payload);

        // Fan-out first: broadcast is synchronous and lossy, and must never
        // wait on either store write.
        self.hub.broadcast(&record);

        let secondary = self.secondary.get();
        let primary_write = self.primary.insert(&record);
        let secondary_write = async {
            match &secondary {
                Some(secondary) => Some(secondary.insert(&record).await),
                None => None,
            }
        };

        let (primary_result, secondary_result) = tokio::join!(primary_write, secondary_write);

        if let Err(e) = primary_result {
            tracing::error!(device_id = %record.device_id, error = %e, "Primary store write failed");
        }
        if let Some(Err(e)) = secondary_result {
            tracing::error!(device_id = %record.device_id, error = %e, "Secondary store write failed");
        }

        tracing::debug!(device_id = %record.device_id, topic = %record.topic, "Record ingested");
    }
}
