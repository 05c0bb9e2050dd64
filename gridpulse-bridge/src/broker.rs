//! Broker link: connect, subscribe, and reconnect forever.
//!
//! The link owns the MQTT session and reports everything it sees as tagged
//! [`BrokerEvent`]s on a single channel, so the ingestion pipeline observes
//! connection transitions and messages in the order they happened.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use gridpulse_common::{BrokerConfig, Result};

use crate::state::Health;

/// rumqttc request queue capacity.
const REQUEST_QUEUE_CAPACITY: usize = 64;

/// Everything the broker loop reports downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// Session established and subscriptions issued.
    Connected,
    /// A previously established session dropped.
    Disconnected,
    /// An inbound publish, payload as received.
    Message { topic: String, payload: Vec<u8> },
}

/// The configured topic patterns, re-issued in full on every session
/// establishment. The set itself never changes after startup, so a
/// reconnect can neither accumulate nor drop subscriptions.
#[derive(Debug, Clone)]
pub struct SubscriptionSet {
    patterns: Vec<String>,
}

impl SubscriptionSet {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Issue every pattern through `subscribe`. A per-pattern failure is
    /// logged and does not stop the remaining patterns; the failed one is
    /// retried on the next session.
    pub async fn resubscribe<F, Fut, E>(&self, mut subscribe: F)
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: std::fmt::Display,
    {
        for topic in &self.patterns {
            match subscribe(topic.clone()).await {
                Ok(()) => tracing::info!(topic = %topic, "Subscribed"),
                Err(e) => tracing::error!(topic = %topic, error = %e, "Subscribe failed"),
            }
        }
    }
}

/// Owns the MQTT client and event loop.
pub struct BrokerLink {
    client: AsyncClient,
    event_loop: EventLoop,
    subscriptions: SubscriptionSet,
    reconnect_delay: Duration,
    health: Arc<Health>,
    events: mpsc::Sender<BrokerEvent>,
}

impl BrokerLink {
    /// Build the MQTT session from configuration. No network traffic happens
    /// until [`BrokerLink::run`] polls the event loop.
    pub fn connect(
        config: &BrokerConfig,
        topics: Vec<String>,
        health: Arc<Health>,
        events: mpsc::Sender<BrokerEvent>,
    ) -> Result<Self> {
        let endpoint = config.endpoint()?;

        let mut options = MqttOptions::new(client_id(&config.client_id_prefix), endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        if endpoint.tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, event_loop) = AsyncClient::new(options, REQUEST_QUEUE_CAPACITY);

        Ok(Self {
            client,
            event_loop,
            subscriptions: SubscriptionSet::new(topics),
            reconnect_delay: Duration::from_secs(config.reconnect_secs),
            health,
            events,
        })
    }

    /// Drive the event loop until shutdown.
    ///
    /// Every connection error flips health to disconnected, waits the fixed
    /// backoff, and polls again; rumqttc re-dials on the next poll.
    /// Subscriptions are re-issued on every ConnAck since the session may be
    /// clean.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut was_connected = false;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("Broker loop shutting down");
                        break;
                    }
                }
                event = self.event_loop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        was_connected = true;
                        self.health.set_broker_connected(true);
                        tracing::info!("Connected to broker");

                        let client = self.client.clone();
                        self.subscriptions
                            .resubscribe(move |topic| {
                                let client = client.clone();
                                async move { client.subscribe(topic, QoS::AtLeastOnce).await }
                            })
                            .await;

                        if self.events.send(BrokerEvent::Connected).await.is_err() {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = BrokerEvent::Message {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                        };
                        if self.events.send(message).await.is_err() {
                            tracing::warn!("Event channel closed, broker loop stopping");
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        self.health.set_broker_connected(false);
                        if was_connected {
                            was_connected = false;
                            tracing::warn!(error = %e, "Broker connection lost");
                            let _ = self.events.send(BrokerEvent::Disconnected).await;
                        } else {
                            tracing::debug!(error = %e, "Broker connect attempt failed");
                        }
                        tokio::time::sleep(self.reconnect_delay).await;
                    }
                },
            }
        }

        let _ = self.client.disconnect().await;
    }
}

/// Per-process client id: configured prefix plus a random suffix, so a
/// restarted bridge never steals its own half-dead session.
fn client_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}
