//! MQTT Publisher - broker connection lifecycle
//!
//! ## Responsibilities
//!
//! - Own the broker connection and its event loop
//! - Reconnect with bounded exponential backoff
//! - Fire-and-forget QoS 0 publishing with a per-call timeout
//!
//! Delivery is best-effort: while the broker is unreachable, publish
//! attempts fast-fail and the message for that tick is dropped.

use crate::error::{Error, Result};
use crate::state::BrokerConfig;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Broker connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Destination for telemetry payloads; seam for tests without a broker
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

/// MQTT client wrapper owning the broker connection
pub struct MqttPublisher {
    client: AsyncClient,
    state: RwLock<ConnectionState>,
    publish_timeout: Duration,
}

impl MqttPublisher {
    /// Create the client without starting the event loop
    pub fn new(config: &BrokerConfig) -> (Arc<Self>, EventLoop) {
        let mut options = MqttOptions::new(
            config.client_id.clone(),
            config.host.clone(),
            config.port,
        );
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user.clone(), pass.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, 32);
        let publisher = Arc::new(Self {
            client,
            state: RwLock::new(ConnectionState::Disconnected),
            publish_timeout: Duration::from_millis(config.publish_timeout_ms),
        });
        (publisher, eventloop)
    }

    /// Create the client and run its event loop in the background
    pub fn start(config: &BrokerConfig, shutdown: watch::Receiver<bool>) -> Arc<Self> {
        let (publisher, eventloop) = Self::new(config);
        tracing::info!(
            host = %config.host,
            port = config.port,
            client_id = %config.client_id,
            "Connecting to broker"
        );
        publisher.clone().run_event_loop(eventloop, shutdown);
        publisher
    }

    /// Current connection state
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    async fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write().await;
        if *state != next {
            tracing::debug!(from = %*state, to = %next, "Broker connection state changed");
            *state = next;
        }
    }

    /// Drive the connection until shutdown, reconnecting with backoff
    fn run_event_loop(self: Arc<Self>, mut eventloop: EventLoop, mut shutdown: watch::Receiver<bool>) {
        tokio::spawn(async move {
            let mut backoff = INITIAL_BACKOFF;
            self.set_state(ConnectionState::Connecting).await;

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    event = eventloop.poll() => match event {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            backoff = INITIAL_BACKOFF;
                            self.set_state(ConnectionState::Connected).await;
                            tracing::info!("Connected to broker");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            self.set_state(ConnectionState::Disconnected).await;
                            tracing::warn!(
                                error = %e,
                                retry_in_secs = backoff.as_secs(),
                                "Broker connection lost"
                            );
                            tokio::select! {
                                _ = shutdown.changed() => break,
                                _ = tokio::time::sleep(backoff) => {}
                            }
                            backoff = (backoff * 2).min(MAX_BACKOFF);
                            self.set_state(ConnectionState::Connecting).await;
                        }
                    }
                }
            }

            self.set_state(ConnectionState::Disconnected).await;
            tracing::debug!("Broker event loop stopped");
        });
    }

    /// Close the broker connection
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!(error = %e, "Broker disconnect failed");
        }
        self.set_state(ConnectionState::Disconnected).await;
    }
}

#[async_trait]
impl TelemetrySink for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if self.connection_state().await != ConnectionState::Connected {
            return Err(Error::Network("broker not connected".to_string()));
        }

        let publish = self
            .client
            .publish(topic, QoS::AtMostOnce, false, payload);
        match tokio::time::timeout(self.publish_timeout, publish).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::Network(format!(
                "publish to {} timed out",
                topic
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> BrokerConfig {
        BrokerConfig {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            client_id: "countstream-test".to_string(),
            keep_alive_secs: 30,
            publish_timeout_ms: 100,
        }
    }

    #[tokio::test]
    async fn test_initial_state_is_disconnected() {
        let (publisher, _eventloop) = MqttPublisher::new(&test_config());
        assert_eq!(
            publisher.connection_state().await,
            ConnectionState::Disconnected
        );
    }

    #[tokio::test]
    async fn test_publish_fast_fails_while_disconnected() {
        let (publisher, _eventloop) = MqttPublisher::new(&test_config());
        let result = publisher.publish("camera1/tracking", b"{}".to_vec()).await;
        assert!(matches!(result, Err(Error::Network(_))));
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let (publisher, _eventloop) = MqttPublisher::new(&test_config());
        publisher.set_state(ConnectionState::Connecting).await;
        assert_eq!(
            publisher.connection_state().await,
            ConnectionState::Connecting
        );
        publisher.set_state(ConnectionState::Connected).await;
        assert_eq!(
            publisher.connection_state().await,
            ConnectionState::Connected
        );
        publisher.set_state(ConnectionState::Disconnected).await;
        assert_eq!(
            publisher.connection_state().await,
            ConnectionState::Disconnected
        );
    }
}
