//! Redis-backed relay bus.
//!
//! Publishing uses a `ConnectionManager`: cheap to clone, safe to use
//! concurrently, and it reconnects on its own after Redis restarts.
//! Each `subscribe` opens a fresh pub/sub connection subscribed to every
//! relay channel at once.

use super::{relay_channels, BusMessage, BusStream, RelayPublisher, RelaySubscriber};
use crate::errors::SignalingError;
use crate::observability::metrics;
use crate::protocol::RelayEnvelope;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use secrecy::{ExposeSecret, SecretString};
use std::time::Instant;
use tracing::{debug, error, instrument, warn};

#[derive(Clone)]
pub struct RedisRelayBus {
    client: Client,
    connection: ConnectionManager,
}

impl std::fmt::Debug for RedisRelayBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRelayBus").finish_non_exhaustive()
    }
}

impl RedisRelayBus {
    /// Connect and verify the server answers `PING`.
    ///
    /// # Errors
    ///
    /// `Bus` if the URL is invalid, the server is unreachable or `PING` fails.
    pub async fn connect(redis_url: &SecretString) -> Result<Self, SignalingError> {
        let client = Client::open(redis_url.expose_secret()).map_err(|e| {
            // Do NOT log redis_url, it may carry credentials
            error!(target: "relay.bus", error = %e, "Failed to open Redis client");
            SignalingError::Bus(format!("Failed to open Redis client: {e}"))
        })?;

        let mut connection = client.get_connection_manager().await.map_err(|e| {
            error!(target: "relay.bus", error = %e, "Failed to connect to Redis");
            SignalingError::Bus(format!("Failed to connect to Redis: {e}"))
        })?;

        let _: () = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(|e| {
                error!(target: "relay.bus", error = %e, "Redis PING failed");
                SignalingError::Bus(format!("Redis PING failed: {e}"))
            })?;

        debug!(target: "relay.bus", "Connected to Redis");
        Ok(Self { client, connection })
    }
}

#[async_trait::async_trait]
impl RelaySubscriber for RedisRelayBus {
    /// Messages whose payload is not valid UTF-8 are counted and skipped.
    async fn subscribe(&self) -> Result<BusStream, SignalingError> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(|e| {
            warn!(target: "relay.bus", error = %e, "Failed to open pub/sub connection");
            SignalingError::Bus(format!("Failed to open pub/sub connection: {e}"))
        })?;

        let channels = relay_channels();
        pubsub.subscribe(&channels).await.map_err(|e| {
            warn!(target: "relay.bus", error = %e, "Failed to subscribe to relay channels");
            SignalingError::Bus(format!("Failed to subscribe: {e}"))
        })?;

        debug!(target: "relay.bus", channels = ?channels, "Subscribed to relay channels");

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let channel = msg.get_channel_name().to_string();
            match msg.get_payload::<String>() {
                Ok(payload) => Some(BusMessage { channel, payload }),
                Err(e) => {
                    metrics::record_bus_error("decode");
                    warn!(target: "relay.bus", channel = %channel, error = %e, "Dropping non-text bus message");
                    None
                }
            }
        });

        Ok(stream.boxed())
    }
}

#[async_trait::async_trait]
impl RelayPublisher for RedisRelayBus {
    #[instrument(skip_all, fields(kind = envelope.kind.channel(), target_client_id = %envelope.target_client_id))]
    async fn publish(&self, envelope: &RelayEnvelope) -> Result<(), SignalingError> {
        let payload = envelope.to_json()?;
        let channel = envelope.kind.channel();

        let mut conn = self.connection.clone();
        let start = Instant::now();
        let receivers: i64 = conn.publish(channel, payload).await.map_err(|e| {
            metrics::record_bus_error("publish");
            warn!(target: "relay.bus", channel, error = %e, "Failed to publish envelope");
            SignalingError::Bus(format!("Failed to publish on {channel}: {e}"))
        })?;

        metrics::record_bus_published(channel, start.elapsed());
        debug!(target: "relay.bus", channel, receivers, "Envelope published");
        Ok(())
    }
}
