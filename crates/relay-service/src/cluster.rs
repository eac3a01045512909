//! Clustering bridge: the receive side of cross-instance relay.
//!
//! Every instance receives every envelope (broadcast + local filter). The
//! bridge looks the target up in the local registry only, ignores targets it
//! does not host, and writes the rebuilt client message into the target's
//! mailbox with the usual drop-on-full policy. It keeps no state of its own.
//!
//! The subscription lives until shutdown: when the bus drops it, the bridge
//! subscribes again with backoff.

use crate::bus::{BusMessage, RelaySubscriber};
use crate::manager::RoomManager;
use crate::observability::metrics;
use crate::protocol::{RelayEnvelope, RelayKind};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// First wait before resubscribing; doubles per failure.
const RESUBSCRIBE_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Upper bound on the resubscribe wait.
const RESUBSCRIBE_MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Why one subscription stopped being consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Cancelled,
    Closed,
}

/// What happened to one bus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// Written into a local client's mailbox.
    Delivered,
    /// Target is not hosted here.
    NotLocal,
    /// Target is local but the mailbox rejected the message.
    Dropped,
    /// Not a valid envelope for the channel it arrived on.
    Malformed,
}

#[derive(Clone)]
pub struct ClusterBridge {
    manager: Arc<RoomManager>,
}

impl ClusterBridge {
    #[must_use]
    pub fn new(manager: Arc<RoomManager>) -> Self {
        Self { manager }
    }

    /// Handle one message from the bus.
    pub async fn handle_bus_message(&self, message: &BusMessage) -> BridgeOutcome {
        let Some(channel_kind) = RelayKind::from_channel(&message.channel) else {
            warn!(target: "relay.cluster", channel = %message.channel, "Message on unknown channel");
            metrics::record_message_dropped("malformed");
            return BridgeOutcome::Malformed;
        };

        let envelope = match RelayEnvelope::from_json(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(target: "relay.cluster", channel = %message.channel, error = %e, "Undecodable envelope");
                metrics::record_bus_error("decode");
                metrics::record_message_dropped("malformed");
                return BridgeOutcome::Malformed;
            }
        };

        if envelope.kind != channel_kind {
            warn!(
                target: "relay.cluster",
                channel = %message.channel,
                kind = envelope.kind.channel(),
                "Envelope type does not match channel, dropping"
            );
            metrics::record_message_dropped("malformed");
            return BridgeOutcome::Malformed;
        }

        metrics::record_bus_received(channel_kind.channel());

        let target = match self.manager.find_client(&envelope.target_client_id).await {
            Ok(client) => client,
            Err(_) => {
                debug!(
                    target: "relay.cluster",
                    target_client_id = %envelope.target_client_id,
                    "Target not hosted here, ignoring"
                );
                return BridgeOutcome::NotLocal;
            }
        };

        let sender = envelope.sender_client_id.clone();
        let message = match envelope.into_message() {
            Ok(message) => message,
            Err(e) => {
                warn!(target: "relay.cluster", sender = %sender, error = %e, "Envelope payload does not fit its type");
                metrics::record_message_dropped("malformed");
                return BridgeOutcome::Malformed;
            }
        };

        match target.mailbox.deliver(message) {
            Ok(()) => {
                debug!(
                    target: "relay.cluster",
                    sender = %sender,
                    target_client_id = %target.id,
                    kind = channel_kind.channel(),
                    "Relayed message delivered"
                );
                BridgeOutcome::Delivered
            }
            Err(_) => BridgeOutcome::Dropped,
        }
    }

    /// Subscribe and consume until `cancel_token` fires.
    ///
    /// A failed subscribe or an ended stream is counted as a `subscribe` bus
    /// error and retried with exponential backoff.
    pub async fn run(self, bus: Arc<dyn RelaySubscriber>, cancel_token: CancellationToken) {
        info!(target: "relay.cluster", "Cluster bridge started");
        let mut backoff = RESUBSCRIBE_INITIAL_BACKOFF;

        loop {
            let subscribed = tokio::select! {
                biased;

                () = cancel_token.cancelled() => break,
                result = bus.subscribe() => result,
            };

            match subscribed {
                Ok(messages) => {
                    backoff = RESUBSCRIBE_INITIAL_BACKOFF;
                    match self.consume(messages, &cancel_token).await {
                        StreamEnd::Cancelled => break,
                        StreamEnd::Closed => {
                            metrics::record_bus_error("subscribe");
                            warn!(target: "relay.cluster", "Bus subscription ended, resubscribing");
                        }
                    }
                }
                Err(e) => {
                    metrics::record_bus_error("subscribe");
                    warn!(
                        target: "relay.cluster",
                        error = %e,
                        retry_in_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        "Bus subscription failed"
                    );
                }
            }

            tokio::select! {
                biased;

                () = cancel_token.cancelled() => break,
                () = tokio::time::sleep(backoff) => {}
            }
            backoff = backoff.saturating_mul(2).min(RESUBSCRIBE_MAX_BACKOFF);
        }

        info!(target: "relay.cluster", "Cluster bridge shutting down");
    }

    /// Spawn `run` on its own task.
    pub fn spawn(
        self,
        bus: Arc<dyn RelaySubscriber>,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(bus, cancel_token))
    }

    /// Handle messages from one subscription until it ends or is cancelled.
    async fn consume<S>(&self, mut messages: S, cancel_token: &CancellationToken) -> StreamEnd
    where
        S: Stream<Item = BusMessage> + Send + Unpin,
    {
        loop {
            tokio::select! {
                biased;

                () = cancel_token.cancelled() => return StreamEnd::Cancelled,
                next = messages.next() => match next {
                    Some(message) => {
                        self.handle_bus_message(&message).await;
                    }
                    None => return StreamEnd::Closed,
                },
            }
        }
    }
}
