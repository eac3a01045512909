//! In-process relay bus.
//!
//! `InMemoryBus` fans every published envelope out to every subscriber,
//! the publisher's own instance included, the same way a Redis channel
//! does. Several `RoomManager`s sharing one bus behave like a cluster.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use relay_service::bus::{BusMessage, BusStream, RelayPublisher, RelaySubscriber};
use relay_service::errors::SignalingError;
use relay_service::protocol::RelayEnvelope;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

const BUS_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct InMemoryBus {
    /// Replaced wholesale by `drop_subscribers`, which ends every open stream.
    sender: Arc<Mutex<broadcast::Sender<BusMessage>>>,
    published: Arc<Mutex<Vec<RelayEnvelope>>>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            sender: Arc::new(Mutex::new(sender)),
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// End every open subscription, as a Redis restart would. Messages sent
    /// before subscribers come back are lost.
    pub fn drop_subscribers(&self) {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        *self.sender.lock().unwrap() = sender;
    }

    /// Number of open subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.lock().unwrap().receiver_count()
    }

    /// Publish a raw payload, bypassing envelope encoding.
    pub fn inject(&self, channel: &str, payload: &str) {
        self.send(BusMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
    }

    /// Every envelope published so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<RelayEnvelope> {
        self.published.lock().unwrap().clone()
    }

    fn send(&self, message: BusMessage) {
        // No subscribers is not an error, same as PUBLISH returning 0
        let _ = self.sender.lock().unwrap().send(message);
    }
}

#[async_trait]
impl RelayPublisher for InMemoryBus {
    async fn publish(&self, envelope: &RelayEnvelope) -> Result<(), SignalingError> {
        let payload = envelope.to_json()?;
        self.published.lock().unwrap().push(envelope.clone());
        self.send(BusMessage {
            channel: envelope.kind.channel().to_string(),
            payload,
        });
        Ok(())
    }
}

#[async_trait]
impl RelaySubscriber for InMemoryBus {
    /// Every message published after this call, until `drop_subscribers`.
    async fn subscribe(&self) -> Result<BusStream, SignalingError> {
        let receiver = self.sender.lock().unwrap().subscribe();
        let messages = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => return Some((message, receiver)),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        Ok(messages.boxed())
    }
}

/// Publisher whose every publish fails, as with an unreachable Redis.
#[derive(Debug, Default, Clone)]
pub struct FailingPublisher;

#[async_trait]
impl RelayPublisher for FailingPublisher {
    async fn publish(&self, envelope: &RelayEnvelope) -> Result<(), SignalingError> {
        Err(SignalingError::Bus(format!(
            "publish on {} refused",
            envelope.kind.channel()
        )))
    }
}
