//! Cross-instance pub/sub bus.
//!
//! Publishing goes through `RelayPublisher` so the manager can be tested
//! without Redis. Subscribing goes through `RelaySubscriber`, which hands the
//! cluster bridge a stream of `BusMessage`s and can be called again after the
//! stream ends.

mod redis_bus;

pub use redis_bus::RedisRelayBus;

use crate::errors::SignalingError;
use crate::protocol::{RelayEnvelope, RelayKind};
use futures::stream::BoxStream;

/// One raw message received on a relay channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub channel: String,
    pub payload: String,
}

/// Stream of raw messages from every relay channel.
pub type BusStream = BoxStream<'static, BusMessage>;

/// Publish side of the bus.
#[async_trait::async_trait]
pub trait RelayPublisher: Send + Sync {
    /// Publish `envelope` on the channel named after its kind.
    ///
    /// # Errors
    ///
    /// `Bus` if the publish fails. The message is lost; callers log and move on.
    async fn publish(&self, envelope: &RelayEnvelope) -> Result<(), SignalingError>;
}

/// Subscribe side of the bus.
#[async_trait::async_trait]
pub trait RelaySubscriber: Send + Sync {
    /// Open a subscription to every relay channel.
    ///
    /// The stream ends when the underlying connection drops; callers
    /// subscribe again to resume.
    ///
    /// # Errors
    ///
    /// `Bus` if the subscription cannot be established.
    async fn subscribe(&self) -> Result<BusStream, SignalingError>;
}

/// Channel names the bridge subscribes to.
#[must_use]
pub fn relay_channels() -> Vec<&'static str> {
    RelayKind::ALL.iter().map(|kind| kind.channel()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_channels_cover_every_kind() {
        let channels = relay_channels();
        assert_eq!(channels.len(), RelayKind::ALL.len());
        assert!(channels.contains(&"ice"));
        assert!(channels.contains(&"leave_client"));
    }
}
