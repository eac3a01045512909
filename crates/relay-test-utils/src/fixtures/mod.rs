//! Client frames and relay instances for tests.

use crate::bus::InMemoryBus;
use crate::transport::{TestPeer, RECV_TIMEOUT};
use relay_service::bus::{RelayPublisher, RelaySubscriber};
use relay_service::cluster::ClusterBridge;
use relay_service::mailbox::MailboxReceiver;
use relay_service::manager::RoomManager;
use relay_service::registry::{Client, ClientId, RoomRegistry};
use relay_service::session::{SessionConfig, SessionHandle};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub fn join_frame(room_id: &str) -> Value {
    json!({"type": "join", "payload": {"room_id": room_id}})
}

pub fn offer_frame(target: &str, sdp: &str) -> Value {
    json!({"type": "offer", "payload": {"client_id": target, "sdp": sdp}})
}

pub fn answer_frame(target: &str, sdp: &str) -> Value {
    json!({"type": "answer", "payload": {"client_id": target, "sdp": sdp}})
}

pub fn ice_frame(target: &str, candidate: &str, sdp_mid: &str, sdp_mline_index: u16) -> Value {
    json!({
        "type": "ice-candidate",
        "payload": {
            "client_id": target,
            "candidate": candidate,
            "sdpMid": sdp_mid,
            "sdpMLineIndex": sdp_mline_index
        }
    })
}

/// Client with a fixed id and its mailbox receiver.
pub fn test_client(id: &str, mailbox_capacity: usize) -> (Client, MailboxReceiver) {
    Client::with_id(ClientId::from(id), "user", mailbox_capacity)
}

/// One relay process: registry, manager, optional bridge, shutdown token.
pub struct RelayInstance {
    pub manager: Arc<RoomManager>,
    pub session_config: SessionConfig,
    shutdown_token: CancellationToken,
    bridge: Option<JoinHandle<()>>,
}

impl RelayInstance {
    /// No bus: messages for non-local targets are dropped.
    pub fn standalone() -> Self {
        Self {
            manager: Arc::new(RoomManager::new(Arc::new(RoomRegistry::new()))),
            session_config: SessionConfig::default(),
            shutdown_token: CancellationToken::new(),
            bridge: None,
        }
    }

    /// Publishes to `bus` and delivers what arrives on it. Returns once the
    /// bridge is subscribed.
    pub async fn clustered(bus: &InMemoryBus) -> Self {
        let publisher: Arc<dyn RelayPublisher> = Arc::new(bus.clone());
        let manager = Arc::new(RoomManager::with_relay(
            Arc::new(RoomRegistry::new()),
            publisher,
        ));
        let shutdown_token = CancellationToken::new();
        let subscribers_before = bus.subscriber_count();
        let subscriber: Arc<dyn RelaySubscriber> = Arc::new(bus.clone());
        let bridge =
            ClusterBridge::new(Arc::clone(&manager)).spawn(subscriber, shutdown_token.child_token());

        wait_for_subscribers(bus, subscribers_before + 1).await;

        Self {
            manager,
            session_config: SessionConfig::default(),
            shutdown_token,
            bridge: Some(bridge),
        }
    }

    /// Publishes through `publisher`; receives nothing.
    pub fn with_publisher(publisher: Arc<dyn RelayPublisher>) -> Self {
        Self {
            manager: Arc::new(RoomManager::with_relay(
                Arc::new(RoomRegistry::new()),
                publisher,
            )),
            ..Self::standalone()
        }
    }

    #[must_use]
    pub fn with_session_config(mut self, session_config: SessionConfig) -> Self {
        self.session_config = session_config;
        self
    }

    /// Open a session on this instance.
    pub fn connect(&self) -> (TestPeer, SessionHandle) {
        TestPeer::connect(
            Arc::clone(&self.manager),
            &self.session_config,
            &self.shutdown_token,
        )
    }

    /// Open a session and join `room_id`, consuming the client id frame.
    pub async fn join(&self, room_id: &str) -> (TestPeer, SessionHandle, String) {
        let (mut peer, handle) = self.connect();
        let id = peer.client_id().await;
        peer.send_json(join_frame(room_id));
        (peer, handle, id)
    }

    /// Wait until `room_id` has exactly `members` members (0 means deleted).
    ///
    /// # Panics
    ///
    /// Panics if that does not happen within [`RECV_TIMEOUT`].
    pub async fn wait_for_room(&self, room_id: &str, members: usize) {
        let registry = self.manager.registry();
        let settled = tokio::time::timeout(RECV_TIMEOUT, async {
            loop {
                let current = registry.get(room_id).await.map_or(0, |room| room.len());
                if current == members {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(
            settled.is_ok(),
            "room {room_id} never reached {members} members"
        );
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown_token
    }

    /// Cancel every session and the bridge, then wait for the bridge.
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        if let Some(bridge) = self.bridge {
            bridge.await.unwrap();
        }
    }
}

/// Wait until `bus` has at least `count` open subscriptions.
///
/// # Panics
///
/// Panics if that does not happen within [`RECV_TIMEOUT`].
pub async fn wait_for_subscribers(bus: &InMemoryBus, count: usize) {
    let subscribed = tokio::time::timeout(RECV_TIMEOUT, async {
        while bus.subscriber_count() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(
        subscribed.is_ok(),
        "bus never reached {count} subscribers"
    );
}
