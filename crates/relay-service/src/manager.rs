//! Room manager: join/leave orchestration and message routing.
//!
//! The manager is the only component that decides where a message goes.
//! A message for a member of the sender's room is written straight into that
//! member's mailbox; anything else is published on the bus when a publisher
//! is configured, or dropped when it is not. Never both.

use crate::bus::RelayPublisher;
use crate::errors::SignalingError;
use crate::mailbox::Mailbox;
use crate::observability::metrics;
use crate::protocol::{RelayEnvelope, ServerMessage, Signal};
use crate::registry::{Client, ClientId, Room, RoomRegistry};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Bound on get/create/update rounds when the room keeps vanishing under a
/// joiner (each round loses a race with a concurrent last-leaver).
const MAX_JOIN_ATTEMPTS: usize = 8;

/// Where a routed message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Written into the local target's mailbox.
    Delivered,
    /// Local target's mailbox was full; message lost.
    MailboxFull,
    /// Local target's session already ended; message lost.
    MailboxClosed,
    /// Target not local; envelope published on the bus.
    Relayed,
    /// Target not local and relay disabled; message lost silently.
    Dropped,
}

impl RouteOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RouteOutcome::Delivered => "delivered",
            RouteOutcome::MailboxFull => "mailbox_full",
            RouteOutcome::MailboxClosed => "mailbox_closed",
            RouteOutcome::Relayed => "relayed",
            RouteOutcome::Dropped => "dropped",
        }
    }
}

pub struct RoomManager {
    registry: Arc<RoomRegistry>,
    relay: Option<Arc<dyn RelayPublisher>>,
}

impl RoomManager {
    /// Standalone manager: non-local targets are dropped.
    #[must_use]
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self {
            registry,
            relay: None,
        }
    }

    /// Clustered manager: non-local targets are published on the bus.
    #[must_use]
    pub fn with_relay(registry: Arc<RoomRegistry>, relay: Arc<dyn RelayPublisher>) -> Self {
        Self {
            registry,
            relay: Some(relay),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn relay_enabled(&self) -> bool {
        self.relay.is_some()
    }

    /// Add `client` to `room_id`, creating the room if needed, and tell the
    /// other members.
    ///
    /// A client already in a different room leaves it first. Joining the room
    /// the client is already in changes nothing and notifies nobody.
    ///
    /// # Errors
    ///
    /// - `InvalidPayload` if `room_id` is empty
    /// - `Internal` if the room kept disappearing under the join
    #[instrument(skip_all, fields(client_id = %client.id, room_id = %room_id))]
    pub async fn join_room(&self, client: &Client, room_id: &str) -> Result<Room, SignalingError> {
        if room_id.is_empty() {
            return Err(SignalingError::InvalidPayload(
                "room_id must not be empty".to_string(),
            ));
        }

        match self.registry.find_by_member(&client.id).await {
            Ok(current) if current.id == room_id => {
                debug!(target: "relay.manager", "Client already in room, ignoring join");
                return Ok(current);
            }
            Ok(current) => {
                debug!(
                    target: "relay.manager",
                    previous_room_id = %current.id,
                    "Client switching rooms"
                );
                if let Err(e) = self.leave_room(&client.id).await {
                    if !e.is_not_found() {
                        return Err(e);
                    }
                }
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let room = self.insert_member(client, room_id).await?;

        let recipients = room.others(&client.id).map(|c| c.mailbox.clone()).collect();
        broadcast(
            recipients,
            ServerMessage::NewClient {
                client_id: client.id.clone(),
            },
        );

        info!(target: "relay.manager", members = room.len(), "Client joined room");
        Ok(room)
    }

    /// Get-or-create the room and insert the client.
    async fn insert_member(&self, client: &Client, room_id: &str) -> Result<Room, SignalingError> {
        for attempt in 1..=MAX_JOIN_ATTEMPTS {
            match self.registry.get(room_id).await {
                Ok(_) => {}
                Err(SignalingError::RoomNotFound(_)) => {
                    let stored = self
                        .registry
                        .create(Room::with_member(room_id, client.clone()))
                        .await;
                    if stored.contains(&client.id) {
                        return Ok(stored);
                    }
                    // Another joiner created it first
                }
                Err(e) => return Err(e),
            }

            match self
                .registry
                .update(room_id, |room| {
                    room.insert(client.clone());
                })
                .await
            {
                Ok(room) => return Ok(room),
                Err(SignalingError::RoomNotFound(_)) => {
                    debug!(target: "relay.manager", attempt, "Room deleted during join, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        warn!(target: "relay.manager", "Giving up on join after repeated room deletion");
        Err(SignalingError::Internal(format!(
            "join did not settle after {MAX_JOIN_ATTEMPTS} attempts"
        )))
    }

    /// Remove the client from its room, deleting the room if it is now empty,
    /// and tell the remaining members.
    ///
    /// The notification goes to the membership as it was before removal
    /// (minus the leaver) and is sent from a detached task.
    ///
    /// # Errors
    ///
    /// `ClientNotFound` if the client is in no room.
    #[instrument(skip_all, fields(client_id = %client_id))]
    pub async fn leave_room(&self, client_id: &ClientId) -> Result<(), SignalingError> {
        let room = self.registry.find_by_member(client_id).await?;

        let recipients = room.others(client_id).map(|c| c.mailbox.clone()).collect();
        broadcast(
            recipients,
            ServerMessage::LeaveClient {
                client_id: client_id.clone(),
            },
        );

        match self
            .registry
            .update(&room.id, |room| {
                room.remove(client_id);
            })
            .await
        {
            Ok(updated) if updated.is_empty() => {
                self.registry.delete_if_empty(&room.id).await;
            }
            Ok(_) => {}
            // Someone else emptied and deleted it first
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        info!(target: "relay.manager", room_id = %room.id, "Client left room");
        Ok(())
    }

    /// Route a signal from `sender` to `target`.
    ///
    /// # Errors
    ///
    /// `Bus` if the target is remote and the publish failed.
    #[instrument(skip_all, fields(sender = %sender, target = %target, kind = signal.kind()))]
    pub async fn route_to_target(
        &self,
        sender: &ClientId,
        target: &ClientId,
        signal: Signal,
    ) -> Result<RouteOutcome, SignalingError> {
        // A sender outside any room has no local peers
        let room = match self.registry.find_by_member(sender).await {
            Ok(room) => Some(room),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let message = signal.into_message(sender.clone());

        if let Some(local) = room.as_ref().and_then(|room| room.get(target)) {
            let outcome = match local.mailbox.deliver(message) {
                Ok(()) => RouteOutcome::Delivered,
                Err(SignalingError::MailboxFull(_)) => RouteOutcome::MailboxFull,
                Err(SignalingError::MailboxClosed(_)) => RouteOutcome::MailboxClosed,
                Err(e) => return Err(e),
            };
            metrics::record_message_routed(outcome.as_str());
            return Ok(outcome);
        }

        let Some(relay) = &self.relay else {
            debug!(target: "relay.manager", "Target not local and relay disabled, dropping");
            metrics::record_message_dropped("relay_disabled");
            metrics::record_message_routed(RouteOutcome::Dropped.as_str());
            return Ok(RouteOutcome::Dropped);
        };

        let envelope =
            RelayEnvelope::wrap(sender.clone(), target.clone(), room.map(|r| r.id), message)?;
        if let Err(e) = relay.publish(&envelope).await {
            metrics::record_message_dropped("bus_error");
            return Err(e);
        }

        metrics::record_message_routed(RouteOutcome::Relayed.as_str());
        Ok(RouteOutcome::Relayed)
    }

    /// Look up a locally hosted client.
    ///
    /// # Errors
    ///
    /// `ClientNotFound` if the client is in no local room.
    pub async fn find_client(&self, client_id: &ClientId) -> Result<Client, SignalingError> {
        let room = self.registry.find_by_member(client_id).await?;
        room.get(client_id)
            .cloned()
            .ok_or_else(|| SignalingError::ClientNotFound(client_id.to_string()))
    }
}

/// Best-effort fan-out from a detached task. Never blocks the caller.
fn broadcast(recipients: Vec<Mailbox>, message: ServerMessage) {
    if recipients.is_empty() {
        return;
    }

    tokio::spawn(async move {
        for mailbox in recipients {
            // Failures are logged and counted by the mailbox itself
            let _ = mailbox.deliver(message.clone());
        }
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::mailbox::MailboxReceiver;
    use crate::protocol::RelayKind;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<RelayEnvelope>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl RelayPublisher for RecordingPublisher {
        async fn publish(&self, envelope: &RelayEnvelope) -> Result<(), SignalingError> {
            if self.fail {
                return Err(SignalingError::Bus("bus down".to_string()));
            }
            self.published.lock().unwrap().push(envelope.clone());
            Ok(())
        }
    }

    fn client(id: &str) -> (Client, MailboxReceiver) {
        Client::with_id(ClientId::from(id), "user", 4)
    }

    fn offer(sdp: &str) -> Signal {
        Signal::Offer {
            sdp: sdp.to_string(),
        }
    }

    async fn recv(rx: &mut MailboxReceiver) -> ServerMessage {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("mailbox closed")
    }

    #[tokio::test]
    async fn test_first_join_creates_room_without_broadcast() {
        let manager = RoomManager::new(Arc::new(RoomRegistry::new()));
        let (x, mut rx_x) = client("x");

        let room = manager.join_room(&x, "r1").await.unwrap();
        assert_eq!(room.len(), 1);

        tokio::task::yield_now().await;
        assert!(rx_x.try_recv().is_err(), "lone joiner gets no new-client");
    }

    #[tokio::test]
    async fn test_second_join_notifies_existing_member() {
        let manager = RoomManager::new(Arc::new(RoomRegistry::new()));
        let (x, mut rx_x) = client("x");
        let (y, mut rx_y) = client("y");

        manager.join_room(&x, "r1").await.unwrap();
        manager.join_room(&y, "r1").await.unwrap();

        assert_eq!(
            recv(&mut rx_x).await,
            ServerMessage::NewClient {
                client_id: ClientId::from("y")
            }
        );
        tokio::task::yield_now().await;
        assert!(rx_y.try_recv().is_err(), "joiner is not told about itself");
    }

    #[tokio::test]
    async fn test_empty_room_id_rejected() {
        let manager = RoomManager::new(Arc::new(RoomRegistry::new()));
        let (x, _rx) = client("x");

        let err = manager.join_room(&x, "").await.unwrap_err();
        assert!(err.is_client_visible());
        assert!(manager.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_rejoin_same_room_is_noop() {
        let manager = RoomManager::new(Arc::new(RoomRegistry::new()));
        let (x, mut rx_x) = client("x");
        let (y, _rx_y) = client("y");

        manager.join_room(&x, "r1").await.unwrap();
        manager.join_room(&y, "r1").await.unwrap();
        let _ = recv(&mut rx_x).await;

        let room = manager.join_room(&y, "r1").await.unwrap();
        assert_eq!(room.len(), 2);
        tokio::task::yield_now().await;
        assert!(rx_x.try_recv().is_err(), "no duplicate new-client");
    }

    #[tokio::test]
    async fn test_join_other_room_leaves_previous() {
        let manager = RoomManager::new(Arc::new(RoomRegistry::new()));
        let (x, mut rx_x) = client("x");
        let (y, _rx_y) = client("y");

        manager.join_room(&x, "r1").await.unwrap();
        manager.join_room(&y, "r1").await.unwrap();
        let _ = recv(&mut rx_x).await;

        manager.join_room(&y, "r2").await.unwrap();

        assert_eq!(
            recv(&mut rx_x).await,
            ServerMessage::LeaveClient {
                client_id: ClientId::from("y")
            }
        );
        let r1 = manager.registry().get("r1").await.unwrap();
        assert!(!r1.contains(&ClientId::from("y")));
        let r2 = manager.registry().get("r2").await.unwrap();
        assert!(r2.contains(&ClientId::from("y")));
    }

    #[tokio::test]
    async fn test_leave_notifies_and_last_leaver_deletes_room() {
        let manager = RoomManager::new(Arc::new(RoomRegistry::new()));
        let (x, mut rx_x) = client("x");
        let (y, _rx_y) = client("y");

        manager.join_room(&x, "r1").await.unwrap();
        manager.join_room(&y, "r1").await.unwrap();
        let _ = recv(&mut rx_x).await;

        manager.leave_room(&y.id).await.unwrap();
        assert_eq!(
            recv(&mut rx_x).await,
            ServerMessage::LeaveClient {
                client_id: ClientId::from("y")
            }
        );
        assert_eq!(manager.registry().get("r1").await.unwrap().len(), 1);

        manager.leave_room(&x.id).await.unwrap();
        assert!(manager.registry().get("r1").await.is_err());
    }

    #[tokio::test]
    async fn test_leave_unknown_client() {
        let manager = RoomManager::new(Arc::new(RoomRegistry::new()));
        let err = manager.leave_room(&ClientId::from("ghost")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_route_to_local_target() {
        let publisher = Arc::new(RecordingPublisher::default());
        let manager =
            RoomManager::with_relay(Arc::new(RoomRegistry::new()), publisher.clone());
        let (x, _rx_x) = client("x");
        let (y, mut rx_y) = client("y");

        manager.join_room(&x, "r1").await.unwrap();
        manager.join_room(&y, "r1").await.unwrap();

        let outcome = manager
            .route_to_target(&x.id, &y.id, offer("v=0"))
            .await
            .unwrap();

        assert_eq!(outcome, RouteOutcome::Delivered);
        assert_eq!(
            recv(&mut rx_y).await,
            ServerMessage::Offer {
                client_id: ClientId::from("x"),
                sdp: "v=0".to_string()
            }
        );
        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_route_to_remote_target_publishes() {
        let publisher = Arc::new(RecordingPublisher::default());
        let manager =
            RoomManager::with_relay(Arc::new(RoomRegistry::new()), publisher.clone());
        let (x, _rx_x) = client("x");
        manager.join_room(&x, "r1").await.unwrap();

        let outcome = manager
            .route_to_target(
                &x.id,
                &ClientId::from("remote"),
                Signal::IceCandidate {
                    candidate: "c".to_string(),
                    sdp_mid: None,
                    sdp_mline_index: Some(0),
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome, RouteOutcome::Relayed);
        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        let envelope = published.first().unwrap();
        assert_eq!(envelope.kind, RelayKind::Ice);
        assert_eq!(envelope.sender_client_id, ClientId::from("x"));
        assert_eq!(envelope.target_client_id, ClientId::from("remote"));
        assert_eq!(envelope.room_id.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_route_without_relay_drops() {
        let manager = RoomManager::new(Arc::new(RoomRegistry::new()));
        let (x, mut rx_x) = client("x");
        manager.join_room(&x, "r1").await.unwrap();

        let outcome = manager
            .route_to_target(&x.id, &ClientId::from("remote"), offer("v=0"))
            .await
            .unwrap();

        assert_eq!(outcome, RouteOutcome::Dropped);
        tokio::task::yield_now().await;
        assert!(rx_x.try_recv().is_err(), "sender sees no error");
    }

    #[tokio::test]
    async fn test_sender_without_room_is_treated_as_remote() {
        let publisher = Arc::new(RecordingPublisher::default());
        let manager =
            RoomManager::with_relay(Arc::new(RoomRegistry::new()), publisher.clone());

        let outcome = manager
            .route_to_target(&ClientId::from("x"), &ClientId::from("y"), offer("v=0"))
            .await
            .unwrap();

        assert_eq!(outcome, RouteOutcome::Relayed);
        let published = publisher.published.lock().unwrap();
        assert_eq!(published.first().and_then(|e| e.room_id.clone()), None);
    }

    #[tokio::test]
    async fn test_target_in_other_local_room_is_not_delivered_directly() {
        let publisher = Arc::new(RecordingPublisher::default());
        let manager =
            RoomManager::with_relay(Arc::new(RoomRegistry::new()), publisher.clone());
        let (x, _rx_x) = client("x");
        let (z, mut rx_z) = client("z");
        manager.join_room(&x, "r1").await.unwrap();
        manager.join_room(&z, "r2").await.unwrap();

        let outcome = manager
            .route_to_target(&x.id, &z.id, offer("v=0"))
            .await
            .unwrap();

        assert_eq!(outcome, RouteOutcome::Relayed);
        tokio::task::yield_now().await;
        assert!(rx_z.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_target_mailbox() {
        let manager = RoomManager::new(Arc::new(RoomRegistry::new()));
        let (x, _rx_x) = client("x");
        let (y, _rx_y) = Client::with_id(ClientId::from("y"), "user", 1);
        manager.join_room(&y, "r1").await.unwrap();
        manager.join_room(&x, "r1").await.unwrap();

        // Give the new-client broadcast to y time to land and fill its mailbox
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let outcome = manager
            .route_to_target(&x.id, &y.id, offer("v=0"))
            .await
            .unwrap();
        assert_eq!(outcome, RouteOutcome::MailboxFull);
    }

    #[tokio::test]
    async fn test_publish_failure_is_bus_error() {
        let publisher = Arc::new(RecordingPublisher {
            fail: true,
            ..Default::default()
        });
        let manager = RoomManager::with_relay(Arc::new(RoomRegistry::new()), publisher);

        let err = manager
            .route_to_target(&ClientId::from("x"), &ClientId::from("y"), offer("v=0"))
            .await
            .unwrap_err();
        assert!(matches!(err, SignalingError::Bus(_)));
        assert!(!err.is_client_visible());
    }

    #[tokio::test]
    async fn test_find_client() {
        let manager = RoomManager::new(Arc::new(RoomRegistry::new()));
        let (x, _rx_x) = client("x");
        manager.join_room(&x, "r1").await.unwrap();

        assert_eq!(manager.find_client(&x.id).await.unwrap().id, x.id);
        assert!(manager
            .find_client(&ClientId::from("nobody"))
            .await
            .unwrap_err()
            .is_not_found());
    }
}
