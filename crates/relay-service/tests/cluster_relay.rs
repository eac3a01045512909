//! Cross-instance relay over a shared in-memory bus.
//!
//! Two `RelayInstance`s on one `InMemoryBus` stand in for two processes on
//! one Redis. Rooms stay per-instance; only point-to-point signals cross.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use relay_service::protocol::RelayKind;
use relay_service::registry::ClientId;
use relay_test_utils::fixtures::{answer_frame, ice_frame, offer_frame, wait_for_subscribers};
use relay_test_utils::{FailingPublisher, InMemoryBus, RelayInstance};
use serde_json::json;

const QUIET: Duration = Duration::from_millis(100);

#[tokio::test]
async fn test_offer_crosses_instances() {
    let bus = InMemoryBus::new();
    let a = RelayInstance::clustered(&bus).await;
    let b = RelayInstance::clustered(&bus).await;

    let (x, _x_handle, x_id) = a.join("r1").await;
    a.wait_for_room("r1", 1).await;
    let (mut y, _y_handle, y_id) = b.join("r1").await;
    b.wait_for_room("r1", 1).await;

    x.send_json(offer_frame(&y_id, "v=0 remote"));

    let offer = y.expect_message("offer").await;
    assert_eq!(offer, json!({"client_id": x_id, "sdp": "v=0 remote"}));

    let published = bus.published();
    assert_eq!(published.len(), 1);
    let envelope = published.first().unwrap();
    assert_eq!(envelope.kind, RelayKind::Offer);
    assert_eq!(envelope.sender_client_id, ClientId::from(x_id.as_str()));
    assert_eq!(envelope.target_client_id, ClientId::from(y_id.as_str()));
    assert_eq!(envelope.room_id.as_deref(), Some("r1"));

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn test_full_negotiation_across_instances() {
    let bus = InMemoryBus::new();
    let a = RelayInstance::clustered(&bus).await;
    let b = RelayInstance::clustered(&bus).await;

    let (mut x, _x_handle, x_id) = a.join("r1").await;
    a.wait_for_room("r1", 1).await;
    let (mut y, _y_handle, y_id) = b.join("r1").await;
    b.wait_for_room("r1", 1).await;

    x.send_json(offer_frame(&y_id, "v=0 offer"));
    y.expect_message("offer").await;

    y.send_json(answer_frame(&x_id, "v=0 answer"));
    let answer = x.expect_message("answer").await;
    assert_eq!(answer["client_id"], y_id.as_str());
    assert_eq!(answer["sdp"], "v=0 answer");

    y.send_json(ice_frame(&x_id, "candidate:2 1 udp 1 10.0.0.2 6000 typ host", "audio", 1));
    let ice = x.expect_message("ice-candidate").await;
    assert_eq!(ice["client_id"], y_id.as_str());
    assert_eq!(ice["sdpMid"], "audio");
    assert_eq!(ice["sdpMLineIndex"], 1);

    let kinds: Vec<RelayKind> = bus.published().iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![RelayKind::Offer, RelayKind::Answer, RelayKind::Ice]);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn test_presence_stays_local_to_each_instance() {
    let bus = InMemoryBus::new();
    let a = RelayInstance::clustered(&bus).await;
    let b = RelayInstance::clustered(&bus).await;

    let (mut x, _x_handle, _) = a.join("r1").await;
    a.wait_for_room("r1", 1).await;
    let (_y, _y_handle, _) = b.join("r1").await;
    b.wait_for_room("r1", 1).await;

    x.expect_silence(QUIET).await;
    assert!(bus.published().is_empty());

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn test_same_instance_other_room_is_reached_through_the_bus() {
    let bus = InMemoryBus::new();
    let a = RelayInstance::clustered(&bus).await;

    let (x, _x_handle, x_id) = a.join("r1").await;
    a.wait_for_room("r1", 1).await;
    let (mut y, _y_handle, y_id) = a.join("r2").await;
    a.wait_for_room("r2", 1).await;

    x.send_json(offer_frame(&y_id, "v=0"));
    let offer = y.expect_message("offer").await;
    assert_eq!(offer["client_id"], x_id.as_str());

    a.shutdown().await;
}

#[tokio::test]
async fn test_target_hosted_nowhere_is_ignored_by_every_bridge() {
    let bus = InMemoryBus::new();
    let a = RelayInstance::clustered(&bus).await;
    let b = RelayInstance::clustered(&bus).await;

    let (mut x, _x_handle, _) = a.join("r1").await;
    a.wait_for_room("r1", 1).await;
    let (mut y, _y_handle, _) = b.join("r1").await;
    b.wait_for_room("r1", 1).await;

    x.send_json(offer_frame("ghost", "v=0"));

    x.expect_silence(QUIET).await;
    y.expect_silence(QUIET).await;
    assert_eq!(bus.published().len(), 1);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn test_malformed_bus_traffic_does_not_stop_the_bridge() {
    let bus = InMemoryBus::new();
    let a = RelayInstance::clustered(&bus).await;
    let b = RelayInstance::clustered(&bus).await;

    let (x, _x_handle, _) = a.join("r1").await;
    a.wait_for_room("r1", 1).await;
    let (mut y, _y_handle, y_id) = b.join("r1").await;
    b.wait_for_room("r1", 1).await;

    bus.inject("offer", "not json");
    bus.inject("chat", "{}");
    bus.inject(
        "answer",
        &json!({
            "type": "offer",
            "sender_client_id": "remote",
            "target_client_id": y_id,
            "payload": {"client_id": "remote", "sdp": "v=0"}
        })
        .to_string(),
    );

    x.send_json(offer_frame(&y_id, "v=0 after garbage"));
    let offer = y.expect_message("offer").await;
    assert_eq!(offer["sdp"], "v=0 after garbage");

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn test_delivery_resumes_after_bus_drops_subscriptions() {
    let bus = InMemoryBus::new();
    let a = RelayInstance::clustered(&bus).await;
    let b = RelayInstance::clustered(&bus).await;

    let (x, _x_handle, x_id) = a.join("r1").await;
    a.wait_for_room("r1", 1).await;
    let (mut y, _y_handle, y_id) = b.join("r1").await;
    b.wait_for_room("r1", 1).await;

    x.send_json(offer_frame(&y_id, "v=0 before"));
    y.expect_message("offer").await;

    bus.drop_subscribers();
    // Both bridges come back on their own
    wait_for_subscribers(&bus, 2).await;

    x.send_json(offer_frame(&y_id, "v=0 after"));
    let offer = y.expect_message("offer").await;
    assert_eq!(offer, json!({"client_id": x_id, "sdp": "v=0 after"}));

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn test_publish_failure_drops_signal_and_keeps_session() {
    let relay = RelayInstance::with_publisher(Arc::new(FailingPublisher));

    let (mut x, x_handle, _) = relay.join("r1").await;
    relay.wait_for_room("r1", 1).await;

    x.send_json(offer_frame("remote-peer", "v=0"));
    // Bus failures are not reported to the client
    x.expect_silence(QUIET).await;
    assert!(!x_handle.is_cancelled());

    let (_y, _y_handle, _) = relay.join("r1").await;
    let payload = x.expect_message("new-client").await;
    assert!(payload["client_id"].is_string());
}
