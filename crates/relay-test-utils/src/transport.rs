//! In-memory client transport.
//!
//! `TestPeer` plays the remote end of a session: it writes frames the
//! session reads and reads frames the session writes, all over unbounded
//! channels. The session under test is the real one from `relay-service`.

use futures::channel::mpsc;
use futures::StreamExt;
use relay_service::manager::RoomManager;
use relay_service::session::{start_session, Frame, SessionConfig, SessionHandle};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long a peer waits for the next frame before failing the test.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Read-side error injected by a test.
#[derive(Debug, Clone, thiserror::Error)]
#[error("transport error: {0}")]
pub struct TestTransportError(pub String);

/// Remote end of an in-memory session.
pub struct TestPeer {
    to_server: Option<mpsc::UnboundedSender<Result<Frame, TestTransportError>>>,
    from_server: mpsc::UnboundedReceiver<Frame>,
    client_id: Option<String>,
}

impl TestPeer {
    /// Start a session on `manager` and return the peer driving it.
    pub fn connect(
        manager: Arc<RoomManager>,
        config: &SessionConfig,
        parent_token: &CancellationToken,
    ) -> (Self, SessionHandle) {
        let (to_server, server_stream) = mpsc::unbounded();
        let (server_sink, from_server) = mpsc::unbounded();

        let handle = start_session(server_sink, server_stream, manager, config, parent_token);

        let peer = Self {
            to_server: Some(to_server),
            from_server,
            client_id: None,
        };
        (peer, handle)
    }

    /// The id the relay assigned, read from the first frame on first call.
    pub async fn client_id(&mut self) -> String {
        if let Some(id) = &self.client_id {
            return id.clone();
        }
        let payload = self.expect_message("notify-client-id").await;
        let id = payload["client_id"]
            .as_str()
            .expect("notify-client-id carries a string client_id")
            .to_string();
        self.client_id = Some(id.clone());
        id
    }

    pub fn send_frame(&self, frame: Frame) {
        let sender = self.to_server.as_ref().expect("peer already hung up");
        // The session may already be gone; tests observe that elsewhere
        let _ = sender.unbounded_send(Ok(frame));
    }

    pub fn send_json(&self, value: Value) {
        self.send_frame(Frame::Text(value.to_string()));
    }

    pub fn send_text(&self, text: &str) {
        self.send_frame(Frame::Text(text.to_string()));
    }

    pub fn send_binary(&self, bytes: &[u8]) {
        self.send_frame(Frame::Binary(bytes.to_vec()));
    }

    /// Make the session's next read fail.
    pub fn fail_read(&self, reason: &str) {
        let sender = self.to_server.as_ref().expect("peer already hung up");
        let _ = sender.unbounded_send(Err(TestTransportError(reason.to_string())));
    }

    /// Send a close frame.
    pub fn close(&self) {
        self.send_frame(Frame::Close);
    }

    /// Drop the write side without a close frame; the session sees end of stream.
    pub fn hang_up(&mut self) {
        self.to_server = None;
    }

    /// Next frame written by the session, or `None` once it closed the transport.
    ///
    /// # Panics
    ///
    /// Panics if nothing arrives within [`RECV_TIMEOUT`].
    pub async fn next_frame(&mut self) -> Option<Frame> {
        tokio::time::timeout(RECV_TIMEOUT, self.from_server.next())
            .await
            .expect("timed out waiting for a frame from the relay")
    }

    /// Next JSON message, skipping keepalives.
    ///
    /// # Panics
    ///
    /// Panics on timeout, on a closed transport, or on a non-JSON frame.
    pub async fn next_message(&mut self) -> Value {
        loop {
            match self.next_frame().await {
                Some(Frame::Keepalive) => continue,
                Some(Frame::Text(text)) => {
                    return serde_json::from_str(&text).expect("relay wrote invalid JSON");
                }
                Some(Frame::Binary(bytes)) => {
                    return serde_json::from_slice(&bytes).expect("relay wrote invalid JSON");
                }
                Some(Frame::Close) | None => panic!("relay closed the transport"),
            }
        }
    }

    /// Next message must be of `kind`; returns its payload.
    pub async fn expect_message(&mut self, kind: &str) -> Value {
        let message = self.next_message().await;
        assert_eq!(
            message["type"], kind,
            "expected a {kind} message, got {message}"
        );
        message["payload"].clone()
    }

    /// Assert no message (keepalives aside) arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, self.from_server.next()).await {
                Err(_) => return,
                Ok(Some(Frame::Keepalive)) => continue,
                Ok(other) => panic!("expected silence, got {other:?}"),
            }
        }
    }

    /// Wait for the session to close the transport, skipping anything still queued.
    pub async fn expect_closed(&mut self) {
        loop {
            match self.next_frame().await {
                None | Some(Frame::Close) => return,
                Some(_) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_service::registry::RoomRegistry;

    #[tokio::test]
    async fn test_peer_reads_client_id_once() {
        let manager = Arc::new(RoomManager::new(Arc::new(RoomRegistry::new())));
        let token = CancellationToken::new();
        let (mut peer, handle) = TestPeer::connect(manager, &SessionConfig::default(), &token);

        let id = peer.client_id().await;
        assert_eq!(id, handle.client_id().as_str());
        assert_eq!(peer.client_id().await, id);

        peer.close();
        peer.expect_closed().await;
        handle.join().await;
    }
}
