//! Signal Relay error types.
//!
//! Only `InvalidPayload` is ever answered to a client (as an `error` message).
//! Every other failure is logged server-side and stays invisible to clients.

use thiserror::Error;

/// Signal Relay error type.
///
/// Taxonomy:
/// - `RoomNotFound` / `ClientNotFound`: ordinary control flow (create-vs-update, drop decisions)
/// - `InvalidPayload`: malformed payload for a recognized inbound kind, client-visible
/// - `Transport`: read/write failure on a connection, triggers session teardown
/// - `MailboxFull` / `MailboxClosed`: delivery failure, message dropped
/// - `Bus`: publish/subscribe failure, degrades cross-instance reachability only
/// - `Internal`: unexpected failures (encoding, exhausted retries)
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Room is not present in the registry.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Client is not a member of any local room.
    #[error("Client not found: {0}")]
    ClientNotFound(String),

    /// Payload of a recognized message kind could not be decoded.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Transport read/write failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Target mailbox is at capacity; the message was dropped.
    #[error("Mailbox full: {0}")]
    MailboxFull(String),

    /// Target mailbox was closed (session already gone).
    #[error("Mailbox closed: {0}")]
    MailboxClosed(String),

    /// Pub/sub bus operation failed.
    #[error("Bus error: {0}")]
    Bus(String),

    /// Internal error with context.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SignalingError {
    /// Whether this error is a lookup miss rather than a failure.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SignalingError::RoomNotFound(_) | SignalingError::ClientNotFound(_)
        )
    }

    /// Whether this error must be reported back to the originating client.
    #[must_use]
    pub fn is_client_visible(&self) -> bool {
        matches!(self, SignalingError::InvalidPayload(_))
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SignalingError::InvalidPayload(_) => "invalid payload".to_string(),
            SignalingError::RoomNotFound(_) => "room not found".to_string(),
            SignalingError::ClientNotFound(_) => "client not found".to_string(),
            SignalingError::Transport(_)
            | SignalingError::MailboxFull(_)
            | SignalingError::MailboxClosed(_)
            | SignalingError::Bus(_)
            | SignalingError::Internal(_) => "an internal error occurred".to_string(),
        }
    }
}

impl From<serde_json::Error> for SignalingError {
    fn from(err: serde_json::Error) -> Self {
        SignalingError::InvalidPayload(err.to_string())
    }
}
