//! Per-client outbound mailbox.
//!
//! A bounded `mpsc` channel written with `try_send` only. Writers never wait:
//! when the mailbox is full the newest message is dropped and counted.

use crate::errors::SignalingError;
use crate::observability::metrics;
use crate::protocol::ServerMessage;
use crate::registry::ClientId;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Receiving half, owned by the connection's outbound loop.
pub type MailboxReceiver = mpsc::Receiver<ServerMessage>;

/// Sending half. Cheap to clone; every room snapshot holds one per member.
#[derive(Debug, Clone)]
pub struct Mailbox {
    client_id: ClientId,
    sender: mpsc::Sender<ServerMessage>,
}

/// Create a mailbox for `client_id`. A capacity of zero is raised to one.
#[must_use]
pub fn mailbox(client_id: ClientId, capacity: usize) -> (Mailbox, MailboxReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (Mailbox { client_id, sender }, receiver)
}

impl Mailbox {
    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Enqueue without waiting.
    ///
    /// # Errors
    ///
    /// - `MailboxFull` if the mailbox is at capacity (message dropped)
    /// - `MailboxClosed` if the owning session has ended
    pub fn deliver(&self, message: ServerMessage) -> Result<(), SignalingError> {
        let kind = message.kind();
        match self.sender.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    target: "relay.mailbox",
                    client_id = %self.client_id,
                    kind,
                    "Mailbox full, dropping message"
                );
                metrics::record_message_dropped("mailbox_full");
                Err(SignalingError::MailboxFull(self.client_id.to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(
                    target: "relay.mailbox",
                    client_id = %self.client_id,
                    kind,
                    "Mailbox closed, dropping message"
                );
                metrics::record_message_dropped("mailbox_closed");
                Err(SignalingError::MailboxClosed(self.client_id.to_string()))
            }
        }
    }
}
