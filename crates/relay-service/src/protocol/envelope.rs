//! Cross-instance relay envelopes.
//!
//! Envelopes travel over the bus only and never reach a client as-is. Their
//! `type` namespace (`offer`, `answer`, `ice`, `new_client`, `leave_client`)
//! is separate from the client-facing kinds, and each type is published on
//! the channel of the same name.

use crate::errors::SignalingError;
use crate::protocol::messages::ServerMessage;
use crate::registry::ClientId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Relayable message kind; doubles as the bus channel name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayKind {
    Offer,
    Answer,
    Ice,
    NewClient,
    LeaveClient,
}

impl RelayKind {
    /// Every relay kind, in subscription order.
    pub const ALL: [RelayKind; 5] = [
        RelayKind::Offer,
        RelayKind::Answer,
        RelayKind::Ice,
        RelayKind::NewClient,
        RelayKind::LeaveClient,
    ];

    /// Bus channel name for this kind.
    #[must_use]
    pub fn channel(self) -> &'static str {
        match self {
            RelayKind::Offer => "offer",
            RelayKind::Answer => "answer",
            RelayKind::Ice => "ice",
            RelayKind::NewClient => "new_client",
            RelayKind::LeaveClient => "leave_client",
        }
    }

    #[must_use]
    pub fn from_channel(channel: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.channel() == channel)
    }

    /// Client-facing kind the envelope turns into on delivery.
    #[must_use]
    pub fn message_kind(self) -> &'static str {
        match self {
            RelayKind::Offer => "offer",
            RelayKind::Answer => "answer",
            RelayKind::Ice => "ice-candidate",
            RelayKind::NewClient => "new-client",
            RelayKind::LeaveClient => "leave-client",
        }
    }
}

/// Message relayed to whichever instance hosts `target_client_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    #[serde(rename = "type")]
    pub kind: RelayKind,
    pub sender_client_id: ClientId,
    pub target_client_id: ClientId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    /// Client-facing payload, forwarded untouched.
    pub payload: Value,
}

impl RelayEnvelope {
    /// Wrap an outbound message for a remote target.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the message is not relayable or cannot be encoded.
    pub fn wrap(
        sender: ClientId,
        target: ClientId,
        room_id: Option<String>,
        message: ServerMessage,
    ) -> Result<Self, SignalingError> {
        let kind = match &message {
            ServerMessage::Offer { .. } => RelayKind::Offer,
            ServerMessage::Answer { .. } => RelayKind::Answer,
            ServerMessage::IceCandidate { .. } => RelayKind::Ice,
            ServerMessage::NewClient { .. } => RelayKind::NewClient,
            ServerMessage::LeaveClient { .. } => RelayKind::LeaveClient,
            ServerMessage::NotifyClientId { .. } | ServerMessage::Error { .. } => {
                return Err(SignalingError::Internal(format!(
                    "{} is not relayable",
                    message.kind()
                )));
            }
        };

        Ok(Self {
            kind,
            sender_client_id: sender,
            target_client_id: target,
            room_id,
            payload: message.into_payload()?,
        })
    }

    /// # Errors
    ///
    /// Returns `Internal` if encoding fails.
    pub fn to_json(&self) -> Result<String, SignalingError> {
        serde_json::to_string(self)
            .map_err(|e| SignalingError::Internal(format!("failed to encode envelope: {e}")))
    }

    /// # Errors
    ///
    /// Returns `InvalidPayload` for anything that is not an envelope.
    pub fn from_json(raw: &str) -> Result<Self, SignalingError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Rebuild the client-facing message carried by this envelope.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPayload` if the payload does not fit the kind.
    pub fn into_message(self) -> Result<ServerMessage, SignalingError> {
        ServerMessage::from_parts(self.kind.message_kind(), self.payload)
    }
}
