//! Client-facing wire messages.
//!
//! Every frame is `{"type": <kind>, "payload": <object>}`. Outbound messages
//! are a closed enum; inbound frames are decoded in two steps so that an
//! unparseable frame (logged, ignored) is distinguished from a recognized
//! kind with a bad payload (answered with `error`).

use crate::errors::SignalingError;
use crate::registry::ClientId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message delivered to a client through its mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Always the first message on a connection.
    NotifyClientId { client_id: ClientId },

    NewClient { client_id: ClientId },

    LeaveClient { client_id: ClientId },

    /// `client_id` is the sender of the offer.
    Offer { client_id: ClientId, sdp: String },

    Answer { client_id: ClientId, sdp: String },

    IceCandidate {
        client_id: ClientId,
        candidate: String,
        #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
        sdp_mid: Option<String>,
        #[serde(
            rename = "sdpMLineIndex",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        sdp_mline_index: Option<u16>,
    },

    Error { error: String },
}

impl ServerMessage {
    /// Error reply for a recognized kind whose payload failed to decode.
    #[must_use]
    pub fn invalid_payload() -> Self {
        ServerMessage::Error {
            error: SignalingError::InvalidPayload(String::new()).client_message(),
        }
    }

    /// Wire name of this message's kind. Safe to log.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::NotifyClientId { .. } => "notify-client-id",
            ServerMessage::NewClient { .. } => "new-client",
            ServerMessage::LeaveClient { .. } => "leave-client",
            ServerMessage::Offer { .. } => "offer",
            ServerMessage::Answer { .. } => "answer",
            ServerMessage::IceCandidate { .. } => "ice-candidate",
            ServerMessage::Error { .. } => "error",
        }
    }

    /// Serialize to the text frame written to the transport.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if serialization fails.
    pub fn to_json(&self) -> Result<String, SignalingError> {
        serde_json::to_string(self)
            .map_err(|e| SignalingError::Internal(format!("failed to encode message: {e}")))
    }

    /// Split into `(kind, payload)`, the shape carried by relay envelopes.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if serialization fails.
    pub fn into_payload(self) -> Result<Value, SignalingError> {
        let mut value = serde_json::to_value(&self)
            .map_err(|e| SignalingError::Internal(format!("failed to encode message: {e}")))?;
        Ok(value.get_mut("payload").map(Value::take).unwrap_or(Value::Null))
    }

    /// Rebuild a message from a wire kind and its payload.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPayload` if the payload does not match the kind.
    pub fn from_parts(kind: &str, payload: Value) -> Result<Self, SignalingError> {
        let frame = serde_json::json!({ "type": kind, "payload": payload });
        Ok(serde_json::from_value(frame)?)
    }
}

/// Opaque negotiation data routed from one client to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    IceCandidate {
        candidate: String,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    },
}

impl Signal {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Offer { .. } => "offer",
            Signal::Answer { .. } => "answer",
            Signal::IceCandidate { .. } => "ice-candidate",
        }
    }

    /// Build the message the target receives, stamped with the sender's id.
    #[must_use]
    pub fn into_message(self, sender: ClientId) -> ServerMessage {
        match self {
            Signal::Offer { sdp } => ServerMessage::Offer {
                client_id: sender,
                sdp,
            },
            Signal::Answer { sdp } => ServerMessage::Answer {
                client_id: sender,
                sdp,
            },
            Signal::IceCandidate {
                candidate,
                sdp_mid,
                sdp_mline_index,
            } => ServerMessage::IceCandidate {
                client_id: sender,
                candidate,
                sdp_mid,
                sdp_mline_index,
            },
        }
    }
}

/// A decoded inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    Join { room_id: String },
    Signal { target: ClientId, signal: Signal },
    /// Kind this server does not handle. Logged and ignored.
    Unsupported { kind: String },
}

/// First-stage decode of an inbound frame: the kind plus its raw payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Deserialize)]
struct JoinPayload {
    room_id: String,
}

#[derive(Deserialize)]
struct SdpPayload {
    sdp: String,
    client_id: ClientId,
}

#[derive(Deserialize)]
struct IceCandidatePayload {
    candidate: String,
    #[serde(rename = "sdpMid", default)]
    sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    sdp_mline_index: Option<u16>,
    client_id: ClientId,
}

impl InboundFrame {
    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// Returns the serde error when the frame is not `{type, payload}` JSON.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Parse a binary frame carrying the same JSON.
    ///
    /// # Errors
    ///
    /// Returns the serde error when the frame is not `{type, payload}` JSON.
    pub fn parse_bytes(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    /// Decode the kind-specific payload.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPayload` when a recognized kind carries a payload of
    /// the wrong shape.
    pub fn into_request(self) -> Result<ClientRequest, SignalingError> {
        let request = match self.kind.as_str() {
            "join" => {
                let JoinPayload { room_id } = serde_json::from_value(self.payload)?;
                ClientRequest::Join { room_id }
            }
            "offer" => {
                let SdpPayload { sdp, client_id } = serde_json::from_value(self.payload)?;
                ClientRequest::Signal {
                    target: client_id,
                    signal: Signal::Offer { sdp },
                }
            }
            "answer" => {
                let SdpPayload { sdp, client_id } = serde_json::from_value(self.payload)?;
                ClientRequest::Signal {
                    target: client_id,
                    signal: Signal::Answer { sdp },
                }
            }
            "ice-candidate" => {
                let payload: IceCandidatePayload = serde_json::from_value(self.payload)?;
                ClientRequest::Signal {
                    target: payload.client_id,
                    signal: Signal::IceCandidate {
                        candidate: payload.candidate,
                        sdp_mid: payload.sdp_mid,
                        sdp_mline_index: payload.sdp_mline_index,
                    },
                }
            }
            _ => ClientRequest::Unsupported { kind: self.kind },
        };
        Ok(request)
    }
}
