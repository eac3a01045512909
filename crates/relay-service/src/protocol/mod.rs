//! Wire formats: client-facing messages and cross-instance relay envelopes.

pub mod envelope;
pub mod messages;

pub use envelope::{RelayEnvelope, RelayKind};
pub use messages::{ClientRequest, InboundFrame, ServerMessage, Signal};
