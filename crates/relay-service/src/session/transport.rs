//! Frame-level view of a client transport.
//!
//! Sessions are written against any `Sink<Frame>` / `Stream<Result<Frame, E>>`
//! pair. `split_websocket` adapts an axum WebSocket to that shape; tests use
//! in-memory channels.

use axum::extract::ws::{Message, WebSocket};
use futures::{future, Sink, SinkExt, Stream, StreamExt};

/// Keepalive text frame written on every tick.
pub const KEEPALIVE_PAYLOAD: &str = r#"{"type":"ping"}"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// Out-of-band liveness frame; not part of the message union.
    Keepalive,
    /// Peer closed the connection (inbound) or we are closing it (outbound).
    Close,
}

impl Frame {
    /// Map to a WebSocket message for writing.
    #[must_use]
    pub fn into_ws(self) -> Message {
        match self {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(bytes) => Message::Binary(bytes),
            Frame::Keepalive => Message::Text(KEEPALIVE_PAYLOAD.to_string()),
            Frame::Close => Message::Close(None),
        }
    }

    /// Map a received WebSocket message. Protocol-level ping/pong is handled
    /// by the WebSocket layer and yields `None`.
    #[must_use]
    pub fn from_ws(message: Message) -> Option<Frame> {
        match message {
            Message::Text(text) => Some(Frame::Text(text)),
            Message::Binary(bytes) => Some(Frame::Binary(bytes)),
            Message::Close(_) => Some(Frame::Close),
            Message::Ping(_) | Message::Pong(_) => None,
        }
    }
}

/// Split an upgraded WebSocket into a frame sink and a frame stream.
pub fn split_websocket(
    socket: WebSocket,
) -> (
    impl Sink<Frame, Error = axum::Error> + Send + Unpin + 'static,
    impl Stream<Item = Result<Frame, axum::Error>> + Send + Unpin + 'static,
) {
    let (sink, stream) = socket.split();

    let sink = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(frame.into_ws())));
    let stream = stream.filter_map(|result| {
        future::ready(match result {
            Ok(message) => Frame::from_ws(message).map(Ok),
            Err(e) => Some(Err(e)),
        })
    });

    (sink, stream)
}
