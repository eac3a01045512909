//! Signaling HTTP routes.
//!
//! `GET /connect` and `GET /ws` are equivalent WebSocket upgrade endpoints.
//! Each upgraded socket becomes one connection session.

use crate::manager::RoomManager;
use crate::observability::{health_router, HealthState};
use crate::session::{split_websocket, start_session, SessionConfig};
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared state for the signaling routes.
#[derive(Clone)]
pub struct SignalingState {
    pub manager: Arc<RoomManager>,
    pub session_config: Arc<SessionConfig>,
    /// Parent of every session token; cancelled on process shutdown.
    pub shutdown_token: CancellationToken,
}

pub fn signaling_router(state: SignalingState) -> Router {
    Router::new()
        .route("/connect", get(ws_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SignalingState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SignalingState) {
    let (sink, stream) = split_websocket(socket);
    let handle = start_session(
        sink,
        stream,
        Arc::clone(&state.manager),
        &state.session_config,
        &state.shutdown_token,
    );
    handle.join().await;
}

/// Signaling routes plus `/health` and `/ready`.
pub fn app_router(state: SignalingState, health_state: Arc<HealthState>) -> Router {
    signaling_router(state).merge(health_router(health_state))
}
