//! Connection session: one per connected client.
//!
//! Each session runs two tasks over one transport and one mailbox:
//!
//! - **outbound**: mailbox messages and keepalive ticks, written to the sink
//! - **inbound**: frames read from the stream, decoded and dispatched to the
//!   `RoomManager`
//!
//! # Lifecycle
//!
//! 1. A fresh `ClientId` is assigned and `notify-client-id` is enqueued before
//!    either task starts, so it is always the first message written
//! 2. Both tasks run until the transport fails, the peer closes, or the
//!    session's token (a child of the process shutdown token) is cancelled
//! 3. Either task may close the session by cancelling its token. Teardown
//!    (leave the room, log) runs once, from the inbound task, after any
//!    dispatch in flight has finished

pub mod transport;

pub use transport::{split_websocket, Frame, KEEPALIVE_PAYLOAD};

use crate::config::Config;
use crate::errors::SignalingError;
use crate::mailbox::MailboxReceiver;
use crate::manager::RoomManager;
use crate::observability::metrics;
use crate::protocol::{ClientRequest, InboundFrame, ServerMessage};
use crate::registry::{Client, ClientId};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Display name given to every client.
pub const DEFAULT_CLIENT_NAME: &str = "user";

/// Sessions currently open in this process; feeds `relay_connections_active`.
static ACTIVE_SESSIONS: AtomicU64 = AtomicU64::new(0);

/// Per-session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub mailbox_capacity: usize,
    pub keepalive_interval: Duration,
    pub client_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: crate::config::DEFAULT_MAILBOX_CAPACITY,
            keepalive_interval: Duration::from_secs(
                crate::config::DEFAULT_KEEPALIVE_INTERVAL_SECONDS,
            ),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            mailbox_capacity: config.mailbox_capacity,
            keepalive_interval: config.keepalive_interval(),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
        }
    }
}

/// Handle to a running session.
#[derive(Debug)]
pub struct SessionHandle {
    client_id: ClientId,
    cancel_token: CancellationToken,
    outbound: JoinHandle<()>,
    inbound: JoinHandle<()>,
}

impl SessionHandle {
    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Cancel the session. Teardown still runs once.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Wait for both tasks to finish.
    pub async fn join(self) {
        let _ = self.outbound.await;
        let _ = self.inbound.await;
    }
}

/// State shared by the two tasks of one session.
struct Session {
    client: Client,
    manager: Arc<RoomManager>,
    cancel_token: CancellationToken,
    /// First reason given for closing; later ones are ignored.
    close_reason: OnceLock<&'static str>,
}

impl Session {
    fn spawn<Si, St, E>(
        sink: Si,
        stream: St,
        manager: Arc<RoomManager>,
        config: &SessionConfig,
        parent_token: &CancellationToken,
    ) -> SessionHandle
    where
        Si: Sink<Frame> + Send + Unpin + 'static,
        Si::Error: Display + Send,
        St: Stream<Item = Result<Frame, E>> + Send + Unpin + 'static,
        E: Display + Send + 'static,
    {
        let (client, mailbox_rx) = Client::new(config.client_name.clone(), config.mailbox_capacity);
        let client_id = client.id.clone();

        // Fresh mailbox with capacity >= 1, so this cannot be rejected
        if let Err(e) = client.mailbox.deliver(ServerMessage::NotifyClientId {
            client_id: client_id.clone(),
        }) {
            warn!(target: "relay.session", client_id = %client_id, error = %e, "Failed to enqueue client id");
        }

        let cancel_token = parent_token.child_token();
        let session = Arc::new(Session {
            client,
            manager,
            cancel_token: cancel_token.clone(),
            close_reason: OnceLock::new(),
        });

        let active = ACTIVE_SESSIONS.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        metrics::set_connections_active(active);
        info!(target: "relay.session", client_id = %client_id, "Client connected");

        let outbound = tokio::spawn(run_outbound(
            Arc::clone(&session),
            sink,
            mailbox_rx,
            config.keepalive_interval,
        ));
        let inbound = tokio::spawn(run_inbound(session, stream));

        SessionHandle {
            client_id,
            cancel_token,
            outbound,
            inbound,
        }
    }

    /// Record why the session ends and stop both tasks.
    fn close(&self, reason: &'static str) {
        let _ = self.close_reason.set(reason);
        self.cancel_token.cancel();
    }

    /// Leave the room and release the session. Called only by the inbound
    /// task on its way out, so no dispatch (a join in particular) can land
    /// after it.
    async fn teardown(&self) {
        self.close("cancelled");
        let reason = self.close_reason.get().copied().unwrap_or("cancelled");

        match self.manager.leave_room(&self.client.id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(target: "relay.session", client_id = %self.client.id, "Client was in no room");
            }
            Err(e) => {
                warn!(target: "relay.session", client_id = %self.client.id, error = %e, "Failed to leave room on disconnect");
            }
        }

        let active = ACTIVE_SESSIONS
            .fetch_sub(1, Ordering::SeqCst)
            .saturating_sub(1);
        metrics::set_connections_active(active);

        info!(
            target: "relay.session",
            client_id = %self.client.id,
            reason,
            "Client disconnected"
        );
    }

    /// Decode and dispatch one inbound data frame.
    async fn handle_frame(&self, frame: Frame) {
        let parsed = match frame {
            Frame::Text(text) => InboundFrame::parse(&text),
            Frame::Binary(bytes) => InboundFrame::parse_bytes(&bytes),
            Frame::Keepalive | Frame::Close => return,
        };

        let inbound = match parsed {
            Ok(inbound) => inbound,
            Err(e) => {
                debug!(target: "relay.session", client_id = %self.client.id, error = %e, "Undecodable frame, ignoring");
                return;
            }
        };

        if let Err(e) = self.dispatch(inbound).await {
            if e.is_client_visible() {
                debug!(target: "relay.session", client_id = %self.client.id, error = %e, "Rejecting message");
                // Same mailbox as every other outbound message; failures are logged there
                let _ = self.client.mailbox.deliver(ServerMessage::invalid_payload());
            } else {
                warn!(target: "relay.session", client_id = %self.client.id, error = %e, "Failed to handle message");
            }
        }
    }

    #[instrument(skip_all, fields(client_id = %self.client.id, kind = %inbound.kind))]
    async fn dispatch(&self, inbound: InboundFrame) -> Result<(), SignalingError> {
        match inbound.into_request()? {
            ClientRequest::Join { room_id } => {
                self.manager.join_room(&self.client, &room_id).await?;
            }
            ClientRequest::Signal { target, signal } => {
                let outcome = self
                    .manager
                    .route_to_target(&self.client.id, &target, signal)
                    .await?;
                debug!(target: "relay.session", outcome = outcome.as_str(), "Signal routed");
            }
            ClientRequest::Unsupported { kind } => {
                debug!(target: "relay.session", kind = %kind, "Unknown message kind, ignoring");
            }
        }
        Ok(())
    }
}

/// Outbound task: mailbox and keepalive to the sink.
async fn run_outbound<Si>(
    session: Arc<Session>,
    mut sink: Si,
    mut mailbox: MailboxReceiver,
    keepalive_interval: Duration,
) where
    Si: Sink<Frame> + Send + Unpin,
    Si::Error: Display + Send,
{
    let mut keepalive = interval_at(Instant::now() + keepalive_interval, keepalive_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let frame = tokio::select! {
            biased;

            () = session.cancel_token.cancelled() => break,

            message = mailbox.recv() => {
                // The session holds a sender, so the mailbox never closes first
                let Some(message) = message else { break };
                match message.to_json() {
                    Ok(text) => Frame::Text(text),
                    Err(e) => {
                        warn!(target: "relay.session", client_id = %session.client.id, error = %e, "Dropping unencodable message");
                        continue;
                    }
                }
            }

            _ = keepalive.tick() => Frame::Keepalive,
        };

        if let Err(e) = sink.send(frame).await {
            let error = SignalingError::Transport(format!("write: {e}"));
            debug!(target: "relay.session", client_id = %session.client.id, error = %error, "Write failed");
            session.close("write_failed");
            break;
        }
    }

    if let Err(e) = sink.close().await {
        debug!(target: "relay.session", client_id = %session.client.id, error = %e, "Transport close failed");
    }
}

/// Inbound task: frames from the stream to the manager.
async fn run_inbound<St, E>(session: Arc<Session>, mut stream: St)
where
    St: Stream<Item = Result<Frame, E>> + Send + Unpin,
    E: Display + Send,
{
    loop {
        let next = tokio::select! {
            biased;

            () = session.cancel_token.cancelled() => break,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Frame::Close)) | None => {
                session.close("closed");
                break;
            }
            Some(Err(e)) => {
                let error = SignalingError::Transport(format!("read: {e}"));
                debug!(target: "relay.session", client_id = %session.client.id, error = %error, "Read failed");
                session.close("read_failed");
                break;
            }
            Some(Ok(frame)) => session.handle_frame(frame).await,
        }
    }

    session.teardown().await;
}

/// Start a session over `sink`/`stream` and return its handle.
///
/// Must be called from within a tokio runtime.
pub fn start_session<Si, St, E>(
    sink: Si,
    stream: St,
    manager: Arc<RoomManager>,
    config: &SessionConfig,
    parent_token: &CancellationToken,
) -> SessionHandle
where
    Si: Sink<Frame> + Send + Unpin + 'static,
    Si::Error: Display + Send,
    St: Stream<Item = Result<Frame, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
{
    Session::spawn(sink, stream, manager, config, parent_token)
}
