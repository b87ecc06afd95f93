//! HTTP and WebSocket handlers for the gateway

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        OriginalUri, State,
    },
    http::{header, HeaderMap},
    response::{IntoResponse, Json, Response},
};
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use crate::auth::{verify_with_timeout, HandshakeRequest, TokenVerifier};
use crate::connection::{Connection, Frame, IdentityId};
use crate::error::Error;
use crate::event::{ack_frame, ClientMessage, ClientRequest};
use crate::manager::ConnectionManager;

/// Close codes (4000-range for application-level)
pub const CLOSE_TOKEN_EXPIRED: u16 = 4001;
pub const CLOSE_TOKEN_INVALID: u16 = 4002;
pub const CLOSE_VERIFIER_TIMEOUT: u16 = 4008;
pub const CLOSE_PONG_TIMEOUT: u16 = 4009;
const CLOSE_NORMAL: u16 = 1000;

/// How long the writer may take to flush a final close frame
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-connection timing
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    /// Upper bound on token verification
    pub handshake_timeout: Duration,
    /// Interval between server pings
    pub heartbeat_interval: Duration,
    /// How long a ping may go unanswered before the connection is closed
    pub pong_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

/// Shared state for handlers
#[derive(Clone)]
pub struct GatewayState {
    pub connection_manager: ConnectionManager,
    pub verifier: Arc<dyn TokenVerifier>,
    pub settings: ConnectionSettings,
}

fn close_reason(err: &Error) -> (u16, &'static str) {
    match err {
        Error::TokenExpired => (CLOSE_TOKEN_EXPIRED, "Token expired"),
        Error::VerifierTimeout => (CLOSE_VERIFIER_TIMEOUT, "Authentication timed out"),
        _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
    }
}

/// WebSocket connection endpoint
///
/// Authenticates before anything is registered. A rejected handshake is
/// upgraded and immediately closed with a 4000-range code.
pub async fn ws_connect(
    State(state): State<GatewayState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let client_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string());

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let request = HandshakeRequest {
        uri,
        headers,
        client_ip: client_ip.clone(),
    };

    let verified = verify_with_timeout(
        state.verifier.as_ref(),
        request.token(),
        state.settings.handshake_timeout,
    )
    .await;

    match verified {
        Ok(identity_id) => {
            tracing::debug!(
                identity_id = %identity_id,
                client_ip = ?client_ip,
                verifier = state.verifier.name(),
                "WebSocket handshake authenticated"
            );
            ws.on_upgrade(move |socket| run_connection(socket, state, identity_id, client_ip, user_agent))
        }
        Err(err) => {
            let (code, reason) = close_reason(&err);
            tracing::warn!(
                client_ip = ?client_ip,
                error = %err,
                close_code = code,
                "WebSocket connection denied"
            );
            ws.on_upgrade(move |mut socket| async move {
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
            })
        }
    }
}

/// Per-connection task: registers, pumps frames both ways, tears down on exit.
async fn run_connection(
    socket: WebSocket,
    state: GatewayState,
    identity_id: IdentityId,
    client_ip: Option<String>,
    user_agent: Option<String>,
) {
    let manager = state.connection_manager.clone();
    let (connection, receiver) = match manager.attach(identity_id, client_ip, user_agent) {
        Ok(attached) => attached,
        Err(e) => {
            tracing::error!(error = %e, "Failed to register connection");
            return;
        }
    };

    let (ws_tx, mut ws_rx) = socket.split();
    let (control_tx, control_rx) = mpsc::unbounded_channel::<Message>();
    let mut writer = tokio::spawn(writer_task(ws_tx, receiver, control_rx));

    let settings = state.settings;
    let mut ping_timer = time::interval(settings.heartbeat_interval);
    ping_timer.tick().await;
    let mut pong_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    handle_client_text(&manager, &connection, text.as_str());
                }
                Some(Ok(Message::Pong(_))) => pong_deadline = None,
                Some(Ok(Message::Ping(data))) => {
                    let _ = control_tx.send(Message::Pong(data));
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(connection_id = %connection.id, reason = ?frame, "Client initiated close");
                    break;
                }
                Some(Ok(Message::Binary(_))) => {
                    tracing::debug!(connection_id = %connection.id, "Ignoring binary frame");
                }
                Some(Err(e)) => {
                    tracing::debug!(connection_id = %connection.id, error = %e, "WebSocket receive error");
                    break;
                }
                None => break,
            },

            _ = ping_timer.tick() => {
                if pong_deadline.is_none() {
                    let _ = control_tx.send(Message::Ping(Default::default()));
                    pong_deadline = Some(Instant::now() + settings.pong_timeout);
                }
            }

            _ = wait_until(pong_deadline) => {
                tracing::warn!(connection_id = %connection.id, "Pong timeout, closing connection");
                let _ = control_tx.send(close_message(CLOSE_PONG_TIMEOUT, "Pong timeout"));
                break;
            }

            _ = connection.terminated() => {
                let _ = control_tx.send(close_message(CLOSE_NORMAL, "Server closed connection"));
                break;
            }
        }
    }

    manager.close(&connection.id);
    drop(connection);
    drop(control_tx);

    if time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
}

/// Forwards queued frames and control messages to the socket.
///
/// Stops after sending a close frame, when the control channel closes, or on
/// the first write error.
async fn writer_task(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<Frame>,
    mut control: mpsc::UnboundedReceiver<Message>,
) {
    loop {
        let msg = tokio::select! {
            biased;
            ctrl = control.recv() => match ctrl {
                Some(msg) => msg,
                None => break,
            },
            frame = frames.recv() => match frame {
                Some(frame) => Message::Text(frame.to_string().into()),
                None => break,
            },
        };

        let is_close = matches!(msg, Message::Close(_));
        if ws_tx.send(msg).await.is_err() || is_close {
            break;
        }
    }
    let _ = ws_tx.close().await;
}

fn handle_client_text(manager: &ConnectionManager, connection: &Connection, text: &str) {
    let Some(message) = ClientMessage::parse(text) else {
        tracing::debug!(connection_id = %connection.id, "Ignoring malformed client frame");
        return;
    };

    let Some(request) = message.request() else {
        tracing::debug!(
            connection_id = %connection.id,
            event = %message.event,
            "Ignoring unknown or incomplete request"
        );
        return;
    };

    let accepted = match &request {
        ClientRequest::Join(topic_id) => manager.join(&connection.id, topic_id),
        ClientRequest::Leave(topic_id) => manager.leave(&connection.id, topic_id),
    };

    if accepted {
        if let Err(failure) = connection.push(ack_frame(message.ack)) {
            tracing::debug!(connection_id = %connection.id, ?failure, "Acknowledgement not delivered");
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn close_message(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

// Stats endpoint
#[derive(Serialize)]
pub struct StatsResponse {
    pub instance_id: String,
    pub total_connections: usize,
    pub total_identities: usize,
    pub total_topics: usize,
    pub connections: Vec<ConnectionStats>,
}

#[derive(Serialize)]
pub struct ConnectionStats {
    pub id: String,
    pub identity_id: String,
    pub connected_at: String,
    pub client_ip: Option<String>,
    pub topic_count: usize,
    pub is_active: bool,
}

pub async fn get_stats(State(state): State<GatewayState>) -> impl IntoResponse {
    let manager = &state.connection_manager;
    let connections: Vec<ConnectionStats> = manager
        .list_connections()
        .into_iter()
        .map(|c| ConnectionStats {
            topic_count: manager.topics_of(&c.id).len(),
            is_active: c.is_active(),
            id: c.id,
            identity_id: c.identity_id,
            connected_at: c.metadata.connected_at.to_rfc3339(),
            client_ip: c.metadata.client_ip,
        })
        .collect();

    Json(StatsResponse {
        instance_id: manager.instance_id().to_string(),
        total_connections: connections.len(),
        total_identities: manager.identity_count(),
        total_topics: manager.topic_count(),
        connections,
    })
}
