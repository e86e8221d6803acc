//! Live channel: bidirectional WebSocket at `GET /ws/chat`.
//!
//! Handles upgrade, heartbeat, peer binding, sends, typing indicators and
//! per-connection rate limiting (10 incoming frames/sec).
//!
//! Connection lifecycle:
//! 1. Client calls `POST /api/chat/ws-ticket` to get a one-time ticket
//! 2. Client opens `GET /ws/chat?ticket=xxx`, ticket validated, WS upgraded
//! 3. Channel registers under the caller's identity, server sends Welcome
//! 4. Optional `Bind` narrows the channel to one peer
//! 5. Heartbeat every interval, 3 missed = disconnect
//! 6. Any exit drops the registration

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::api::error::ApiError;
use crate::api::middleware::rate::{check_rate, user_key};
use crate::api::types::ApiContext;
use crate::chat::ChatError;
use crate::core_state::CoreState;
use crate::models::{Direction, Message};
use crate::registry::{ChannelEvent, ChannelKind, ChannelScope, Registration};

/// Disconnect after this many missed heartbeats.
const MAX_MISSED_HEARTBEATS: u32 = 3;

/// Maximum incoming frames per second per connection.
const MAX_INCOMING_PER_SECOND: u32 = 10;

/// Outgoing frames buffered for the socket writer.
const OUTGOING_BUFFER: usize = 64;

/// Query parameters for WebSocket upgrade.
#[derive(Deserialize)]
pub struct WsAuthQuery {
    #[serde(default)]
    ticket: String,
}

// ═══════════════════════════════════════════════════════════
// Frames
// ═══════════════════════════════════════════════════════════

/// Client → server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Narrow the channel to one peer, or widen it again without `peer_id`.
    Bind {
        #[serde(default)]
        peer_id: Option<String>,
    },
    Send {
        receiver_id: String,
        content: String,
        #[serde(default)]
        client_ref: Option<String>,
    },
    Typing {
        peer_id: String,
    },
    Pong {},
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    Welcome {
        user_id: String,
        session_id: String,
    },
    Bound {
        peer_id: Option<String>,
    },
    Message {
        message: Message,
        direction: Direction,
    },
    Ack {
        client_ref: Option<String>,
        message: Message,
    },
    Error {
        client_ref: Option<String>,
        code: String,
        message: String,
    },
    Typing {
        from: String,
    },
    Heartbeat {
        server_time: String,
    },
}

impl ServerFrame {
    fn from_event(event: ChannelEvent, viewer: &str) -> Self {
        match event {
            ChannelEvent::Message(message) => ServerFrame::Message {
                direction: message.direction_for(viewer),
                message,
            },
            ChannelEvent::Typing { from, .. } => ServerFrame::Typing { from },
        }
    }

    fn error(client_ref: Option<String>, err: ChatError) -> Self {
        let message = match &err {
            // Store details stay in the server log.
            ChatError::StoreUnavailable(_) => "Message store unavailable".to_string(),
            other => other.to_string(),
        };
        ServerFrame::Error {
            client_ref,
            code: ApiError::from(err).code().to_string(),
            message,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// WsSessionState — heartbeat and rate bookkeeping
// ═══════════════════════════════════════════════════════════

/// Action returned by `WsSessionState::on_heartbeat_tick()`.
#[derive(Debug, PartialEq)]
pub(crate) enum HeartbeatAction {
    SendHeartbeat,
    HeartbeatTimeout,
}

/// Per-connection state, kept apart from the socket loop so heartbeat and
/// rate limiting can be tested without a live WebSocket.
pub(crate) struct WsSessionState {
    missed_heartbeats: u32,
    incoming_times: VecDeque<Instant>,
}

impl WsSessionState {
    fn new() -> Self {
        Self {
            missed_heartbeats: 0,
            incoming_times: VecDeque::new(),
        }
    }

    fn on_pong(&mut self) {
        self.missed_heartbeats = 0;
    }

    fn on_heartbeat_tick(&mut self) -> HeartbeatAction {
        if self.missed_heartbeats >= MAX_MISSED_HEARTBEATS {
            return HeartbeatAction::HeartbeatTimeout;
        }
        self.missed_heartbeats += 1;
        HeartbeatAction::SendHeartbeat
    }

    /// Check incoming rate limit. Returns true if allowed.
    fn check_rate(&mut self) -> bool {
        check_incoming_rate(&mut self.incoming_times)
    }
}

/// Check if an incoming frame is within the rate limit (10/sec).
fn check_incoming_rate(timestamps: &mut VecDeque<Instant>) -> bool {
    let now = Instant::now();
    let one_sec_ago = now - Duration::from_secs(1);

    while let Some(&front) = timestamps.front() {
        if front < one_sec_ago {
            timestamps.pop_front();
        } else {
            break;
        }
    }

    if timestamps.len() as u32 >= MAX_INCOMING_PER_SECOND {
        return false;
    }

    timestamps.push_back(now);
    true
}

// ═══════════════════════════════════════════════════════════
// Upgrade + connection loop
// ═══════════════════════════════════════════════════════════

/// WebSocket upgrade handler.
///
/// Upgrade headers are checked first so a plain GET does not burn the
/// ticket. The ticket was obtained via `POST /api/chat/ws-ticket`.
pub async fn ws_upgrade(
    State(ctx): State<ApiContext>,
    Query(query): Query<WsAuthQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let ws = ws.map_err(|rejection| ApiError::ChannelUpgradeFailure {
        status: rejection.status(),
        detail: rejection.body_text(),
    })?;

    let user_id = {
        let mut tickets = ctx
            .ws_tickets
            .lock()
            .map_err(|_| ApiError::Internal("ticket lock".into()))?;
        tickets.consume(&query.ticket).ok_or(ApiError::Unauthorized)?
    };
    check_rate(&ctx, &user_key(&user_id))?;

    tracing::info!(user_id = %user_id, "WebSocket upgrade accepted");
    let core = ctx.core.clone();
    Ok(ws
        .on_upgrade(move |socket| handle_ws(socket, core, user_id))
        .into_response())
}

async fn handle_ws(socket: WebSocket, core: Arc<CoreState>, user_id: String) {
    let (ws_sink, mut ws_stream) = socket.split();
    let (tx, rx) = mpsc::channel::<ServerFrame>(OUTGOING_BUFFER);

    let (registration, mut events) =
        core.registry()
            .register(&user_id, ChannelKind::Live, ChannelScope::Identity);

    // Spawn sender task (reads from channel, writes to WebSocket)
    let sender_handle = tokio::spawn(async move {
        let mut sink = ws_sink;
        let mut rx = rx;
        while let Some(frame) = rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(j) => j,
                Err(_) => continue,
            };
            if sink.send(WsMessage::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let session_id = uuid::Uuid::new_v4().to_string();
    let _ = tx
        .send(ServerFrame::Welcome {
            user_id: user_id.clone(),
            session_id: session_id.clone(),
        })
        .await;

    let mut session = WsSessionState::new();
    let mut heartbeat = tokio::time::interval(core.config().heartbeat_interval);
    heartbeat.tick().await; // Consume initial immediate tick

    loop {
        tokio::select! {
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if !session.check_rate() {
                            tracing::debug!(user_id = %user_id, "Frame dropped, rate limit");
                            continue;
                        }
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(ClientFrame::Pong {}) => session.on_pong(),
                            Ok(frame) => {
                                handle_frame(&core, &user_id, &registration, frame, &tx).await;
                            }
                            Err(e) => {
                                tracing::debug!(user_id = %user_id, error = %e, "Malformed frame ignored");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {} // Ping/Pong/Binary
                }
            }
            event = events.recv() => {
                match event {
                    Some(event) => {
                        let _ = tx.send(ServerFrame::from_event(event, &user_id)).await;
                    }
                    // Registry was reset.
                    None => break,
                }
            }
            _ = heartbeat.tick() => {
                match session.on_heartbeat_tick() {
                    HeartbeatAction::HeartbeatTimeout => {
                        tracing::info!(
                            user_id = %user_id,
                            "{MAX_MISSED_HEARTBEATS} missed heartbeats, disconnecting"
                        );
                        break;
                    }
                    HeartbeatAction::SendHeartbeat => {
                        let _ = tx.send(ServerFrame::Heartbeat {
                            server_time: chrono::Utc::now().to_rfc3339(),
                        }).await;
                    }
                }
            }
        }
    }

    // Cleanup: unregister first so no push lands on a dying channel,
    // then drop sender (stops sender task).
    drop(registration);
    drop(tx);
    let _ = sender_handle.await;

    tracing::info!(user_id = %user_id, session_id = %session_id, "WebSocket disconnected");
}

/// Handle Bind, Send and Typing frames.
async fn handle_frame(
    core: &Arc<CoreState>,
    user_id: &str,
    registration: &Registration,
    frame: ClientFrame,
    tx: &mpsc::Sender<ServerFrame>,
) {
    match frame {
        ClientFrame::Bind { peer_id } => {
            let peer_id = peer_id
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty());
            if peer_id.as_deref() == Some(user_id) {
                let err = ChatError::InvalidArgument("Cannot bind to yourself".into());
                let _ = tx.send(ServerFrame::error(None, err)).await;
                return;
            }
            let scope = match &peer_id {
                Some(peer) => ChannelScope::Pair(peer.clone()),
                None => ChannelScope::Identity,
            };
            registration.rescope(scope);
            tracing::debug!(user_id, peer_id = ?peer_id, "Live channel bound");
            let _ = tx.send(ServerFrame::Bound { peer_id }).await;
        }
        ClientFrame::Send {
            receiver_id,
            content,
            client_ref,
        } => {
            let core = core.clone();
            let sender = user_id.to_string();
            let result = tokio::task::spawn_blocking(move || {
                core.chat().send(&sender, &receiver_id, &content)
            })
            .await;

            let reply = match result {
                Ok(Ok(message)) => ServerFrame::Ack {
                    client_ref,
                    message,
                },
                Ok(Err(err)) => ServerFrame::error(client_ref, err),
                Err(e) => {
                    tracing::error!(error = %e, "Send task failed");
                    ServerFrame::Error {
                        client_ref,
                        code: "INTERNAL".into(),
                        message: "An internal error occurred".into(),
                    }
                }
            };
            let _ = tx.send(reply).await;
        }
        ClientFrame::Typing { peer_id } => {
            let peer_id = peer_id.trim();
            if !peer_id.is_empty() && peer_id != user_id {
                core.registry().notify_typing(user_id, peer_id);
            }
        }
        ClientFrame::Pong {} => {}
    }
}
