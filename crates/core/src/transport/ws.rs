// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket transports: the Control Session (one authenticated player at a
//! time, bidirectional) and the Spectator feed (anonymous, read-only).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::timeout;
use tracing::info;

use crate::actuator::Direction;
use crate::control::ControlMessage;
use crate::ratelimit::TokenBucket;
use crate::state::AppState;
use crate::tsm::TsmEvent;

/// Inbound Control Session frames. The handshake frame (`auth`) is parsed
/// separately before this type applies to anything that follows it.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlInbound {
    Auth { token: String },
    ReadyConfirm,
    DirectionPress { dir: WireDirection },
    DirectionRelease { dir: WireDirection },
    DropPress,
    DropRelease,
    LatencyPong,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WireDirection {
    North,
    South,
    East,
    West,
}

impl From<WireDirection> for Direction {
    fn from(d: WireDirection) -> Self {
        match d {
            WireDirection::North => Direction::North,
            WireDirection::South => Direction::South,
            WireDirection::East => Direction::East,
            WireDirection::West => Direction::West,
        }
    }
}

/// `GET /ws/control` — upgrades unconditionally; the connection must send an
/// `{"type":"auth","token":"..."}` frame within `control_pre_auth_timeout_s`
/// or it is dropped without ever touching the registry.
pub async fn control_ws(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let max_frame = state.config.ws_max_frame_bytes;
    ws.max_message_size(max_frame).on_upgrade(move |socket| handle_control(socket, state))
}

async fn handle_control(mut socket: WebSocket, state: Arc<AppState>) {
    let entry = match authenticate_control(&mut socket, &state).await {
        Some(entry) => entry,
        None => return,
    };
    let entry_id = entry.id;

    let max_sessions = state.live.load().max_control_sessions;
    let (tx, mut rx) = match state.control.register(&entry_id, max_sessions).await {
        Ok(pair) => pair,
        Err(()) => {
            let _ = send_error(&mut socket, "conflict", "control session capacity reached").await;
            return;
        }
    };
    let _ = tx.try_send(ControlMessage::AuthOk { entry_id: entry_id.clone() });
    state.tsm.submit(TsmEvent::Reconnect { entry_id: entry_id.clone() }).await;

    let rate_hz = state.live.load().command_rate_limit_hz;
    let mut bucket = TokenBucket::new(rate_hz);
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(message) => {
                        let Ok(text) = serde_json::to_string(&message) else { continue };
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if !bucket.try_acquire() {
                            continue;
                        }
                        handle_control_frame(&state, &entry_id, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    if state.control.unregister_if_current(&entry_id, &tx).await {
        state.tsm.submit(TsmEvent::Disconnect { entry_id }).await;
    }
}

/// Read frames until a valid `auth` frame arrives, the pre-auth timeout
/// elapses, or the socket closes. Returns the authenticated entry on success.
async fn authenticate_control(
    socket: &mut WebSocket,
    state: &Arc<AppState>,
) -> Option<crate::persistence::models::QueueEntry> {
    let deadline = state.config.control_pre_auth_timeout();
    let frame = match timeout(deadline, socket.recv()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        _ => return None,
    };

    let Ok(ControlInbound::Auth { token }) = serde_json::from_str::<ControlInbound>(&frame) else {
        let _ = send_error(socket, "protocol", "expected an auth frame").await;
        return None;
    };

    let entry = match state.queue.get_by_token(&token).await {
        Ok(Some(entry)) if entry.state.is_live() => entry,
        _ => {
            let _ = send_error(socket, "unauthorized", "unknown token or entry not live").await;
            return None;
        }
    };

    Some(entry)
}

async fn send_error(socket: &mut WebSocket, code: &str, message: &str) -> Result<(), axum::Error> {
    let body = ControlMessage::Error { code: code.to_owned(), message: message.to_owned() };
    let Ok(text) = serde_json::to_string(&body) else { return Ok(()) };
    socket.send(Message::Text(text.into())).await
}

async fn handle_control_frame(state: &Arc<AppState>, entry_id: &str, text: &str) {
    let Ok(frame) = serde_json::from_str::<ControlInbound>(text) else { return };
    let event = match frame {
        ControlInbound::Auth { .. } => return,
        ControlInbound::ReadyConfirm => TsmEvent::ReadyConfirm { entry_id: entry_id.to_owned() },
        ControlInbound::DirectionPress { dir } => {
            TsmEvent::DirectionPress { entry_id: entry_id.to_owned(), dir: dir.into() }
        }
        ControlInbound::DirectionRelease { dir } => {
            TsmEvent::DirectionRelease { entry_id: entry_id.to_owned(), dir: dir.into() }
        }
        ControlInbound::DropPress => TsmEvent::DropPress { entry_id: entry_id.to_owned() },
        ControlInbound::DropRelease => TsmEvent::DropRelease { entry_id: entry_id.to_owned() },
        ControlInbound::LatencyPong => return,
    };
    state.tsm.submit(event).await;
}

/// `GET /ws/spectate` — anonymous, read-only broadcast feed. Rejected with a
/// close frame (not an HTTP error — the upgrade already happened) once
/// `max_status_viewers` is reached.
pub async fn spectate_ws(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_spectate(socket, state))
}

async fn handle_spectate(mut socket: WebSocket, state: Arc<AppState>) {
    let (id, mut rx) = match state.broadcast.subscribe().await {
        Ok(pair) => pair,
        Err(_) => {
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    info!(session = %id, "spectator connected");
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            message = rx.recv() => {
                match message {
                    Some(message) => {
                        let Ok(text) = serde_json::to_string(&message) else { continue };
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    // Spectators never send anything meaningful; ignore.
                    _ => {}
                }
            }
        }
    }

    state.broadcast.unsubscribe(id).await;
}
