//! WebSocket connection handler.
//!
//! Manages individual realtime sockets: binding them to a user, relaying
//! what the client sends through [`MessagingService`], and writing pushed
//! events back out.
//!
//! [`MessagingService`]: parlor_core::MessagingService

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, StreamExt};
use parlor_core::{ErrorKind, UserId};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;

/// Handle a single WebSocket connection.
///
/// This function runs for the lifetime of the connection:
/// 1. Waits for a `join` message to bind the socket to a user
/// 2. Registers with the realtime router and spawns the writer task
/// 3. Processes incoming messages until the connection closes
///
/// When the upgrade request carried `x-user-id`, `authenticated` holds it and
/// the join must name the same user.
pub async fn handle_websocket(socket: WebSocket, state: AppState, authenticated: Option<UserId>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // ── Step 1: Wait for Join ─────────────────────────────────────────────

    let user = loop {
        match ws_receiver.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Join { user_id }) => {
                    if authenticated.as_ref().is_some_and(|a| a != &user_id) {
                        let err = ServerMessage::Error {
                            kind: ErrorKind::Forbidden,
                            code: None,
                            message: "Join does not match the authenticated user".to_string(),
                        };
                        if !send_json(&mut ws_sender, &err).await {
                            return;
                        }
                        continue;
                    }
                    break user_id;
                }
                Ok(ClientMessage::Ping) => {
                    if !send_json(&mut ws_sender, &ServerMessage::Pong).await {
                        return;
                    }
                }
                Ok(_) => {
                    let err = ServerMessage::invalid("Must join before sending other messages");
                    if !send_json(&mut ws_sender, &err).await {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse client message");
                    let err = ServerMessage::invalid(format!("Invalid message format: {}", e));
                    if !send_json(&mut ws_sender, &err).await {
                        return;
                    }
                }
            },
            Some(Ok(Message::Ping(data))) => {
                let _ = ws_sender.send(Message::Pong(data)).await;
            }
            Some(Ok(Message::Close(_))) | None => {
                return; // Connection closed before joining
            }
            _ => continue,
        }
    };

    // ── Step 2: Register Connection ───────────────────────────────────────

    let (connection, mut events) = match state.service.connect(&user) {
        Ok(registered) => registered,
        Err(e) => {
            tracing::warn!(user = %user, error = %e, "Refusing socket");
            let _ = send_json(&mut ws_sender, &ServerMessage::from(&e)).await;
            let _ = ws_sender.close().await;
            return;
        }
    };

    if !send_json(&mut ws_sender, &ServerMessage::Joined { user_id: user.clone() }).await {
        state.service.disconnect(&user, connection);
        return;
    }
    tracing::info!(user = %user, connection = %connection, "WebSocket joined");

    // ── Step 3: Spawn Writer Task ─────────────────────────────────────────

    // Replies to this client's own frames; pushed events arrive on `events`.
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ServerMessage>();

    let writer_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                event = events.recv() => match event {
                    Some(event) => serde_json::to_string(&event),
                    // The router dropped this connection (shutdown)
                    None => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(reply) => serde_json::to_string(&reply),
                    None => break,
                },
            };
            match frame {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!(error = %e, "Failed to serialize outbound frame"),
            }
        }
        let _ = ws_sender.close().await;
    });

    // ── Step 4: Process Messages ──────────────────────────────────────────

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => {
                    if let Some(reply) = handle_client_message(&state, &user, msg).await {
                        let _ = reply_tx.send(reply);
                    }
                }
                Err(e) => {
                    tracing::warn!(user = %user, error = %e, "Failed to parse client message");
                    let _ = reply_tx.send(ServerMessage::invalid(format!(
                        "Invalid message format: {}",
                        e
                    )));
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!(user = %user, "Client sent close frame");
                break;
            }
            Err(e) => {
                tracing::warn!(user = %user, error = %e, "WebSocket error");
                break;
            }
            _ => {} // Binary, Ping, Pong: ignore
        }
    }

    // ── Step 5: Cleanup ───────────────────────────────────────────────────

    state.service.disconnect(&user, connection);
    writer_task.abort();
    tracing::info!(user = %user, connection = %connection, "WebSocket disconnected");
}

/// Handle a parsed client message. Returns the direct reply, if any.
async fn handle_client_message(
    state: &AppState,
    user: &UserId,
    msg: ClientMessage,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::Join { .. } => Some(ServerMessage::invalid("Already joined")),

        ClientMessage::SendMessage {
            conversation_id,
            content,
        } => {
            let sender = user.clone();
            let sent = state
                .call(move |svc| svc.send_message(&sender, &conversation_id, content))
                .await;
            Some(match sent {
                Ok(message) => ServerMessage::MessageSent { message },
                Err(e) => ServerMessage::from(&e),
            })
        }

        ClientMessage::Typing { receiver_id } => typing(state, user, receiver_id, true).await,

        ClientMessage::StopTyping { receiver_id } => typing(state, user, receiver_id, false).await,

        ClientMessage::Ping => Some(ServerMessage::Pong),
    }
}

/// Forward a typing indicator. Silent on success.
async fn typing(
    state: &AppState,
    user: &UserId,
    receiver: UserId,
    active: bool,
) -> Option<ServerMessage> {
    let sender = user.clone();
    match state
        .call(move |svc| svc.typing(&sender, &receiver, active))
        .await
    {
        Ok(delivered) => {
            tracing::trace!(user = %user, delivered, active, "Typing indicator forwarded");
            None
        }
        Err(e) => Some(ServerMessage::from(&e)),
    }
}

/// Serialize and send one frame. Returns false once the socket is gone.
async fn send_json<S>(sink: &mut S, msg: &impl Serialize) -> bool
where
    S: Sink<Message> + Unpin,
{
    match serde_json::to_string(msg) {
        Ok(json) => sink.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize outbound frame");
            true
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
