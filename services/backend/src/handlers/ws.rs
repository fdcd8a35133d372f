//! Real-time channel
//!
//! A socket stays anonymous until it sends a valid `auth` frame; only then
//! is it registered with the hub and starts receiving ledger events.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::fanout::{LedgerEvent, Registration};
use crate::state::AppState;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth { token: String },
    Ping,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionConfirmed { user_id: Uuid },
    AuthFailed { message: String },
    Pong,
}

struct Session {
    user_id: Uuid,
    registration: Registration,
}

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut session: Option<Session> = None;

    loop {
        tokio::select! {
            event = next_event(&mut session) => {
                let Some(event) = event else {
                    tracing::debug!("Hub dropped connection");
                    break;
                };
                if !send_json(&mut sender, &event).await {
                    break;
                }
            }
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_client_message(&state, &mut session, &mut sender, &text).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!("Client closed WebSocket");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "WebSocket receive error");
                        break;
                    }
                    // Binary frames are ignored; protocol pings are answered by axum
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    if let Some(session) = session {
        state
            .hub
            .unregister(session.user_id, session.registration.connection_id);
        tracing::info!(
            user_id = %session.user_id,
            connections = state.hub.total_connections(),
            "WebSocket connection closed"
        );
    }
}

/// Pending forever until the socket is authenticated
async fn next_event(session: &mut Option<Session>) -> Option<LedgerEvent> {
    match session {
        Some(session) => session.registration.receiver.recv().await,
        None => std::future::pending().await,
    }
}

/// Returns false when the socket should be closed
async fn handle_client_message(
    state: &AppState,
    session: &mut Option<Session>,
    sender: &mut SplitSink<WebSocket, Message>,
    text: &str,
) -> bool {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring unrecognised client frame");
            return true;
        }
    };

    match message {
        ClientMessage::Ping => send_json(sender, &ServerMessage::Pong).await,
        ClientMessage::Auth { token } => {
            if let Some(existing) = session.as_ref() {
                let user_id = existing.user_id;
                return send_json(sender, &ServerMessage::ConnectionConfirmed { user_id }).await;
            }

            let user_id = match state.sessions.authenticate(&token).await {
                Ok(Some(user_id)) => user_id,
                Ok(None) => {
                    tracing::info!("WebSocket authentication rejected");
                    return send_json(
                        sender,
                        &ServerMessage::AuthFailed {
                            message: "Invalid or expired session".to_string(),
                        },
                    )
                    .await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Session lookup failed");
                    return send_json(
                        sender,
                        &ServerMessage::AuthFailed {
                            message: "Authentication unavailable".to_string(),
                        },
                    )
                    .await;
                }
            };

            let registration = state.hub.register(user_id);
            tracing::info!(
                %user_id,
                connection_id = %registration.connection_id,
                connections = state.hub.total_connections(),
                "WebSocket authenticated"
            );
            *session = Some(Session {
                user_id,
                registration,
            });

            if !send_json(sender, &ServerMessage::ConnectionConfirmed { user_id }).await {
                return false;
            }
            send_initial_snapshot(state, sender, user_id).await
        }
    }
}

async fn send_initial_snapshot(
    state: &AppState,
    sender: &mut SplitSink<WebSocket, Message>,
    user_id: Uuid,
) -> bool {
    let currency = state.config.ledger.default_currency.clone();
    match state.services.processor.balance(user_id, &currency).await {
        Ok(balance) => {
            send_json(sender, &LedgerEvent::BalanceChanged { balance, currency }).await
        }
        Err(e) => {
            tracing::warn!(%user_id, error = %e, "Failed to load initial balance snapshot");
            true
        }
    }
}

async fn send_json<T: Serialize>(sender: &mut SplitSink<WebSocket, Message>, message: &T) -> bool {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize WebSocket frame");
            return true;
        }
    };

    match tokio::time::timeout(SEND_TIMEOUT, sender.send(Message::Text(json))).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Failed to send frame, client disconnected");
            false
        }
        Err(_) => {
            tracing::warn!("Timed out sending frame, closing connection");
            false
        }
    }
}
