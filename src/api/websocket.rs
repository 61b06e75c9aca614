//! WebSocket notification channel
//!
//! One connection carries client commands in and account events out. A
//! connection is bound to an account by `register`; events for that account
//! are forwarded until the socket closes or a newer registration for the same
//! account supersedes it.

use super::handlers::AppState;
use crate::{
    common::types::AccountId,
    events::{ClientMessage, ServerEvent},
    notifications::{ChannelHandle, EventReceiver},
};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

type Binding = Option<(ChannelHandle, EventReceiver)>;

/// GET /ws
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let connections = &state.service.metrics().ws_connections;
    connections.inc();
    debug!("🔌 WebSocket connected ({} open)", connections.get());

    let mut binding: Binding = None;

    'connection: loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    for reply in handle_message(&state, &mut binding, &text) {
                        if send_event(&mut sender, &reply).await.is_err() {
                            break 'connection;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error: {}", e);
                    break;
                }
            },
            outgoing = next_event(&mut binding) => match outgoing {
                Some(event) => {
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                None => {
                    if let Some((handle, _)) = binding.as_ref() {
                        info!("Connection for {} superseded by a newer one", handle.account);
                    }
                    break;
                }
            },
        }
    }

    if let Some((handle, _)) = binding.take() {
        state.service.disconnect(&handle);
    }
    connections.dec();
    let _ = sender.close().await;
}

/// Next event for the bound account. Never resolves while unbound; resolves
/// to `None` once the hub has dropped this channel.
async fn next_event(binding: &mut Binding) -> Option<ServerEvent> {
    match binding {
        Some((_, rx)) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to serialize {}: {}", event.kind(), e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text)).await
}

fn client_error(message: impl Into<String>, code: &str) -> ServerEvent {
    ServerEvent::Error {
        message: message.into(),
        code: Some(code.to_string()),
    }
}

/// Apply one client message. Returns the replies addressed to this socket
/// only; account events travel through the hub.
fn handle_message(state: &AppState, binding: &mut Binding, text: &str) -> Vec<ServerEvent> {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("Unreadable client message: {}", e);
            return vec![client_error(format!("Invalid message: {}", e), "BAD_MESSAGE")];
        }
    };
    let service = &state.service;

    let result = match message {
        ClientMessage::Register { user_id } => {
            if let Some((previous, _)) = binding.take() {
                service.disconnect(&previous);
            }
            *binding = Some(service.connect(&user_id));
            Ok(())
        }
        ClientMessage::PlaceBet { user_id, amount } => {
            if !is_bound_to(binding, &user_id) {
                return vec![not_registered(&user_id)];
            }
            service.place_bet(&user_id, amount).map(|_| ())
        }
        ClientMessage::CancelBet { user_id, amount } => {
            if !is_bound_to(binding, &user_id) {
                return vec![not_registered(&user_id)];
            }
            service.cancel_bet(&user_id, amount).map(|_| ())
        }
        ClientMessage::GameAck { game_id } => service.acknowledge_start(game_id).map(|_| ()),
        ClientMessage::GameWinner { game_id, winner_id } => {
            let Some((handle, _)) = binding.as_ref() else {
                return vec![client_error("Register before reporting results", "NOT_REGISTERED")];
            };
            match service.session(game_id) {
                Ok(session) if !session.is_player(&handle.account) => {
                    return vec![client_error(
                        format!("{} is not playing in game {}", handle.account, game_id),
                        "NOT_A_PLAYER",
                    )];
                }
                Ok(_) => service.report_winner(game_id, &winner_id).map(|_| ()),
                Err(e) => Err(e),
            }
        }
    };

    match result {
        Ok(()) => Vec::new(),
        Err(e) => {
            debug!("Client command rejected: {}", e);
            vec![ServerEvent::error(&e)]
        }
    }
}

fn is_bound_to(binding: &Binding, account: &AccountId) -> bool {
    binding
        .as_ref()
        .map(|(handle, _)| &handle.account == account)
        .unwrap_or(false)
}

fn not_registered(account: &AccountId) -> ServerEvent {
    warn!("Command for {} on a connection not registered to it", account);
    client_error(
        format!("Register as {} before placing or cancelling bets", account),
        "NOT_REGISTERED",
    )
}
