//! Chat event stream over WebSocket.
//!
//! `GET /api/v1/chats/:id/ws` upgrades the connection and forwards every
//! event published on the chat's topic as a JSON text frame. Messages are
//! sent through the HTTP API; inbound frames other than close are ignored.
//! When the socket goes away a `Leave` notice naming the participant is
//! published on the presence topic.

use crate::errors::CsError;
use crate::handlers::chats::ensure_participant;
use crate::middleware::Acting;
use crate::models::ChatEvent;
use crate::routes::AppState;
use crate::services::ChatHub;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    Extension,
};
use common::types::ChatId;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::instrument;

/// Handler for GET /api/v1/chats/:id/ws
#[instrument(skip_all, name = "cs.handlers.chat_socket", fields(chat_id = id))]
pub async fn chat_socket(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
    Path(id): Path<i64>,
    ws: WebSocketUpgrade,
) -> Result<Response, CsError> {
    let participant = acting.require()?;
    let chat = state.chats.find_by_id(ChatId(id)).await?;
    ensure_participant(&chat, participant)?;

    // Subscribe before upgrading so nothing published in between is missed
    let events = state.chats.subscribe(chat.id)?;
    let chats = Arc::clone(&state.chats);
    let display_name = participant.display_name.clone();

    Ok(ws.on_upgrade(move |socket| forward_events(socket, events, chats, chat.id, display_name)))
}

async fn forward_events(
    socket: WebSocket,
    mut events: broadcast::Receiver<ChatEvent>,
    chats: Arc<ChatHub>,
    chat_id: ChatId,
    display_name: String,
) {
    let (mut sink, mut inbound) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let frame = match serde_json::to_string(&event) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::error!(target: "cs.handlers.ws", error = %e, "Failed to encode chat event");
                            continue;
                        }
                    };
                    if sink.send(WsMessage::Text(frame)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        target: "cs.handlers.ws",
                        chat_id = %chat_id,
                        skipped = skipped,
                        "Subscriber lagged, events dropped"
                    );
                }
                Err(RecvError::Closed) => break,
            },
            frame = inbound.next() => match frame {
                None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    let notified = chats.announce_disconnect(&display_name);
    tracing::debug!(
        target: "cs.handlers.ws",
        chat_id = %chat_id,
        notified = notified,
        "Chat subscriber disconnected"
    );
}
