//! Chat handlers.
//!
//! - `GET /api/v1/chats` - The caller's chats
//! - `POST /api/v1/chats` - Find or create a private chat with someone
//! - `GET /api/v1/chats/:id` - Chat details
//! - `DELETE /api/v1/chats/:id` - Delete a chat
//! - `GET /api/v1/chats/:id/messages` - Decrypted history
//! - `POST /api/v1/chats/:id/messages` - Send a message
//! - `DELETE /api/v1/chats/:id/messages` - Clear a chat
//! - `POST /api/v1/chats/:id/join` - Join, or be redirected to a private chat
//! - `DELETE /api/v1/messages/:id` - Delete one's own message

use crate::errors::CsError;
use crate::middleware::Acting;
use crate::models::{
    Chat, FindOrCreateChatRequest, JoinChatRequest, JoinChatResponse, Message, MessageDraft,
    Participant,
};
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use common::types::{ChatId, MessageId};
use std::sync::Arc;
use tracing::instrument;

/// Reads are limited to chat participants.
pub(crate) fn ensure_participant(chat: &Chat, participant: &Participant) -> Result<(), CsError> {
    if chat.has_participant(participant.id) {
        Ok(())
    } else {
        Err(CsError::Forbidden(
            "Only chat participants may access this chat".to_string(),
        ))
    }
}

/// Handler for GET /api/v1/chats
#[instrument(skip_all, name = "cs.handlers.list_chats")]
pub async fn list_chats(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
) -> Result<Json<Vec<Chat>>, CsError> {
    let chats = state.chats.chats_of(acting.require()?.id).await?;
    Ok(Json(chats))
}

/// Handler for POST /api/v1/chats
#[instrument(skip_all, name = "cs.handlers.find_or_create_chat")]
pub async fn find_or_create_chat(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
    Json(request): Json<FindOrCreateChatRequest>,
) -> Result<Json<Chat>, CsError> {
    let chat = state
        .chats
        .find_or_create(acting.require()?.id, request.participant_id)
        .await?;
    Ok(Json(chat))
}

/// Handler for GET /api/v1/chats/:id
#[instrument(skip_all, name = "cs.handlers.get_chat", fields(chat_id = id))]
pub async fn get_chat(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
    Path(id): Path<i64>,
) -> Result<Json<Chat>, CsError> {
    let chat = state.chats.find_by_id(ChatId(id)).await?;
    ensure_participant(&chat, acting.require()?)?;
    Ok(Json(chat))
}

/// Handler for DELETE /api/v1/chats/:id
#[instrument(skip_all, name = "cs.handlers.delete_chat", fields(chat_id = id))]
pub async fn delete_chat(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
    Path(id): Path<i64>,
) -> Result<StatusCode, CsError> {
    state.chats.delete(ChatId(id), acting.require()?).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for GET /api/v1/chats/:id/messages
#[instrument(skip_all, name = "cs.handlers.list_messages", fields(chat_id = id))]
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Message>>, CsError> {
    let chat = state.chats.find_by_id(ChatId(id)).await?;
    ensure_participant(&chat, acting.require()?)?;

    let messages = state.chats.find_all_chat_messages(chat.id).await?;
    Ok(Json(messages))
}

/// Handler for POST /api/v1/chats/:id/messages
#[instrument(skip_all, name = "cs.handlers.send_message", fields(chat_id = id))]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
    Path(id): Path<i64>,
    Json(draft): Json<MessageDraft>,
) -> Result<(StatusCode, Json<Message>), CsError> {
    let message = state
        .chats
        .send(ChatId(id), draft, acting.require()?)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Handler for DELETE /api/v1/chats/:id/messages
#[instrument(skip_all, name = "cs.handlers.clear_chat", fields(chat_id = id))]
pub async fn clear_chat(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
    Path(id): Path<i64>,
) -> Result<StatusCode, CsError> {
    state.chats.clear(ChatId(id), acting.require()?).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for POST /api/v1/chats/:id/join
#[instrument(skip_all, name = "cs.handlers.join_chat", fields(chat_id = id))]
pub async fn join_chat(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
    Path(id): Path<i64>,
    Json(request): Json<JoinChatRequest>,
) -> Result<Json<JoinChatResponse>, CsError> {
    let outcome = state
        .chats
        .accept_join(ChatId(id), acting.require()?, request.invitation_accepted)
        .await?;

    Ok(Json(JoinChatResponse {
        outcome: outcome.as_str().to_string(),
        chat: outcome.into_chat(),
    }))
}

/// Handler for DELETE /api/v1/messages/:id
#[instrument(skip_all, name = "cs.handlers.delete_message", fields(message_id = id))]
pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    Extension(acting): Extension<Acting>,
    Path(id): Path<i64>,
) -> Result<StatusCode, CsError> {
    state
        .chats
        .delete_message(MessageId(id), acting.require()?)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
