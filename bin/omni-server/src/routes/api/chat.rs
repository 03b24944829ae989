//! Chat turn and history routes.
//!
//! `POST /api/chat` answers with a `text/event-stream` carrying the turn's
//! records (see [`omni_types::StreamRecord`]), or with a synchronous JSON
//! error when the turn is rejected before the stream opens.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use omni_types::{Attachment, AttachmentKind, Chat, ChatId, Message, Role, TurnRequest};
use tokio_stream::wrappers::ReceiverStream;
use utoipa::OpenApi;

use crate::entities::{ChatStore, MessageStore};
use crate::error::ServerError;
use crate::relay;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(send_message, list_chats, list_chat_messages),
    components(schemas(TurnRequest, Chat, Message, Attachment, AttachmentKind, Role))
)]
pub struct ChatApi;

/// Register chat routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chat", post(send_message).get(list_chats))
        .route("/chat/{id}", get(list_chat_messages))
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// Run one chat turn and stream the reply.
///
/// Each event's data is one of `{"chatId":N}` (new chats only, always
/// first), `{"token":"..."}`, `{"error":"..."}` or the literal `[DONE]`.
#[utoipa::path(
    post,
    path = "/api/chat",
    tag = "chat",
    request_body = TurnRequest,
    responses(
        (status = 200, description = "Event stream of turn records", body = String, content_type = "text/event-stream"),
        (status = 400, description = "Message empty or too large"),
        (status = 404, description = "Unknown chat id"),
        (status = 500, description = "User message could not be stored"),
    )
)]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TurnRequest>,
) -> Result<Response, ServerError> {
    let records = relay::begin_turn(state, req).await?;
    let events = ReceiverStream::new(records)
        .map(|record| Ok::<Event, Infallible>(Event::default().data(record.to_data())));
    Ok(Sse::new(events).into_response())
}

#[utoipa::path(
    get,
    path = "/api/chat",
    tag = "chat",
    responses(
        (status = 200, description = "Chats, newest first", body = Vec<Chat>),
        (status = 500, description = "Backend error"),
    )
)]
pub async fn list_chats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Chat>>, ServerError> {
    Ok(Json(state.store.list_chats().await?))
}

#[utoipa::path(
    get,
    path = "/api/chat/{id}",
    tag = "chat",
    params(("id" = i64, Path, description = "Chat id")),
    responses(
        (status = 200, description = "Messages, oldest first", body = Vec<Message>),
        (status = 404, description = "Unknown chat id"),
        (status = 500, description = "Backend error"),
    )
)]
pub async fn list_chat_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ChatId>,
) -> Result<Json<Vec<Message>>, ServerError> {
    if state.store.get_chat(id).await?.is_none() {
        return Err(ServerError::NotFound(format!("chat {id} not found")));
    }
    Ok(Json(state.store.list_messages(id).await?))
}

// ── Tests ──────────────────────────────────────────────────────────────────────
