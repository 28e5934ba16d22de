use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::models::{Conversation, Message, NewConversation, NewMessage, RenameConversation};
use crate::service::chat_service::ChatService;

/// GET `/api/conversations` — most recently updated first
pub async fn list_conversations_handler(
    State(svc): State<ChatService>,
) -> Result<Json<Vec<Conversation>>, AppError> {
    Ok(Json(svc.get_conversations().await?))
}

/// POST `/api/conversations`
pub async fn create_conversation_handler(
    State(svc): State<ChatService>,
    body: Option<Json<NewConversation>>,
) -> Result<Json<Conversation>, AppError> {
    let title = body.and_then(|Json(body)| body.title);
    Ok(Json(svc.create_conversation(title).await?))
}

/// PATCH `/api/conversations/{id}`
pub async fn rename_conversation_handler(
    Path(id): Path<i64>,
    State(svc): State<ChatService>,
    Json(body): Json<RenameConversation>,
) -> Result<Json<Conversation>, AppError> {
    Ok(Json(svc.rename_conversation(id, &body.title).await?))
}

/// DELETE `/api/conversations/{id}`
pub async fn delete_conversation_handler(
    Path(id): Path<i64>,
    State(svc): State<ChatService>,
) -> Result<Json<Value>, AppError> {
    svc.delete_conversation(id).await?;
    Ok(Json(json!({ "success": true })))
}

/// GET `/api/conversations/{id}/messages` — chronological
pub async fn list_messages_handler(
    Path(id): Path<i64>,
    State(svc): State<ChatService>,
) -> Result<Json<Vec<Message>>, AppError> {
    Ok(Json(svc.get_messages(id).await?))
}

/// POST `/api/conversations/{id}/messages`
pub async fn create_message_handler(
    Path(id): Path<i64>,
    State(svc): State<ChatService>,
    Json(body): Json<NewMessage>,
) -> Result<Json<Message>, AppError> {
    Ok(Json(svc.create_message(id, body).await?))
}

/// GET `/api/health`
pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok", "message": "API service is running" }))
}
