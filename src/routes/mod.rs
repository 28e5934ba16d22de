pub mod api_routes;
pub mod chat_routes;

use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::service::chat_service::ChatService;
use api_routes::{
    create_conversation_handler, create_message_handler, delete_conversation_handler,
    health_handler, list_conversations_handler, list_messages_handler, rename_conversation_handler,
};
use chat_routes::{chat_handler, chat_stream_handler, title_handler};

pub fn router(chat_service: ChatService) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        // Generation
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/stream", post(chat_stream_handler))
        .route("/api/chat/title", post(title_handler))
        // Persistence
        .route(
            "/api/conversations",
            get(list_conversations_handler).post(create_conversation_handler),
        )
        .route(
            "/api/conversations/{id}",
            patch(rename_conversation_handler).delete(delete_conversation_handler),
        )
        .route(
            "/api/conversations/{id}/messages",
            get(list_messages_handler).post(create_message_handler),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(chat_service)
}
