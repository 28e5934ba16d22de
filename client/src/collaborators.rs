//! Seams between the conversation controller and the outside world.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use chat_relay_wire::ChatRequest;
use futures_util::Stream;

use crate::error::ClientError;
use crate::models::{Conversation, Message, Role};

/// Raw bytes of the relay's event stream.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>;

/// Durable storage for conversations and finished messages.
#[async_trait]
pub trait PersistenceCoordinator: Send + Sync {
    /// Most recently updated first.
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ClientError>;

    async fn create_conversation(&self, title: Option<&str>) -> Result<Conversation, ClientError>;

    async fn rename_conversation(&self, id: i64, title: &str) -> Result<Conversation, ClientError>;

    async fn delete_conversation(&self, id: i64) -> Result<(), ClientError>;

    /// Chronological.
    async fn list_messages(&self, conversation_id: i64) -> Result<Vec<Message>, ClientError>;

    /// Stores the message and refreshes the conversation's `updated_at`.
    async fn create_message(
        &self,
        conversation_id: i64,
        role: Role,
        content: &str,
    ) -> Result<Message, ClientError>;
}

#[async_trait]
pub trait TitleSuggester: Send + Sync {
    async fn suggest_title(&self, first_message: &str) -> Result<String, ClientError>;
}

#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Sends the request and returns the response body once the server has
    /// accepted it.
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, ClientError>;
}
