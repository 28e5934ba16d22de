use std::time::Duration;

use async_trait::async_trait;
use chat_relay_wire::{ChatReply, ChatRequest, ErrorBody, TitleRequest, TitleResponse};
use futures_util::StreamExt;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use crate::collaborators::{ByteStream, PersistenceCoordinator, StreamTransport, TitleSuggester};
use crate::error::ClientError;
use crate::models::{Conversation, Message, MessageRecord, NewMessageBody, Role, TitleBody};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Applies to every call except the streaming one, which may run long.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// HTTP client for the chat relay server.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    config: ClientConfig,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_config(base_url, ClientConfig::default())
    }

    pub fn with_config(base_url: impl Into<String>, config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        request
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| {
                error!("Network error: {e}");
                ClientError::Transport(e.to_string())
            })
    }

    /// Non-streaming chat: the whole reply in one response.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatReply, ClientError> {
        let response = self.send(self.http.post(self.url("/api/chat")).json(request)).await?;
        read_json(response, |message| ClientError::Upstream { message, partial: String::new() }).await
    }
}

#[async_trait]
impl PersistenceCoordinator for ApiClient {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ClientError> {
        let response = self.send(self.http.get(self.url("/api/conversations"))).await?;
        read_json(response, ClientError::Persistence).await
    }

    async fn create_conversation(&self, title: Option<&str>) -> Result<Conversation, ClientError> {
        let response = self
            .send(self.http.post(self.url("/api/conversations")).json(&TitleBody { title }))
            .await?;
        read_json(response, ClientError::Persistence).await
    }

    async fn rename_conversation(&self, id: i64, title: &str) -> Result<Conversation, ClientError> {
        let response = self
            .send(
                self.http
                    .patch(self.url(&format!("/api/conversations/{id}")))
                    .json(&TitleBody { title: Some(title) }),
            )
            .await?;
        read_json(response, ClientError::Persistence).await
    }

    async fn delete_conversation(&self, id: i64) -> Result<(), ClientError> {
        let response = self
            .send(self.http.delete(self.url(&format!("/api/conversations/{id}"))))
            .await?;
        let _: serde_json::Value = read_json(response, ClientError::Persistence).await?;
        Ok(())
    }

    async fn list_messages(&self, conversation_id: i64) -> Result<Vec<Message>, ClientError> {
        let response = self
            .send(self.http.get(self.url(&format!("/api/conversations/{conversation_id}/messages"))))
            .await?;
        let records: Vec<MessageRecord> = read_json(response, ClientError::Persistence).await?;
        Ok(records.into_iter().map(Message::from).collect())
    }

    async fn create_message(
        &self,
        conversation_id: i64,
        role: Role,
        content: &str,
    ) -> Result<Message, ClientError> {
        let body = NewMessageBody { role: role.as_str(), content };
        let response = self
            .send(
                self.http
                    .post(self.url(&format!("/api/conversations/{conversation_id}/messages")))
                    .json(&body),
            )
            .await?;
        let record: MessageRecord = read_json(response, ClientError::Persistence).await?;
        Ok(record.into())
    }
}

#[async_trait]
impl TitleSuggester for ApiClient {
    async fn suggest_title(&self, first_message: &str) -> Result<String, ClientError> {
        let body = TitleRequest { message: first_message.to_string() };
        let response = self.send(self.http.post(self.url("/api/chat/title")).json(&body)).await?;
        let title: TitleResponse =
            read_json(response, |message| ClientError::Upstream { message, partial: String::new() })
                .await?;
        Ok(title.title)
    }
}

#[async_trait]
impl StreamTransport for ApiClient {
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, ClientError> {
        debug!(conversation_id = ?request.conversation_id, "opening chat stream");
        let response = self
            .http
            .post(self.url("/api/chat/stream"))
            .json(request)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ClientError::Transport(error_message(response).await));
        }
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ClientError::Transport(e.to_string())))
            .boxed())
    }
}

async fn read_json<T: DeserializeOwned>(
    response: Response,
    on_failure: impl FnOnce(String) -> ClientError,
) -> Result<T, ClientError> {
    if !response.status().is_success() {
        return Err(on_failure(error_message(response).await));
    }
    response.json::<T>().await.map_err(|e| ClientError::Decode(e.to_string()))
}

/// Prefers the server's `{ error, details }` body over the bare status.
async fn error_message(response: Response) -> String {
    let status = response.status();
    match response.json::<ErrorBody>().await {
        Ok(ErrorBody { error, details: Some(details) }) => format!("{error}: {details}"),
        Ok(ErrorBody { error, details: None }) => error,
        Err(_) => format!("Server error: {status}"),
    }
}
