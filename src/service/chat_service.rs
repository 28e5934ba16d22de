use chat_relay_wire::{ChatReply, ChatRequest, StreamEvent};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::agent::{GenerationClient, GenerationParams};
use crate::db::conversation_repository::ConversationRepository;
use crate::db::message_repository::MessageRepository;
use crate::db::Database;
use crate::errors::AppError;
use crate::models::{Conversation, Message, MessageRole, NewMessage, DEFAULT_CONVERSATION_TITLE};
use crate::prompt::{build_prompt, resolve_system_prompt, AssistantRole, PromptTurn, TITLE_PROMPT};
use crate::service::relay::StreamRelay;

const MAX_MESSAGE_LENGTH: usize = 32_000;
const MAX_TITLE_CHARS: usize = 15;
const TITLE_MAX_TOKENS: u32 = 50;

#[derive(Clone)]
pub struct ChatService {
    conversation_repo: ConversationRepository,
    message_repo: MessageRepository,
    agent: GenerationClient,
    history_limit: usize,
}

impl ChatService {
    pub fn new(database: &Database, agent: GenerationClient, history_limit: usize) -> Self {
        Self {
            conversation_repo: ConversationRepository::new(database.pool()),
            message_repo: MessageRepository::new(database.pool()),
            agent,
            history_limit,
        }
    }

    // ── Conversations ─────────────────────────────────────────────────────────

    pub async fn get_conversations(&self) -> Result<Vec<Conversation>, AppError> {
        self.conversation_repo.find_all().await
    }

    pub async fn create_conversation(&self, title: Option<String>) -> Result<Conversation, AppError> {
        let title = title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_CONVERSATION_TITLE.to_string());
        let conversation = self.conversation_repo.create(&title).await?;
        info!(conversation_id = conversation.id, "conversation created");
        Ok(conversation)
    }

    pub async fn rename_conversation(&self, id: i64, title: &str) -> Result<Conversation, AppError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::empty_field("title"));
        }
        self.conversation_repo.update_title(id, title).await
    }

    pub async fn delete_conversation(&self, id: i64) -> Result<(), AppError> {
        self.conversation_repo.delete(id).await?;
        info!(conversation_id = id, "conversation deleted");
        Ok(())
    }

    // ── Messages ──────────────────────────────────────────────────────────────

    pub async fn get_messages(&self, conversation_id: i64) -> Result<Vec<Message>, AppError> {
        self.require_conversation(conversation_id).await?;
        self.message_repo.find_by_conversation_id(conversation_id).await
    }

    /// Stores one finished message and refreshes the conversation's
    /// `updated_at` so it sorts first.
    pub async fn create_message(
        &self,
        conversation_id: i64,
        new_message: NewMessage,
    ) -> Result<Message, AppError> {
        let role = match new_message.role.as_str() {
            "user" => MessageRole::User,
            "assistant" => MessageRole::Assistant,
            other => return Err(AppError::InvalidRole { role: other.to_string() }),
        };
        if new_message.content.is_empty() {
            return Err(AppError::empty_field("content"));
        }
        self.require_conversation(conversation_id).await?;

        let message = self
            .message_repo
            .create(conversation_id, role, &new_message.content)
            .await?;
        if let Err(e) = self.conversation_repo.update_timestamp(conversation_id).await {
            error!("Failed to update conversation timestamp: {e}");
        }
        Ok(message)
    }

    // ── Generation ────────────────────────────────────────────────────────────

    /// Validates the request and assembles a fresh prompt from the system
    /// instruction, the bounded history and the new user turn.
    pub async fn prepare_prompt(&self, request: &ChatRequest) -> Result<Vec<PromptTurn>, AppError> {
        if request.message.trim().is_empty() {
            return Err(AppError::empty_field("message"));
        }
        if request.message.len() > MAX_MESSAGE_LENGTH {
            return Err(AppError::FieldTooLong {
                field_name: "message".to_string(),
                max_length: MAX_MESSAGE_LENGTH,
                actual_length: request.message.len(),
            });
        }

        let history = match request.conversation_id {
            Some(id) => self.message_repo.find_recent(id, self.history_limit).await?,
            None => Vec::new(),
        };
        let system = resolve_system_prompt(request.role.as_deref());
        Ok(build_prompt(system, &history, &request.message))
    }

    /// Streaming generation. Validation and history lookup happen before
    /// anything is streamed, so they surface as plain error responses.
    /// Storage is untouched; the caller persists the finished reply.
    pub async fn stream_chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ReceiverStream<StreamEvent>, AppError> {
        let turns = self.prepare_prompt(&request).await?;
        info!(
            conversation_id = ?request.conversation_id,
            role = AssistantRole::resolve(request.role.as_deref()).key(),
            turns = turns.len(),
            "relaying streaming chat"
        );
        Ok(StreamRelay::new(self.agent.clone()).spawn(turns, cancel))
    }

    /// Non-streaming variant of [`ChatService::stream_chat`].
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatReply, AppError> {
        let turns = self.prepare_prompt(&request).await?;
        let params = GenerationParams::blocking(self.agent.config().temperature);
        let content = self.agent.complete(&turns, params).await?;
        Ok(ChatReply::assistant(content))
    }

    pub async fn suggest_title(&self, first_message: &str) -> Result<String, AppError> {
        if first_message.trim().is_empty() {
            return Err(AppError::empty_field("message"));
        }
        let turns = vec![
            PromptTurn::new(MessageRole::System, TITLE_PROMPT),
            PromptTurn::new(MessageRole::User, first_message),
        ];
        let params = GenerationParams {
            max_tokens: Some(TITLE_MAX_TOKENS),
            ..GenerationParams::blocking(self.agent.config().temperature)
        };
        let raw = self.agent.complete(&turns, params).await?;
        Ok(clean_title(&raw))
    }

    async fn require_conversation(&self, id: i64) -> Result<Conversation, AppError> {
        self.conversation_repo
            .find_by_id(id)
            .await?
            .ok_or(AppError::ConversationNotFound { id })
    }
}

/// Trims whitespace and wrapping quotes and caps the length.
fn clean_title(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '“' | '”' | '「' | '」'))
        .trim();
    let title: String = trimmed.chars().take(MAX_TITLE_CHARS).collect();
    if title.is_empty() {
        DEFAULT_CONVERSATION_TITLE.to_string()
    } else {
        title
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpstreamConfig;
    use futures_util::StreamExt;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn service(base_url: &str) -> ChatService {
        let db = Database::open_in_memory().await.unwrap();
        let agent = GenerationClient::new(UpstreamConfig {
            base_url: base_url.to_string(),
            api_key: "sk-test".to_string(),
            model: "deepseek-chat".to_string(),
            temperature: 0.7,
            idle_timeout: Duration::from_secs(5),
        });
        ChatService::new(&db, agent, 10)
    }

    fn new_message(role: &str, content: &str) -> NewMessage {
        NewMessage { role: role.to_string(), content: content.to_string() }
    }

    #[tokio::test]
    async fn prompt_holds_system_last_ten_and_new_turn() {
        let svc = service("http://127.0.0.1:9").await;
        let conversation = svc.create_conversation(None).await.unwrap();
        for i in 0..25 {
            let role = if i % 2 == 0 { "user" } else { "assistant" };
            svc.create_message(conversation.id, new_message(role, &format!("m{i}")))
                .await
                .unwrap();
        }

        let turns = svc
            .prepare_prompt(&ChatRequest {
                conversation_id: Some(conversation.id),
                message: "next".into(),
                role: Some("general".into()),
            })
            .await
            .unwrap();

        assert_eq!(turns.len(), 12);
        assert_eq!(turns[0].role, MessageRole::System);
        assert_eq!(turns[0].content, resolve_system_prompt(Some("general")));
        let middle: Vec<&str> = turns[1..11].iter().map(|t| t.content.as_str()).collect();
        let expected: Vec<String> = (15..25).map(|i| format!("m{i}")).collect();
        assert_eq!(middle, expected);
        assert_eq!(turns[11], PromptTurn::new(MessageRole::User, "next"));
    }

    #[tokio::test]
    async fn no_conversation_means_no_history() {
        let svc = service("http://127.0.0.1:9").await;
        let turns = svc
            .prepare_prompt(&ChatRequest { conversation_id: None, message: "hello".into(), role: Some("X".into()) })
            .await
            .unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, resolve_system_prompt(None));
    }

    #[tokio::test]
    async fn empty_message_is_rejected_before_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let svc = service(&server.uri()).await;
        let err = svc
            .stream_chat(
                ChatRequest { conversation_id: None, message: "   ".into(), role: None },
                CancellationToken::new(),
            )
            .await
            .err()
            .unwrap();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn stream_chat_relays_upstream() {
        let server = MockServer::start().await;
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n\n\
                    data: [DONE]\n\n";
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({ "stream": true })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/event-stream"))
            .mount(&server)
            .await;

        let svc = service(&server.uri()).await;
        let events: Vec<StreamEvent> = svc
            .stream_chat(
                ChatRequest { conversation_id: None, message: "hello".into(), role: None },
                CancellationToken::new(),
            )
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Content("Hi".into()),
                StreamEvent::Content(" there".into()),
                StreamEvent::Done
            ]
        );
        // The relay never writes to storage.
        assert!(svc.get_conversations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_message_validates_and_touches() {
        let svc = service("http://127.0.0.1:9").await;
        let older = svc.create_conversation(Some("older".into())).await.unwrap();
        let newer = svc.create_conversation(Some("newer".into())).await.unwrap();

        assert!(matches!(
            svc.create_message(older.id, new_message("system", "x")).await,
            Err(AppError::InvalidRole { .. })
        ));
        assert!(svc.create_message(older.id, new_message("user", "")).await.unwrap_err().is_validation());
        assert!(svc.create_message(999, new_message("user", "x")).await.unwrap_err().is_not_found());

        tokio::time::sleep(Duration::from_millis(5)).await;
        svc.create_message(older.id, new_message("user", "bump")).await.unwrap();
        let ids: Vec<i64> = svc.get_conversations().await.unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![older.id, newer.id]);
    }

    #[tokio::test]
    async fn suggest_title_is_cleaned() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({ "max_tokens": 50, "stream": false })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "  \"Weeknight meal\"\n"}}]
            })))
            .mount(&server)
            .await;

        let svc = service(&server.uri()).await;
        assert_eq!(svc.suggest_title("what's for dinner?").await.unwrap(), "Weeknight meal");
    }

    #[test]
    fn blank_title_falls_back_to_default() {
        assert_eq!(clean_title(" \"\" "), DEFAULT_CONVERSATION_TITLE);
        assert_eq!(clean_title("「晚饭吃什么」"), "晚饭吃什么");
    }
}
