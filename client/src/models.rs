use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Matches the server `Conversation` model.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Conversation {
    pub id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Either the server-assigned id, or the marker for the one message that is
/// still being generated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageId {
    Durable(i64),
    Streaming,
}

impl MessageId {
    pub fn is_streaming(&self) -> bool {
        matches!(self, MessageId::Streaming)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: i64,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Empty assistant message standing in for a reply in progress.
    pub fn placeholder(conversation_id: i64) -> Self {
        Self {
            id: MessageId::Streaming,
            conversation_id,
            role: Role::Assistant,
            content: String::new(),
            created_at: Utc::now(),
        }
    }
}

/// A message as the server returns it.
#[derive(Debug, Deserialize)]
pub(crate) struct MessageRecord {
    id: i64,
    conversation_id: i64,
    role: Role,
    content: String,
    created_at: DateTime<Utc>,
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: MessageId::Durable(record.id),
            conversation_id: record.conversation_id,
            role: record.role,
            content: record.content,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct NewMessageBody<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct TitleBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<&'a str>,
}
