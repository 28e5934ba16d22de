use serde::{Deserialize, Serialize};

/// Body of `POST /api/chat` and `POST /api/chat/stream`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub conversation_id: Option<i64>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// Non-streaming reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub content: String,
    pub role: String,
}

impl ChatReply {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { content: content.into(), role: "assistant".to_string() }
    }
}

/// Error body returned with every non-2xx status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleRequest {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleResponse {
    pub title: String,
}
