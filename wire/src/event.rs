use serde::Deserialize;

use crate::framer::{PayloadFormat, DONE_SENTINEL};

/// One logical unit of streamed output after framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A text delta, never empty.
    Content(String),
    Done,
    Error(String),
}

impl StreamEvent {
    /// `Done` and `Error` end a stream; nothing may follow them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error(_))
    }

    /// Payload text as carried after the `data: ` prefix.
    pub fn to_payload(&self) -> String {
        match self {
            StreamEvent::Content(text) => serde_json::json!({ "content": text }).to_string(),
            StreamEvent::Done => DONE_SENTINEL.to_string(),
            StreamEvent::Error(message) => serde_json::json!({ "error": message }).to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RelayPayload {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Payload format of the relay's own re-emitted stream:
/// `{"content": "..."}` or `{"error": "..."}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayFormat;

impl PayloadFormat for RelayFormat {
    fn decode(&self, payload: &str) -> Result<Option<StreamEvent>, serde_json::Error> {
        let parsed: RelayPayload = serde_json::from_str(payload)?;
        if let Some(message) = parsed.error {
            return Ok(Some(StreamEvent::Error(message)));
        }
        Ok(parsed
            .content
            .filter(|text| !text.is_empty())
            .map(StreamEvent::Content))
    }
}
