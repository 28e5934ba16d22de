use chat_relay_wire::{PayloadFormat, StreamEvent};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<UpstreamErrorField>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Providers report in-band errors either as a bare string or as an object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UpstreamErrorField {
    Text(String),
    Object { message: String },
}

impl UpstreamErrorField {
    fn into_message(self) -> String {
        match self {
            UpstreamErrorField::Text(message) | UpstreamErrorField::Object { message } => message,
        }
    }
}

/// Chat-completions chunk format: the delta lives at `choices[0].delta.content`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpstreamFormat;

impl PayloadFormat for UpstreamFormat {
    fn decode(&self, payload: &str) -> Result<Option<StreamEvent>, serde_json::Error> {
        let chunk: CompletionChunk = serde_json::from_str(payload)?;
        if let Some(error) = chunk.error {
            return Ok(Some(StreamEvent::Error(error.into_message())));
        }
        Ok(chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
            .filter(|text| !text.is_empty())
            .map(StreamEvent::Content))
    }
}
