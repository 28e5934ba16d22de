pub mod format;

use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::UpstreamConfig;
use crate::errors::AppError;
use crate::prompt::PromptTurn;

pub use format::UpstreamFormat;

/// Raw response body of a streaming generation.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Per-request sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub stream: bool,
    pub max_tokens: Option<u32>,
}

impl GenerationParams {
    pub fn streaming(temperature: f32) -> Self {
        Self { temperature, stream: true, max_tokens: None }
    }

    pub fn blocking(temperature: f32) -> Self {
        Self { temperature, stream: false, max_tokens: None }
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [PromptTurn],
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for the OpenAI-compatible generation service.
///
/// Issues exactly one request per call and never retries: a non-2xx status or
/// a transport failure is returned to the caller as is.
#[derive(Clone)]
pub struct GenerationClient {
    http: reqwest::Client,
    config: UpstreamConfig,
}

impl GenerationClient {
    pub fn new(config: UpstreamConfig) -> Self {
        Self { http: reqwest::Client::new(), config }
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Starts a streaming generation and hands back the raw body.
    ///
    /// Cancelling `cancel` while the request is in flight aborts it; dropping
    /// the returned stream closes the connection.
    pub async fn open_stream(
        &self,
        turns: &[PromptTurn],
        params: GenerationParams,
        cancel: &CancellationToken,
    ) -> Result<ByteStream, AppError> {
        let params = GenerationParams { stream: true, ..params };
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            response = self.send(turns, params) => response?,
        };
        Ok(response.bytes_stream().boxed())
    }

    /// Runs a non-streaming generation and returns the assistant text.
    pub async fn complete(
        &self,
        turns: &[PromptTurn],
        params: GenerationParams,
    ) -> Result<String, AppError> {
        let params = GenerationParams { stream: false, ..params };
        let response = self.send(turns, params).await?;
        let body: CompletionResponse = response.json().await.map_err(|e| {
            error!("Failed to decode completion response: {e}");
            AppError::UpstreamPayload { message: e.to_string() }
        })?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AppError::UpstreamPayload {
                message: "completion carried no choices".to_string(),
            })
    }

    async fn send(
        &self,
        turns: &[PromptTurn],
        params: GenerationParams,
    ) -> Result<reqwest::Response, AppError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let body = CompletionRequest {
            model: &self.config.model,
            messages: turns,
            temperature: params.temperature,
            stream: params.stream,
            max_tokens: params.max_tokens,
        };
        debug!(turns = turns.len(), stream = params.stream, "sending generation request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Generation request to {url} failed: {e}");
                AppError::UpstreamTransport(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "Upstream API error: {body}");
            return Err(AppError::UpstreamStatus { status: status.as_u16(), body });
        }
        Ok(response)
    }
}
