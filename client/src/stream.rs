use std::sync::Arc;

use chat_relay_wire::{ChatRequest, FramedEvents, RelayFormat, StreamEvent};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::collaborators::StreamTransport;
use crate::error::ClientError;

enum Step {
    Cancelled,
    Next(Option<Result<StreamEvent, ClientError>>),
}

/// Reads one relay stream and reassembles the reply.
#[derive(Clone)]
pub struct ClientStreamConsumer {
    transport: Arc<dyn StreamTransport>,
}

impl ClientStreamConsumer {
    pub fn new(transport: Arc<dyn StreamTransport>) -> Self {
        Self { transport }
    }

    /// Opens the stream and calls `on_text` with the whole reply so far after
    /// every delta. Returns the final text; a stream that ends without
    /// `[DONE]` still counts as finished.
    pub async fn consume<F>(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
        mut on_text: F,
    ) -> Result<String, ClientError>
    where
        F: FnMut(&str) + Send,
    {
        let bytes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled { partial: String::new() }),
            opened = self.transport.open_stream(request) => opened?,
        };

        let mut events = FramedEvents::new(bytes, RelayFormat);
        let mut text = String::new();

        loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                next = events.next() => Step::Next(next),
            };

            match step {
                Step::Cancelled => {
                    debug!(received = text.len(), "stream cancelled");
                    return Err(ClientError::Cancelled { partial: text });
                }
                Step::Next(None) | Step::Next(Some(Ok(StreamEvent::Done))) => return Ok(text),
                Step::Next(Some(Ok(StreamEvent::Content(delta)))) => {
                    text.push_str(&delta);
                    on_text(&text);
                }
                Step::Next(Some(Ok(StreamEvent::Error(message)))) => {
                    warn!("relay reported failure: {message}");
                    return Err(ClientError::Upstream { message, partial: text });
                }
                Step::Next(Some(Err(e))) => {
                    warn!("stream broke off: {e}");
                    return Err(ClientError::Upstream { message: e.to_string(), partial: text });
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::collaborators::ByteStream;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;

    /// Replays a fixed list of chunks.
    pub(crate) struct ScriptedTransport {
        chunks: Vec<Result<Bytes, String>>,
        pub(crate) requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(chunks: Vec<&[u8]>) -> Self {
            Self {
                chunks: chunks.into_iter().map(|c| Ok(Bytes::copy_from_slice(c))).collect(),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn text(body: &str) -> Self {
            Self::new(vec![body.as_bytes()])
        }

        fn with_error(mut self, message: &str) -> Self {
            self.chunks.push(Err(message.to_string()));
            self
        }
    }

    #[async_trait]
    impl StreamTransport for ScriptedTransport {
        async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, ClientError> {
            self.requests.lock().unwrap().push(request.clone());
            let chunks: Vec<Result<Bytes, ClientError>> = self
                .chunks
                .iter()
                .map(|c| c.clone().map_err(ClientError::Transport))
                .collect();
            Ok(futures_util::stream::iter(chunks).boxed())
        }
    }

    struct RefusingTransport;

    #[async_trait]
    impl StreamTransport for RefusingTransport {
        async fn open_stream(&self, _request: &ChatRequest) -> Result<ByteStream, ClientError> {
            Err(ClientError::Transport("Invalid request: message".into()))
        }
    }

    fn request() -> ChatRequest {
        ChatRequest { conversation_id: Some(1), message: "hello".into(), role: Some("general".into()) }
    }

    async fn consume(transport: impl StreamTransport + 'static) -> (Result<String, ClientError>, Vec<String>) {
        let consumer = ClientStreamConsumer::new(Arc::new(transport));
        let mut snapshots = Vec::new();
        let result = consumer
            .consume(&request(), &CancellationToken::new(), |text| snapshots.push(text.to_string()))
            .await;
        (result, snapshots)
    }

    const BODY: &str = "data: {\"content\":\"Hi\"}\n\n\
                        data: {\"content\":\" th\u{e9}re, \u{4e16}\u{754c}\"}\n\n\
                        data: [DONE]\n\n";

    #[tokio::test]
    async fn reassembles_regardless_of_split_point() {
        let bytes = BODY.as_bytes();
        for split in 0..=bytes.len() {
            let (result, snapshots) =
                consume(ScriptedTransport::new(vec![&bytes[..split], &bytes[split..]])).await;
            assert_eq!(result.unwrap(), "Hi th\u{e9}re, \u{4e16}\u{754c}", "split at {split}");
            assert_eq!(snapshots, vec!["Hi".to_string(), "Hi th\u{e9}re, \u{4e16}\u{754c}".to_string()]);
        }
    }

    #[tokio::test]
    async fn reassembles_byte_by_byte() {
        let chunks: Vec<&[u8]> = BODY.as_bytes().chunks(1).collect();
        let (result, _) = consume(ScriptedTransport::new(chunks)).await;
        assert_eq!(result.unwrap(), "Hi th\u{e9}re, \u{4e16}\u{754c}");
    }

    #[tokio::test]
    async fn ignores_malformed_lines_and_anything_after_done() {
        let body = "data: {\"content\":\"a\"}\n\n\
                    data: not json\n\n\
                    : keep-alive\n\n\
                    data: {\"content\":\"b\"}\n\n\
                    data: [DONE]\n\n\
                    data: {\"content\":\"late\"}\n\n";
        let (result, snapshots) = consume(ScriptedTransport::text(body)).await;
        assert_eq!(result.unwrap(), "ab");
        assert_eq!(snapshots.len(), 2);
    }

    #[tokio::test]
    async fn missing_done_returns_accumulated_text() {
        let (result, _) = consume(ScriptedTransport::text("data: {\"content\":\"only\"}\n\n")).await;
        assert_eq!(result.unwrap(), "only");
    }

    #[tokio::test]
    async fn error_event_carries_partial_text() {
        let body = "data: {\"content\":\"Hi\"}\n\n\
                    data: {\"content\":\" there\"}\n\n\
                    data: {\"error\":\"Upstream API call failed (500)\"}\n\n\
                    data: {\"content\":\"never\"}\n\n";
        let (result, snapshots) = consume(ScriptedTransport::text(body)).await;
        match result {
            Err(ClientError::Upstream { message, partial }) => {
                assert_eq!(message, "Upstream API call failed (500)");
                assert_eq!(partial, "Hi there");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(snapshots.len(), 2);
    }

    #[tokio::test]
    async fn broken_connection_fails_like_upstream_error() {
        let transport = ScriptedTransport::text("data: {\"content\":\"Hi\"}\n\n").with_error("reset");
        let (result, _) = consume(transport).await;
        assert!(matches!(result, Err(ClientError::Upstream { partial, .. }) if partial == "Hi"));
    }

    #[tokio::test]
    async fn rejected_request_is_transport_error() {
        let (result, snapshots) = consume(RefusingTransport).await;
        assert!(matches!(result, Err(ClientError::Transport(_))));
        assert!(snapshots.is_empty());
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_opening() {
        let transport = Arc::new(ScriptedTransport::text(BODY));
        let consumer = ClientStreamConsumer::new(transport.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = consumer.consume(&request(), &cancel, |_| {}).await;
        assert!(matches!(result, Err(ClientError::Cancelled { partial }) if partial.is_empty()));
        assert!(transport.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn request_is_forwarded_unchanged() {
        let transport = Arc::new(ScriptedTransport::text(BODY));
        let consumer = ClientStreamConsumer::new(transport.clone());
        consumer.consume(&request(), &CancellationToken::new(), |_| {}).await.unwrap();
        assert_eq!(transport.requests.lock().unwrap().as_slice(), &[request()]);
    }
}
