//! One generation, re-emitted as a normalized event stream.
//!
//! A relay invocation walks `Idle → RequestSent → Streaming` and ends in
//! exactly one of `Completed` (after an explicit `Done`) or `Failed` (upstream
//! status, in-band error, transport error, idle timeout or cancellation).
//! The terminal event is sent once; nothing follows it.

use std::time::Duration;

use chat_relay_wire::{FramedEvents, StreamEvent};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{ByteStream, GenerationClient, GenerationParams, UpstreamFormat};
use crate::errors::AppError;
use crate::prompt::PromptTurn;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPhase {
    Idle,
    RequestSent,
    Streaming,
    Completed,
    Failed,
}

impl RelayPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayPhase::Completed | RelayPhase::Failed)
    }
}

#[derive(Clone)]
pub struct StreamRelay {
    upstream: GenerationClient,
    params: GenerationParams,
    idle_timeout: Duration,
}

/// Sending side of one invocation; owns the phase so that the terminal
/// event can only go out once.
struct Emitter {
    tx: mpsc::Sender<StreamEvent>,
    phase: RelayPhase,
    relay_id: Uuid,
}

impl Emitter {
    fn advance(&mut self, phase: RelayPhase) {
        debug!(relay_id = %self.relay_id, from = ?self.phase, to = ?phase, "relay phase");
        self.phase = phase;
    }

    /// Returns false once the receiver is gone.
    async fn content(&mut self, text: String) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        self.tx.send(StreamEvent::Content(text)).await.is_ok()
    }

    async fn complete(&mut self) {
        if self.phase.is_terminal() {
            return;
        }
        self.advance(RelayPhase::Completed);
        let _ = self.tx.send(StreamEvent::Done).await;
    }

    async fn fail(&mut self, message: String) {
        if self.phase.is_terminal() {
            return;
        }
        warn!(relay_id = %self.relay_id, "generation failed: {message}");
        self.advance(RelayPhase::Failed);
        let _ = self.tx.send(StreamEvent::Error(message)).await;
    }
}

enum Step<T> {
    Cancelled,
    ReceiverGone,
    Idle,
    Next(T),
}

impl StreamRelay {
    pub fn new(upstream: GenerationClient) -> Self {
        let config = upstream.config();
        let params = GenerationParams::streaming(config.temperature);
        let idle_timeout = config.idle_timeout;
        Self { upstream, params, idle_timeout }
    }

    #[cfg(test)]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Runs the relay on its own task and hands back the receiving end.
    /// Dropping the returned stream stops the relay and closes the upstream
    /// connection.
    pub fn spawn(self, turns: Vec<PromptTurn>, cancel: CancellationToken) -> ReceiverStream<StreamEvent> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            self.run(turns, tx, cancel).await;
        });
        ReceiverStream::new(rx)
    }

    pub async fn run(
        &self,
        turns: Vec<PromptTurn>,
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> RelayPhase {
        let mut emitter = Emitter { tx, phase: RelayPhase::Idle, relay_id: Uuid::new_v4() };
        let relay_id = emitter.relay_id;
        info!(%relay_id, turns = turns.len(), "starting generation");

        emitter.advance(RelayPhase::RequestSent);
        let opened = tokio::time::timeout(
            self.idle_timeout,
            self.upstream.open_stream(&turns, self.params, &cancel),
        )
        .await;
        let bytes = match opened {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                emitter.fail(e.client_message()).await;
                return emitter.phase;
            }
            Err(_) => {
                emitter.fail(self.idle_error().client_message()).await;
                return emitter.phase;
            }
        };

        emitter.advance(RelayPhase::Streaming);
        let deltas = self.forward(bytes, &mut emitter, &cancel).await;

        info!(%relay_id, deltas, phase = ?emitter.phase, "generation finished");
        emitter.phase
    }

    /// Pumps upstream events into the emitter until a terminal step.
    /// Returns the number of deltas read.
    async fn forward(&self, bytes: ByteStream, emitter: &mut Emitter, cancel: &CancellationToken) -> usize {
        let relay_id = emitter.relay_id;
        let tx = emitter.tx.clone();
        let mut events = FramedEvents::new(bytes, UpstreamFormat);
        let mut deltas = 0usize;

        loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                _ = tx.closed() => Step::ReceiverGone,
                next = tokio::time::timeout(self.idle_timeout, events.next()) => match next {
                    Ok(next) => Step::Next(next),
                    Err(_) => Step::Idle,
                },
            };

            match step {
                Step::Cancelled => {
                    emitter.fail(AppError::Cancelled.to_string()).await;
                    break;
                }
                Step::ReceiverGone => {
                    debug!(%relay_id, "receiver dropped, closing upstream");
                    cancel.cancel();
                    emitter.advance(RelayPhase::Failed);
                    break;
                }
                Step::Idle => {
                    emitter.fail(self.idle_error().client_message()).await;
                    break;
                }
                Step::Next(None) => {
                    // Upstream closed without [DONE]; what arrived is complete.
                    emitter.complete().await;
                    break;
                }
                Step::Next(Some(Ok(StreamEvent::Content(text)))) => {
                    deltas += 1;
                    if !emitter.content(text).await {
                        cancel.cancel();
                        emitter.advance(RelayPhase::Failed);
                        break;
                    }
                }
                Step::Next(Some(Ok(StreamEvent::Done))) => {
                    emitter.complete().await;
                    break;
                }
                Step::Next(Some(Ok(StreamEvent::Error(message)))) => {
                    emitter.fail(message).await;
                    break;
                }
                Step::Next(Some(Err(e))) => {
                    emitter.fail(AppError::UpstreamTransport(e).client_message()).await;
                    break;
                }
            }
        }
        deltas
    }

    fn idle_error(&self) -> AppError {
        AppError::UpstreamIdle { timeout: self.idle_timeout }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpstreamConfig;
    use crate::models::MessageRole;
    use bytes::Bytes;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn relay(base_url: &str) -> StreamRelay {
        StreamRelay::new(GenerationClient::new(UpstreamConfig {
            base_url: base_url.to_string(),
            api_key: "sk-test".to_string(),
            model: "deepseek-chat".to_string(),
            temperature: 0.7,
            idle_timeout: Duration::from_secs(5),
        }))
    }

    fn delta(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({ "choices": [{ "delta": { "content": text } }] })
        )
    }

    async fn upstream_with_body(body: String) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body.into_bytes(), "text/event-stream"),
            )
            .mount(&server)
            .await;
        server
    }

    async fn run_to_end(relay: &StreamRelay) -> (RelayPhase, Vec<StreamEvent>) {
        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        let turns = vec![PromptTurn::new(MessageRole::User, "hello")];
        let phase = relay.run(turns, tx, CancellationToken::new()).await;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (phase, events)
    }

    /// One delta, then an upstream that stays open and silent.
    fn stalled_after(text: &str) -> ByteStream {
        futures_util::stream::iter(vec![Ok::<_, reqwest::Error>(Bytes::from(delta(text)))])
            .chain(futures_util::stream::pending())
            .boxed()
    }

    fn streaming_emitter(tx: mpsc::Sender<StreamEvent>) -> Emitter {
        Emitter { tx, phase: RelayPhase::Streaming, relay_id: Uuid::new_v4() }
    }

    #[tokio::test]
    async fn relays_deltas_then_done() {
        let body = format!(
            "{}{}data: {{broken\n\n{}data: [DONE]\n\n{}",
            delta("Hi"),
            delta(""),
            delta(" there"),
            delta("after done"),
        );
        let server = upstream_with_body(body).await;

        let (phase, events) = run_to_end(&relay(&server.uri())).await;
        assert_eq!(phase, RelayPhase::Completed);
        assert_eq!(
            events,
            vec![
                StreamEvent::Content("Hi".into()),
                StreamEvent::Content(" there".into()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn upstream_end_without_done_still_completes() {
        let server = upstream_with_body(delta("only")).await;
        let (phase, events) = run_to_end(&relay(&server.uri())).await;
        assert_eq!(phase, RelayPhase::Completed);
        assert_eq!(events, vec![StreamEvent::Content("only".into()), StreamEvent::Done]);
    }

    #[tokio::test]
    async fn http_failure_is_a_single_error_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let (phase, events) = run_to_end(&relay(&server.uri())).await;
        assert_eq!(phase, RelayPhase::Failed);
        assert_eq!(
            events,
            vec![StreamEvent::Error("Upstream API call failed (503)".into())]
        );
    }

    #[tokio::test]
    async fn in_band_error_fails_mid_stream() {
        let body = format!("{}data: {{\"error\":{{\"message\":\"quota\"}}}}\n\n{}", delta("a"), delta("b"));
        let server = upstream_with_body(body).await;

        let (phase, events) = run_to_end(&relay(&server.uri())).await;
        assert_eq!(phase, RelayPhase::Failed);
        assert_eq!(
            events,
            vec![StreamEvent::Content("a".into()), StreamEvent::Error("quota".into())]
        );
    }

    #[tokio::test]
    async fn silent_upstream_hits_idle_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(delta("late").into_bytes(), "text/event-stream")
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let relay = relay(&server.uri()).with_idle_timeout(Duration::from_millis(50));
        let (phase, events) = run_to_end(&relay).await;
        assert_eq!(phase, RelayPhase::Failed);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Error(m) if m.contains("sent nothing")));
    }

    #[tokio::test]
    async fn cancellation_before_request_reports_once() {
        let relay = relay("http://127.0.0.1:9");
        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let phase = relay.run(vec![PromptTurn::new(MessageRole::User, "x")], tx, cancel).await;
        assert_eq!(phase, RelayPhase::Failed);
        assert_eq!(rx.recv().await, Some(StreamEvent::Error("Generation cancelled".into())));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn spawned_relay_streams_to_receiver() {
        let server = upstream_with_body(format!("{}data: [DONE]\n\n", delta("Hi"))).await;
        let events: Vec<StreamEvent> = relay(&server.uri())
            .spawn(vec![PromptTurn::new(MessageRole::User, "x")], CancellationToken::new())
            .collect()
            .await;
        assert_eq!(events, vec![StreamEvent::Content("Hi".into()), StreamEvent::Done]);
    }

    #[tokio::test]
    async fn stall_after_first_delta_hits_idle_timeout() {
        let relay = relay("http://127.0.0.1:9").with_idle_timeout(Duration::from_millis(50));
        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut emitter = streaming_emitter(tx);

        let deltas = relay.forward(stalled_after("a"), &mut emitter, &CancellationToken::new()).await;
        assert_eq!(deltas, 1);
        assert_eq!(emitter.phase, RelayPhase::Failed);
        drop(emitter);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::Content("a".into()));
        assert!(matches!(&events[1], StreamEvent::Error(m) if m.contains("sent nothing")));
    }

    #[tokio::test]
    async fn dropped_receiver_mid_stream_closes_upstream() {
        let relay = relay("http://127.0.0.1:9");
        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut emitter = streaming_emitter(tx);
        let cancel = CancellationToken::new();

        let (_, first) = tokio::join!(relay.forward(stalled_after("a"), &mut emitter, &cancel), async move {
            let first = rx.recv().await;
            drop(rx);
            first
        });
        assert_eq!(first, Some(StreamEvent::Content("a".into())));
        assert_eq!(emitter.phase, RelayPhase::Failed);
        assert!(cancel.is_cancelled());
        // The relay is terminal, so nothing more goes out.
        assert!(emitter.tx.is_closed());
    }

    #[tokio::test]
    async fn cancellation_mid_stream_reports_once() {
        let relay = relay("http://127.0.0.1:9");
        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut emitter = streaming_emitter(tx);
        let cancel = CancellationToken::new();

        let (_, first) = tokio::join!(relay.forward(stalled_after("a"), &mut emitter, &cancel), async {
            let first = rx.recv().await;
            cancel.cancel();
            first
        });
        assert_eq!(first, Some(StreamEvent::Content("a".into())));
        assert_eq!(emitter.phase, RelayPhase::Failed);

        // The terminal event is final even if the emitter is asked again.
        emitter.complete().await;
        drop(emitter);
        assert_eq!(rx.recv().await, Some(StreamEvent::Error("Generation cancelled".into())));
        assert_eq!(rx.recv().await, None);
    }
}
