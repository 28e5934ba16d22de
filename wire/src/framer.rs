use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::debug;

use crate::event::StreamEvent;

/// Field prefix of a payload-carrying line.
pub const DATA_PREFIX: &str = "data:";
/// Payload that ends a stream successfully.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Interprets one complete event payload.
///
/// `Err` marks a malformed payload, which the framer drops. `Ok(None)` means
/// the payload was valid but carries nothing worth emitting (an empty delta,
/// a role-only chunk).
pub trait PayloadFormat {
    fn decode(&self, payload: &str) -> Result<Option<StreamEvent>, serde_json::Error>;
}

/// Incremental parser for `data:` framed event streams.
///
/// Input fragments may be split anywhere, including inside a multi-byte
/// character, inside the `data: ` prefix, or inside a payload. Complete lines
/// are consumed as they arrive; the incomplete trailing line waits for more
/// input. After a terminal event the framer ignores everything it is fed.
#[derive(Debug)]
pub struct ChunkFramer<F> {
    format: F,
    line: String,
    utf8_tail: Vec<u8>,
    data: Vec<String>,
    terminated: bool,
}

impl<F: PayloadFormat> ChunkFramer<F> {
    pub fn new(format: F) -> Self {
        Self {
            format,
            line: String::new(),
            utf8_tail: Vec::new(),
            data: Vec::new(),
            terminated: false,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Feed raw bytes; an incomplete UTF-8 sequence at the end is held back
    /// until the next call.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        if self.terminated {
            return Vec::new();
        }
        self.utf8_tail.extend_from_slice(bytes);
        let text = self.take_decoded();
        self.push(&text)
    }

    /// Feed a text fragment and collect every event it completes.
    pub fn push(&mut self, fragment: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.terminated {
            return events;
        }
        self.line.push_str(fragment);

        while let Some(end) = self.line.find('\n') {
            let raw: String = self.line.drain(..=end).collect();
            let line = raw.trim_end_matches(|c: char| c == '\n' || c == '\r');
            if let Some(event) = self.feed_line(line) {
                let terminal = event.is_terminal();
                events.push(event);
                if terminal {
                    self.terminate();
                    break;
                }
            }
        }
        events
    }

    /// Signal end of input. Whatever is buffered is treated as a complete
    /// event; nothing is emitted afterwards.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.terminated {
            return events;
        }
        if !self.utf8_tail.is_empty() {
            let rest = String::from_utf8_lossy(&self.utf8_tail).into_owned();
            self.utf8_tail.clear();
            self.line.push_str(&rest);
        }
        let last = std::mem::take(&mut self.line);
        let last = last.trim_end_matches('\r');
        if !last.is_empty() {
            events.extend(self.feed_line(last));
        }
        events.extend(self.dispatch());
        self.terminate();
        events
    }

    fn terminate(&mut self) {
        self.terminated = true;
        self.line.clear();
        self.utf8_tail.clear();
        self.data.clear();
    }

    fn feed_line(&mut self, line: &str) -> Option<StreamEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if let Some(payload) = line.strip_prefix(DATA_PREFIX) {
            let payload = payload.strip_prefix(' ').unwrap_or(payload);
            self.data.push(payload.to_string());
        }
        // Comments (`: keep-alive`) and other fields carry nothing for us.
        None
    }

    fn dispatch(&mut self) -> Option<StreamEvent> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();

        if payload.trim() == DONE_SENTINEL {
            return Some(StreamEvent::Done);
        }
        match self.format.decode(&payload) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, payload_len = payload.len(), "dropping malformed payload");
                None
            }
        }
    }

    fn take_decoded(&mut self) -> String {
        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.utf8_tail) {
                Ok(s) => {
                    text.push_str(s);
                    self.utf8_tail.clear();
                    return text;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.utf8_tail[..valid]));
                    match e.error_len() {
                        None => {
                            self.utf8_tail.drain(..valid);
                            return text;
                        }
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.utf8_tail.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }
}

/// Lazily frames a byte stream into events.
///
/// The inner stream is dropped as soon as a terminal event is produced or a
/// transport error surfaces, which closes the underlying connection.
pub struct FramedEvents<S, F> {
    inner: Option<S>,
    framer: ChunkFramer<F>,
    pending: VecDeque<StreamEvent>,
}

impl<S, F: PayloadFormat> FramedEvents<S, F> {
    pub fn new(inner: S, format: F) -> Self {
        Self {
            inner: Some(inner),
            framer: ChunkFramer::new(format),
            pending: VecDeque::new(),
        }
    }
}

impl<S, E, F> Stream for FramedEvents<S, F>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    F: PayloadFormat + Unpin,
{
    type Item = Result<StreamEvent, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if this.framer.is_terminated() {
                this.inner = None;
                return Poll::Ready(None);
            }
            let Some(inner) = this.inner.as_mut() else {
                return Poll::Ready(None);
            };
            match inner.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(chunk))) => {
                    this.pending.extend(this.framer.push_bytes(&chunk));
                }
                Poll::Ready(Some(Err(e))) => {
                    this.inner = None;
                    this.framer.terminate();
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.inner = None;
                    this.pending.extend(this.framer.finish());
                }
            }
        }
    }
}
