//! Wire protocol shared by the relay server and its clients.
//!
//! The server re-emits generation output as `data: <payload>` frames separated
//! by blank lines. [`ChunkFramer`] turns arbitrarily split fragments of such a
//! stream back into [`StreamEvent`]s; [`PayloadFormat`] decides how a single
//! payload is interpreted, so the same framer reads both the upstream
//! provider's chunks and the relay's own frames.

pub mod dto;
pub mod event;
pub mod framer;

pub use dto::{ChatReply, ChatRequest, ErrorBody, TitleRequest, TitleResponse};
pub use event::{RelayFormat, StreamEvent};
pub use framer::{ChunkFramer, FramedEvents, PayloadFormat, DATA_PREFIX, DONE_SENTINEL};
