//! Client side of the chat relay: reads the relay's event stream and keeps
//! the conversation view in step with the server's storage.

pub mod api;
pub mod collaborators;
pub mod error;
pub mod models;
pub mod state;
pub mod stream;

pub use api::{ApiClient, ClientConfig};
pub use collaborators::{ByteStream, PersistenceCoordinator, StreamTransport, TitleSuggester};
pub use error::{ClientError, ValidationError};
pub use models::{Conversation, Message, MessageId, Role};
pub use state::{ConversationController, ConversationPhase, InitToken};
pub use stream::ClientStreamConsumer;
