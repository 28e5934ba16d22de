use thiserror::Error;

/// Rejections raised before anything touches the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Choose an assistant role before sending")]
    NoRoleSelected,

    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("A reply is still being generated for this conversation")]
    StreamInFlight,

    #[error("Messages for this conversation are still loading")]
    ConversationLoading,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The request could not be made, or the server refused to start it.
    #[error("Request failed: {0}")]
    Transport(String),

    /// Generation failed after the stream opened. `partial` holds the text
    /// received before the failure.
    #[error("Generation failed: {message}")]
    Upstream { message: String, partial: String },

    #[error("Could not save: {0}")]
    Persistence(String),

    #[error("Generation stopped")]
    Cancelled { partial: String },

    #[error("Unreadable server response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Whether the caller should leave the user's input in place.
    pub fn keep_input(&self) -> bool {
        matches!(self, ClientError::Validation(_))
    }

    /// Text generated before a failed or stopped stream ended.
    pub fn partial(&self) -> Option<&str> {
        match self {
            ClientError::Upstream { partial, .. } | ClientError::Cancelled { partial } => {
                Some(partial.as_str())
            }
            _ => None,
        }
    }
}
