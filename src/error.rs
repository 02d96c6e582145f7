use thiserror::Error;

/// Errors surfaced by a chat turn or at startup.
///
/// Malformed stream lines are not represented here: the decoder recovers
/// from them locally (see [`crate::model::stream::SkipReason`]).
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid generation settings: {0}")]
    InvalidSettings(String),

    #[error("prompt is empty")]
    EmptyPrompt,

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("turn cancelled")]
    Cancelled,
}

impl ChatError {
    /// Whether the error aborts the whole process rather than a single turn.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChatError::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
