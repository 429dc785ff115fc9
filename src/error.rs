//! Error types for the chat client

use thiserror::Error;

/// Errors raised by the chat backend client and the session manager
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Failed to decode backend response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Not authorized")]
    Unauthorized,

    #[error("Message '{0}' cannot be rated")]
    NotRatable(String),

    #[error("Unknown message '{0}'")]
    UnknownMessage(String),

    #[error("No active chat session")]
    NoSession,

    #[error("Session feedback is not being offered")]
    FeedbackNotOffered,

    #[error("Rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),

    #[error("Invalid {kind}: '{value}'")]
    InvalidOption { kind: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, ChatError>;
