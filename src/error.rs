use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TryOnError {
    #[error("Image synthesis failed: {0}")]
    Synthesis(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Image generation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),

    #[error("Image error: {0}")]
    Image(String),
}

impl TryOnError {
    /// The bare reason, without the variant prefix, for user-facing messages.
    pub fn reason(&self) -> String {
        match self {
            TryOnError::Synthesis(msg)
            | TryOnError::Storage(msg)
            | TryOnError::Config(msg)
            | TryOnError::Image(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

impl From<TryOnError> for String {
    fn from(err: TryOnError) -> Self {
        err.to_string()
    }
}

impl From<rusqlite::Error> for TryOnError {
    fn from(err: rusqlite::Error) -> Self {
        TryOnError::Storage(err.to_string())
    }
}

/// Turn an operation failure into the message shown to the user.
///
/// Upload format rejections get a fixed hint instead of the raw API text.
pub fn friendly_message(context: &str, err: &TryOnError) -> String {
    let reason = err.reason();
    if reason.contains("Unsupported MIME type") {
        return "File format not supported. Please upload an image format like PNG, JPEG, or WEBP."
            .to_string();
    }
    format!("{}. {}", context, reason)
}
