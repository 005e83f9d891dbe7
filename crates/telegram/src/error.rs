use {skillbox_dispatch::DispatchError, std::path::PathBuf, thiserror::Error};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Telegram not configured: set telegram.token in skillbox.toml or TELEGRAM_BOT_TOKEN")]
    NotConfigured,

    #[error("invalid telegram.api_url '{url}': {reason}")]
    InvalidApiUrl { url: String, reason: String },

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// teloxide pins its own reqwest, so the builder error is kept as text.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
