use thiserror::Error;

use crate::ai::AiError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Ai(#[from] AiError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("{context} ({status}): {body}")]
    Drive {
        context: &'static str,
        status: u16,
        body: String,
    },

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    InvalidDocument(String),

    /// The invoice action finished with a user-facing failure message.
    #[error("{0}")]
    Processing(String),
}

pub type Result<T> = std::result::Result<T, Error>;
