use thiserror::Error;

pub type Result<T> = std::result::Result<T, EfesError>;

#[derive(Error, Debug)]
pub enum EfesError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server fault ({status}): {body}")]
    ServerFault { status: u16, body: String },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for EfesError {
    fn from(err: reqwest::Error) -> Self {
        EfesError::Transport(err.to_string())
    }
}
