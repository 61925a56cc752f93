use thiserror::Error;

/// Handshake failures. The one class of error that terminates the
/// connection: a connection that cannot authenticate never reaches the
/// event loop.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("no bearer credential supplied in handshake")]
    MissingCredential,
    #[error("invalid or expired credential")]
    InvalidCredential,
}

/// Failures raised by the persistence collaborators (message store,
/// quota gate, block registry, presence tracker).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
    #[error("persistence failure: {0}")]
    Persistence(String),
}

/// Everything that can stop the send pipeline. Each variant maps to a
/// `message:error` event delivered only to the originating connection.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("message quota exceeded")]
    QuotaExceeded { remaining: i64 },
    #[error("messaging is blocked between these users")]
    Blocked,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("message rejected by content analysis")]
    ContentBlocked {
        risk_score: u8,
        risk_flags: Vec<String>,
    },
    #[error("failed to persist message: {0}")]
    Persistence(String),
}

impl From<StoreError> for SendError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(msg) => SendError::Validation(msg),
            StoreError::NotFound => SendError::Persistence("record not found".into()),
            StoreError::Persistence(msg) => SendError::Persistence(msg),
        }
    }
}
