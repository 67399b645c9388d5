//! Error types for the persistence layer.

/// Errors raised by a [`SessionLog`](crate::SessionLog) implementation.
///
/// None of these are fatal to a room. The journal logs them and retries the
/// write before the next one.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A previous holder of the connection lock panicked.
    #[error("database connection lock poisoned")]
    Poisoned,

    #[error("session not found: {0}")]
    SessionNotFound(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
