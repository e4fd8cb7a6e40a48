use std::io;

use thiserror::Error;

/// TaskPool Error
#[derive(Error, Debug)]
pub enum PoolError {
    /// A pool needs at least one worker
    #[error("concurrency must be a positive number")]
    InvalidConcurrency,
    /// `start` was called on a pool that already ran
    #[error("task pool has already been started")]
    AlreadyStarted,
    /// IO Error
    #[error("{0}")]
    Io(#[from] io::Error),
    /// Serialization or deserialization error.
    #[error("{0}")]
    Serde(#[from] serde_json::Error),
    /// Error with a plain message
    #[error("{0}")]
    StringError(String),
}

/// TaskPool Error Result
pub type Result<T> = std::result::Result<T, PoolError>;
