//! Error types for the conversation cache.

use thiserror::Error;

/// Errors surfaced by [`crate::cache::ConversationCache`] implementations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Transaction begin/commit or other embedded-store failure.
    #[error("storage error: {0}")]
    Storage(redb::Error),

    /// The configured namespace (table) has not been created.
    #[error("namespace `{0}` does not exist")]
    MissingNamespace(String),

    /// Networked store connection or command failure.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("failed to encode cache entry: {0}")]
    Encode(#[from] serde_json::Error),

    /// Static configuration that must abort startup.
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),

    /// A blocking storage task panicked or was cancelled.
    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<redb::Error> for CacheError {
    fn from(e: redb::Error) -> Self {
        match e {
            redb::Error::TableDoesNotExist(name) => CacheError::MissingNamespace(name),
            other => CacheError::Storage(other),
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
