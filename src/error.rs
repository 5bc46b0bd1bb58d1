use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Block not found at height {0}")]
    NotFound(u64),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Chain not initialized: call initialize() first")]
    NotInitialized,
}

impl ChainError {
    /// Whether this is a failure of the underlying store rather than of its contents.
    pub fn is_persistence(&self) -> bool {
        matches!(self, ChainError::Io(_) | ChainError::Persistence(_))
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;
