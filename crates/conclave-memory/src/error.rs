use thiserror::Error;

use conclave_core::error::ErrorCode;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Vector not found: {id}")]
    NotFound { id: String },

    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Embedding provider error: {0}")]
    Embedding(String),

    #[error("Conflict resolution failed: {0}")]
    Conflict(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Store shut down")]
    ShutDown,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemoryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            MemoryError::NotFound { .. } => ErrorCode::InputValidationFailed,
            MemoryError::DimensionMismatch { .. } => ErrorCode::MemoryCorrupted,
            MemoryError::Embedding(_) => ErrorCode::ProviderUnavailable,
            MemoryError::Conflict(_) => ErrorCode::MemoryConflict,
            MemoryError::Persistence(_) => ErrorCode::MemoryCorrupted,
            MemoryError::ShutDown => ErrorCode::SystemInternal,
            MemoryError::Serialization(_) => ErrorCode::SystemInternal,
            MemoryError::Io(_) => ErrorCode::SystemInternal,
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
