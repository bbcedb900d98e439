//! Storage error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid file name: {0}")]
    InvalidName(String),

    #[error("Unknown or expired lease: {0}")]
    UnknownLease(String),
}

impl StorageError {
    /// True when the caller should see "not found" rather than a server fault
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::NotFound(_) | StorageError::InvalidName(_) | StorageError::UnknownLease(_)
        )
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
