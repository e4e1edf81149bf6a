//! Error types for the backup engine.
//!
//! A failed collection is never an error: it is recorded in the result
//! structures. Only setup-level failures travel through `BackupError`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Backup not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Catastrophic backup failure: {0}")]
    Catastrophic(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl BackupError {
    pub fn is_not_found(&self) -> bool {
        match self {
            BackupError::NotFound(_) => true,
            BackupError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for BackupError {
    fn from(e: tokio::task::JoinError) -> Self {
        BackupError::Storage(format!("background task failed: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
