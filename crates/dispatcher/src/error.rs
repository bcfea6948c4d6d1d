//! Dispatcher error types

use std::path::Path;

use contracts::ContractError;
use thiserror::Error;

/// Archive / ledger I/O errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload that does not match its declared shape
    #[error("invalid payload: {0}")]
    Payload(#[from] ingestion::IngestionError),

    /// Malformed `.npy` member or archive layout
    #[error("invalid archive content: {message}")]
    Format { message: String },

    /// Background serialization task panicked or was cancelled
    #[error("archive task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl DispatcherError {
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
        }
    }

    pub fn into_archive_error(self, path: &Path) -> ContractError {
        ContractError::archive_write(path.display().to_string(), self.to_string())
    }

    pub fn into_ledger_error(self, path: &Path) -> ContractError {
        ContractError::ledger_write(path.display().to_string(), self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DispatcherError>;
