use std::path::PathBuf;

use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Ingestion already running")]
    AlreadyRunning,
    #[error("Bad path: {}", .0.display())]
    InvalidPath(PathBuf),
    #[error("No albums in path: {}", .0.display())]
    NoAlbums(PathBuf),
    #[error("Load task failed: {0}")]
    LoadTaskFailure(String),
    #[error("Index task failed: {0}")]
    IndexTaskFailure(String),
    #[error("Search task failed: {0}")]
    SearchTaskFailure(String),
    #[error("Delivery failed: {0}")]
    DeliveryFailure(String),
    #[error("Task cancelled: {0}")]
    Cancelled(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Processing error: {0}")]
    Processing(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Errors returned synchronously by an orchestration call, before any
    /// task is dispatched or the ingestion lock is touched.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            AppError::AlreadyRunning | AppError::InvalidPath(_) | AppError::NoAlbums(_)
        )
    }
}
