use std::sync::Arc;

use tracing::{info, warn};

use super::{CoordinationStore, INGESTION_FLAG_KEY};
use crate::error::AppError;

/// Process-wide ingestion flag. At most one ingestion run holds it.
#[derive(Clone)]
pub struct LockGuard {
    store: Arc<dyn CoordinationStore>,
    key: String,
}

impl LockGuard {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self::with_key(store, INGESTION_FLAG_KEY)
    }

    pub fn with_key(store: Arc<dyn CoordinationStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn acquire(&self) -> Result<(), AppError> {
        if self.store.compare_and_set_flag(&self.key, false, true).await? {
            info!(lock = %self.key, "ingestion lock acquired");
            Ok(())
        } else {
            warn!(lock = %self.key, "ingestion lock already held");
            Err(AppError::AlreadyRunning)
        }
    }

    /// Clears the flag. Safe to call repeatedly or without a prior acquire.
    pub async fn release(&self) -> Result<(), AppError> {
        self.store.set_flag(&self.key, false).await?;
        info!(lock = %self.key, "ingestion lock released");
        Ok(())
    }

    pub async fn is_held(&self) -> Result<bool, AppError> {
        self.store.get_flag(&self.key).await
    }
}
