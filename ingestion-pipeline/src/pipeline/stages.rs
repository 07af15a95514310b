use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use common::{
    coordination::LockGuard,
    error::AppError,
    jobs::{ErrorCallback, JobTask, TaskValue},
};
use serde_json::json;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{info, warn};

use super::services::LoadServices;

pub const LOAD_ALBUM_TASK: &str = "load_album";
pub const INDEX_CORPUS_TASK: &str = "index_corpus";
pub const RELEASE_LOCK_TASK: &str = "release_lock";

/// Extra release attempts after the first one fails.
const RELEASE_RETRIES: usize = 3;

async fn release_with_retry(lock: &LockGuard) -> Result<(), AppError> {
    let strategy = ExponentialBackoff::from_millis(10)
        .map(jitter)
        .take(RELEASE_RETRIES);
    let mut attempt = 0_usize;
    Retry::spawn(strategy, || {
        attempt += 1;
        let current = attempt;
        async move {
            lock.release().await.map_err(|err| {
                warn!(attempt = current, error = %err, "ingestion lock release failed");
                err
            })
        }
    })
    .await
}

/// Fan-out member: loads one album.
pub struct LoadAlbumTask {
    pub services: Arc<dyn LoadServices>,
    pub album: PathBuf,
}

#[async_trait]
impl JobTask for LoadAlbumTask {
    fn name(&self) -> &str {
        LOAD_ALBUM_TASK
    }

    #[tracing::instrument(skip_all, fields(album = %self.album.display()))]
    async fn run(&self, _input: TaskValue) -> Result<TaskValue, AppError> {
        let loaded = self
            .services
            .load_album(&self.album)
            .await
            .map_err(|err| {
                AppError::LoadTaskFailure(format!("{}: {err}", self.album.display()))
            })?;
        info!(album = %loaded.album, documents = loaded.documents, "album loaded");
        Ok(serde_json::to_value(loaded)?)
    }
}

/// Join stage: runs once every album loaded.
pub struct IndexCorpusTask {
    pub services: Arc<dyn LoadServices>,
}

#[async_trait]
impl JobTask for IndexCorpusTask {
    fn name(&self) -> &str {
        INDEX_CORPUS_TASK
    }

    #[tracing::instrument(skip_all)]
    async fn run(&self, input: TaskValue) -> Result<TaskValue, AppError> {
        let albums = input.as_array().map_or(0, Vec::len);
        let snapshot = self
            .services
            .build_index()
            .await
            .map_err(|err| AppError::IndexTaskFailure(err.to_string()))?;
        info!(albums, corpus_id = %snapshot.id, "corpus indexed");
        Ok(json!({
            "corpus_id": snapshot.id,
            "checksum": snapshot.checksum,
            "document_count": snapshot.document_count,
        }))
    }
}

/// Last step of a successful run. Passes its input through.
pub struct ReleaseLockTask {
    pub lock: LockGuard,
}

#[async_trait]
impl JobTask for ReleaseLockTask {
    fn name(&self) -> &str {
        RELEASE_LOCK_TASK
    }

    async fn run(&self, input: TaskValue) -> Result<TaskValue, AppError> {
        release_with_retry(&self.lock).await?;
        Ok(input)
    }
}

/// Releases the ingestion lock when the task it is attached to fails.
pub struct ReleaseLockOnError {
    pub lock: LockGuard,
}

#[async_trait]
impl ErrorCallback for ReleaseLockOnError {
    async fn on_error(&self, task_name: &str, error: &AppError) {
        warn!(task = task_name, error = %error, "load run failed, releasing lock");
        if let Err(err) = release_with_retry(&self.lock).await {
            warn!(task = task_name, error = %err, "could not release ingestion lock");
        }
    }
}
