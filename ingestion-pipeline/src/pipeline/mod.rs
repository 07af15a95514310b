mod services;
mod stages;

#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultLoadServices, LoadServices};
pub use stages::{INDEX_CORPUS_TASK, LOAD_ALBUM_TASK, RELEASE_LOCK_TASK};

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use common::{
    coordination::LockGuard,
    error::AppError,
    jobs::{chain, chord, JobHandle, Scheduler, TaskNode, TaskValue},
};
use tracing::info;

use self::stages::{IndexCorpusTask, LoadAlbumTask, ReleaseLockOnError, ReleaseLockTask};

/// Bulk ingestion: one load task per album, joined by an indexing step,
/// guarded by the ingestion lock.
#[allow(clippy::module_name_repetitions)]
pub struct LoadPipeline {
    lock: LockGuard,
    scheduler: Scheduler,
    services: Arc<dyn LoadServices>,
}

impl LoadPipeline {
    pub fn new(lock: LockGuard, scheduler: Scheduler, services: Arc<dyn LoadServices>) -> Self {
        Self {
            lock,
            scheduler,
            services,
        }
    }

    /// Validates `path`, takes the ingestion lock and submits the load job.
    ///
    /// Fails synchronously with `InvalidPath`, `NoAlbums` or `AlreadyRunning`;
    /// in the first two cases the lock is never touched. Everything after
    /// submission is reported through the returned handle.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub async fn start(&self, path: &Path) -> Result<JobHandle, AppError> {
        let albums = list_albums(path).await?;
        self.lock.acquire().await?;

        let release_on_error: Arc<ReleaseLockOnError> = Arc::new(ReleaseLockOnError {
            lock: self.lock.clone(),
        });

        let loads = albums.iter().map(|album| {
            TaskNode::new(Arc::new(LoadAlbumTask {
                services: Arc::clone(&self.services),
                album: album.clone(),
            }))
            .on_error(release_on_error.clone())
        });
        let join = chain([
            TaskNode::new(Arc::new(IndexCorpusTask {
                services: Arc::clone(&self.services),
            }))
            .on_error(release_on_error.clone()),
            TaskNode::new(Arc::new(ReleaseLockTask {
                lock: self.lock.clone(),
            }))
            .on_error(release_on_error.clone()),
        ]);

        let handle = self
            .scheduler
            .submit("load", chord(loads, join), TaskValue::Null);
        info!(job_id = %handle.id(), albums = albums.len(), "load job submitted");
        Ok(handle)
    }
}

/// Immediate subdirectories of `path`, sorted by name.
pub async fn list_albums(path: &Path) -> Result<Vec<PathBuf>, AppError> {
    let is_dir = tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false);
    if !is_dir {
        return Err(AppError::InvalidPath(path.to_path_buf()));
    }

    let mut entries = tokio::fs::read_dir(path).await?;
    let mut albums = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            albums.push(entry.path());
        }
    }
    if albums.is_empty() {
        return Err(AppError::NoAlbums(path.to_path_buf()));
    }

    albums.sort();
    Ok(albums)
}
