use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::corpus_snapshot::CorpusSnapshot},
};

use crate::{
    indexer::SurrealCorpusIndexer,
    loader::{FileAlbumLoader, LoadedAlbum},
};

/// The collaborators a load run calls out to.
#[async_trait]
pub trait LoadServices: Send + Sync {
    async fn load_album(&self, album: &Path) -> Result<LoadedAlbum, AppError>;

    async fn build_index(&self) -> Result<CorpusSnapshot, AppError>;
}

pub struct DefaultLoadServices {
    loader: FileAlbumLoader,
    indexer: SurrealCorpusIndexer,
}

impl DefaultLoadServices {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self {
            loader: FileAlbumLoader::new(Arc::clone(&db)),
            indexer: SurrealCorpusIndexer::new(db),
        }
    }
}

#[async_trait]
impl LoadServices for DefaultLoadServices {
    async fn load_album(&self, album: &Path) -> Result<LoadedAlbum, AppError> {
        self.loader.load_album(album).await
    }

    async fn build_index(&self) -> Result<CorpusSnapshot, AppError> {
        self.indexer.build_index().await
    }
}
