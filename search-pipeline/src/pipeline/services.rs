use std::sync::Arc;

use async_trait::async_trait;
use common::{
    coordination::CoordinationStore,
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{artifact::Artifact, search::Search},
    },
    utils::config::AppConfig,
};

use crate::{
    cleanup::SearchCleaner, delivery::ArtifactPublisher, engine::SurrealSearchEngine,
    render::ArtifactRenderer,
};

/// The collaborators a search run calls out to.
#[async_trait]
pub trait SearchServices: Send + Sync {
    async fn run_search(&self, query: &str) -> Result<Search, AppError>;

    /// `None` when the search has nothing to render.
    async fn create_artifact(
        &self,
        search_id: &str,
        format: &str,
    ) -> Result<Option<Artifact>, AppError>;

    async fn deliver_artifact(&self, artifact_id: &str) -> Result<Artifact, AppError>;

    /// Removes the search, its artifacts and their files. Returns the number
    /// of artifacts removed.
    async fn delete_search(&self, search_id: &str) -> Result<usize, AppError>;
}

pub struct DefaultSearchServices {
    db: Arc<SurrealDbClient>,
    engine: SurrealSearchEngine,
    renderer: ArtifactRenderer,
    publisher: ArtifactPublisher,
    cleaner: SearchCleaner,
}

impl DefaultSearchServices {
    pub fn new(
        db: Arc<SurrealDbClient>,
        coordination: Arc<dyn CoordinationStore>,
        working: StorageManager,
        publish: StorageManager,
        config: &AppConfig,
    ) -> Self {
        Self {
            engine: SurrealSearchEngine::new(Arc::clone(&db)),
            renderer: ArtifactRenderer::new(
                Arc::clone(&db),
                working.clone(),
                coordination,
                &config.batch_name,
                config.public_base(),
            ),
            publisher: ArtifactPublisher::new(
                Arc::clone(&db),
                working.clone(),
                publish.clone(),
                config.delivery_retries,
            ),
            cleaner: SearchCleaner::new(Arc::clone(&db), working, publish),
            db,
        }
    }
}

#[async_trait]
impl SearchServices for DefaultSearchServices {
    async fn run_search(&self, query: &str) -> Result<Search, AppError> {
        self.engine.run_search(query).await
    }

    async fn create_artifact(
        &self,
        search_id: &str,
        format: &str,
    ) -> Result<Option<Artifact>, AppError> {
        let search: Search = self
            .db
            .get_item(search_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("search {search_id}")))?;
        self.renderer.create_artifact(&search, format).await
    }

    async fn deliver_artifact(&self, artifact_id: &str) -> Result<Artifact, AppError> {
        self.publisher.deliver(artifact_id).await
    }

    async fn delete_search(&self, search_id: &str) -> Result<usize, AppError> {
        self.cleaner.delete_search(search_id).await
    }
}
