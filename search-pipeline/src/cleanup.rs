use std::sync::Arc;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{artifact::Artifact, search::Search},
    },
};
use tracing::{debug, info};

/// Removes a search together with its artifacts and their files in both
/// stores.
pub struct SearchCleaner {
    db: Arc<SurrealDbClient>,
    working: StorageManager,
    publish: StorageManager,
}

impl SearchCleaner {
    pub fn new(db: Arc<SurrealDbClient>, working: StorageManager, publish: StorageManager) -> Self {
        Self {
            db,
            working,
            publish,
        }
    }

    /// Returns how many artifacts were removed along with the search.
    #[tracing::instrument(skip_all, fields(search_id = %search_id))]
    pub async fn delete_search(&self, search_id: &str) -> Result<usize, AppError> {
        let search: Search = self
            .db
            .get_item(search_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("search {search_id}")))?;

        let artifacts = Artifact::get_for_search(&search.id, &self.db).await?;
        for artifact in &artifacts {
            let working = self.working.delete_if_exists(&artifact.path).await?;
            let published = self.publish.delete_if_exists(&artifact.path).await?;
            debug!(artifact_id = %artifact.id, working, published, "artifact files removed");
            self.db.delete_item::<Artifact>(&artifact.id).await?;
        }
        self.db.delete_item::<Search>(&search.id).await?;

        info!(query = %search.query, artifacts = artifacts.len(), "search deleted");
        Ok(artifacts.len())
    }
}
