use std::sync::Arc;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient, indexes::rebuild_document_text_index,
        types::corpus_snapshot::CorpusSnapshot,
    },
};
use tracing::info;

/// Rebuilds the full-text index over stored documents and records a corpus
/// snapshot of what was indexed.
pub struct SurrealCorpusIndexer {
    db: Arc<SurrealDbClient>,
}

impl SurrealCorpusIndexer {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }

    #[tracing::instrument(skip_all)]
    pub async fn build_index(&self) -> Result<CorpusSnapshot, AppError> {
        rebuild_document_text_index(&self.db).await?;
        let snapshot = CorpusSnapshot::create(&self.db).await?;
        info!(
            corpus_id = %snapshot.id,
            checksum = %snapshot.checksum,
            documents = snapshot.document_count,
            "corpus snapshot created"
        );
        Ok(snapshot)
    }
}
