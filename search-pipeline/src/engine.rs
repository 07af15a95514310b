use std::sync::Arc;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{corpus_snapshot::CorpusSnapshot, document::Document, search::Search, StoredObject},
    },
};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: String,
    album: String,
    album_index: u32,
}

/// Full-text search over document text, backed by the BM25 index the corpus
/// indexer maintains.
pub struct SurrealSearchEngine {
    db: Arc<SurrealDbClient>,
}

impl SurrealSearchEngine {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }

    /// Runs `query`, tags the search with the latest corpus snapshot and
    /// stores the matches in album order.
    #[tracing::instrument(skip_all, fields(query = %query))]
    pub async fn run_search(&self, query: &str) -> Result<Search, AppError> {
        let corpus = CorpusSnapshot::get_latest(&self.db).await?;
        let mut search = Search::new(query, corpus.map(|snapshot| snapshot.id));
        self.db.store_item(search.clone()).await?;

        let hits = match self.matching_documents(query).await {
            Ok(hits) => hits,
            Err(err) => {
                search.mark_failed(&self.db).await?;
                return Err(err);
            }
        };
        search.extend_documents(hits.iter().map(|hit| hit.id.as_str()));

        let search = search.complete(&self.db).await?;
        info!(search_id = %search.id, results = search.result_count(), "search finished");
        Ok(search)
    }

    async fn matching_documents(&self, query: &str) -> Result<Vec<SearchHit>, AppError> {
        let mut result = self
            .db
            .client
            .query(format!(
                "SELECT meta::id(id) AS id, album, album_index FROM {} WHERE text @@ $query",
                Document::table_name()
            ))
            .bind(("query", query.to_string()))
            .await?;
        let mut hits: Vec<SearchHit> = result.take(0)?;
        hits.sort_by(|a, b| (&a.album, a.album_index).cmp(&(&b.album, b.album_index)));
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use common::storage::{indexes::rebuild_document_text_index, types::search::SearchStatus};
    use uuid::Uuid;

    use super::*;

    async fn seeded_db() -> Arc<SurrealDbClient> {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        let docs = [
            ("1990-02", 1, "A letter about the harvest"),
            ("1990-01", 2, "Harvest festival photographs"),
            ("1990-01", 1, "Nothing relevant here"),
        ];
        for (album, index, text) in docs {
            let path = PathBuf::from(format!(
                "/data/{album}/{index:06}_1990-01-01_00-00-00_scan.json"
            ));
            let doc = Document::from_path(&path, text.to_string()).expect("doc");
            db.upsert_item(doc).await.expect("store");
        }
        rebuild_document_text_index(&db).await.expect("index");
        CorpusSnapshot::create(&db).await.expect("snapshot");
        db
    }

    #[tokio::test]
    async fn matches_are_stored_in_album_order() {
        let db = seeded_db().await;
        let engine = SurrealSearchEngine::new(Arc::clone(&db));

        let search = engine.run_search("harvest").await.expect("search");
        assert_eq!(search.status, SearchStatus::Success);
        assert!(search.corpus_id.is_some());

        let docs = Document::get_by_ids(&search.document_ids, &db)
            .await
            .expect("docs");
        let albums: Vec<&str> = docs.iter().map(|d| d.album.as_str()).collect();
        assert_eq!(albums, vec!["1990-01", "1990-02"]);

        let stored: Search = db
            .get_item(&search.id)
            .await
            .expect("fetch")
            .expect("stored");
        assert_eq!(stored.document_ids, search.document_ids);
    }

    #[tokio::test]
    async fn no_matches_is_an_empty_success() {
        let db = seeded_db().await;
        let search = SurrealSearchEngine::new(db)
            .run_search("zeppelin")
            .await
            .expect("search");
        assert_eq!(search.status, SearchStatus::Success);
        assert_eq!(search.result_count(), 0);
    }
}
