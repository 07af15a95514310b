use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::document::Document;

stored_object!(CorpusSnapshot, "corpus_snapshot", {
    checksum: String,
    hash_color: String,
    document_count: usize,
    document_ids: Vec<String>
});

impl CorpusSnapshot {
    /// Snapshot of `documents` in the order given. The checksum covers every
    /// id and text, so any edit to the corpus yields a new checksum.
    pub fn from_documents(documents: &[Document]) -> Self {
        let mut hasher = Sha256::new();
        for doc in documents {
            hasher.update(doc.id.as_bytes());
            hasher.update(doc.text.as_bytes());
        }
        let checksum = format!("{:x}", hasher.finalize());
        let now = Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            hash_color: hash_color(&checksum),
            checksum,
            document_count: documents.len(),
            document_ids: documents.iter().map(|doc| doc.id.clone()).collect(),
        }
    }

    /// Snapshots every stored document and persists the snapshot.
    pub async fn create(db: &SurrealDbClient) -> Result<Self, AppError> {
        let documents = Document::get_all_ordered(db).await?;
        let snapshot = Self::from_documents(&documents);
        db.store_item(snapshot.clone()).await?;
        Ok(snapshot)
    }

    pub async fn get_latest(db: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        let mut result = db
            .client
            .query(format!(
                "SELECT * FROM {} ORDER BY created_at DESC LIMIT 1",
                Self::table_name()
            ))
            .await?;
        let latest: Vec<Self> = result.take(0)?;
        Ok(latest.into_iter().next())
    }
}

/// Display color derived from a checksum: `#` plus its first six hex digits.
pub fn hash_color(checksum: &str) -> String {
    format!("#{}", checksum.chars().take(6).collect::<String>())
}
