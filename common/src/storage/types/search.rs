use std::collections::HashSet;

use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SearchStatus {
    #[default]
    Pending,
    Success,
    Failure,
}

stored_object!(Search, "search", {
    query: String,
    corpus_id: Option<String>,
    document_ids: Vec<String>,
    status: SearchStatus
});

impl Search {
    pub fn new(query: &str, corpus_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            query: query.to_string(),
            corpus_id,
            document_ids: Vec::new(),
            status: SearchStatus::Pending,
        }
    }

    /// Adds a matching document, ignoring repeats.
    pub fn add_document(&mut self, document_id: &str) -> bool {
        if self.document_ids.iter().any(|id| id == document_id) {
            tracing::warn!(search_id = %self.id, document_id, "document already in results");
            return false;
        }
        self.document_ids.push(document_id.to_string());
        true
    }

    /// Appends matches in order, skipping ids already present. Returns how
    /// many were added.
    pub fn extend_documents<'a, I>(&mut self, document_ids: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen: HashSet<String> = self.document_ids.iter().cloned().collect();
        let before = self.document_ids.len();
        for document_id in document_ids {
            if seen.insert(document_id.to_string()) {
                self.document_ids.push(document_id.to_string());
            } else {
                tracing::warn!(search_id = %self.id, document_id, "document already in results");
            }
        }
        self.document_ids.len().saturating_sub(before)
    }

    pub fn result_count(&self) -> usize {
        self.document_ids.len()
    }

    /// Persists the results gathered so far and marks the search finished.
    pub async fn complete(mut self, db: &SurrealDbClient) -> Result<Self, AppError> {
        self.status = SearchStatus::Success;
        self.updated_at = Utc::now();
        db.upsert_item(self.clone()).await?;
        Ok(self)
    }

    pub async fn mark_failed(mut self, db: &SurrealDbClient) -> Result<Self, AppError> {
        self.status = SearchStatus::Failure;
        self.updated_at = Utc::now();
        db.upsert_item(self.clone()).await?;
        Ok(self)
    }
}
