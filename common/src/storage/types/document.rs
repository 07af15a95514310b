use std::{collections::HashMap, path::Path};

use chrono::NaiveDateTime;
use sha2::{Digest, Sha256};
use surrealdb::RecordId;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Document, "document", {
    album: String,
    album_index: u32,
    title: String,
    stem: String,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    scanned_at: DateTime<Utc>,
    text: String,
    source_path: String
});

/// Metadata encoded in a document file stem such as
/// `000001_2022-09-27_13-12-42_image_5992`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentStem {
    pub album_index: u32,
    pub scanned_at: DateTime<Utc>,
    pub title: String,
}

impl DocumentStem {
    pub fn parse(stem: &str) -> Result<Self, AppError> {
        let parts: Vec<&str> = stem.split('_').collect();
        let [index, date, time, title @ ..] = parts.as_slice() else {
            return Err(AppError::Validation(format!("Cannot parse filename '{stem}'")));
        };

        let album_index = index
            .parse::<u32>()
            .map_err(|_| AppError::Validation(format!("Bad album index in '{stem}'")))?;
        let scanned_at = NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H-%M-%S")
            .map_err(|_| AppError::Validation(format!("Cannot parse timestamp from '{stem}'")))?
            .and_utc();

        Ok(Self {
            album_index,
            scanned_at,
            title: title.join("_"),
        })
    }
}

impl Document {
    /// Stable id for a document, so loading the same album twice overwrites
    /// rather than duplicates.
    pub fn document_id(album: &str, stem: &str) -> String {
        let digest = Sha256::digest(format!("{album}/{stem}").as_bytes());
        format!("{digest:x}")
    }

    /// Builds a document from a metadata file path. Only the path is parsed;
    /// the caller supplies the text.
    pub fn from_path(path: &Path, text: String) -> Result<Self, AppError> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| AppError::Validation(format!("No file stem in {}", path.display())))?;
        let album = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Validation(format!("No album for {}", path.display())))?;

        let parsed = DocumentStem::parse(stem)?;
        let now = Utc::now();

        Ok(Self {
            id: Self::document_id(album, stem),
            created_at: now,
            updated_at: now,
            album: album.to_string(),
            album_index: parsed.album_index,
            title: parsed.title,
            stem: stem.to_string(),
            scanned_at: parsed.scanned_at,
            text,
            source_path: path.to_string_lossy().into_owned(),
        })
    }

    /// All documents in album order.
    pub async fn get_all_ordered(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut result = db
            .client
            .query(format!(
                "SELECT * FROM {} ORDER BY album ASC, album_index ASC",
                Self::table_name()
            ))
            .await?;
        let documents: Vec<Self> = result.take(0)?;
        Ok(documents)
    }

    /// Fetches documents by id, preserving the order of `ids` and skipping
    /// ids that no longer exist.
    pub async fn get_by_ids(ids: &[String], db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let record_ids: Vec<RecordId> = ids
            .iter()
            .map(|id| RecordId::from_table_key(Self::table_name(), id.as_str()))
            .collect();

        let mut result = db
            .client
            .query(format!("SELECT * FROM {} WHERE id INSIDE $ids", Self::table_name()))
            .bind(("ids", record_ids))
            .await?;
        let documents: Vec<Self> = result.take(0)?;

        let mut by_id: HashMap<String, Self> =
            documents.into_iter().map(|doc| (doc.id.clone(), doc)).collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }
}
