use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::document::Document},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const LOG_EVERY: usize = 1000;

/// What one album load produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedAlbum {
    pub album: String,
    pub documents: usize,
}

/// Reads `*.json` document files from one album directory and upserts them.
///
/// Text comes from a sibling `.txt` file with the same stem, falling back to
/// the JSON `text` field.
pub struct FileAlbumLoader {
    db: Arc<SurrealDbClient>,
}

impl FileAlbumLoader {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }

    #[tracing::instrument(skip_all, fields(album = %path.display()))]
    pub async fn load_album(&self, path: &Path) -> Result<LoadedAlbum, AppError> {
        let album = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| AppError::InvalidPath(path.to_path_buf()))?
            .to_string();

        let files = document_files(path).await?;
        let total = files.len();
        info!(total, "loading album");

        for (i, file) in files.iter().enumerate() {
            if i == 0 || (i + 1) % LOG_EVERY == 0 || i + 1 == total {
                info!(loaded = i + 1, total, "loading documents");
            }
            let text = read_document_text(file).await?;
            let document = Document::from_path(file, text)?;
            debug!(document_id = %document.id, stem = %document.stem, "upserting document");
            self.db.upsert_item(document).await?;
        }

        Ok(LoadedAlbum {
            album,
            documents: total,
        })
    }
}

/// Metadata files in an album, in name order.
pub async fn document_files(dir: &Path) -> Result<Vec<PathBuf>, AppError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

async fn read_document_text(json_path: &Path) -> Result<String, AppError> {
    let text_path = json_path.with_extension("txt");
    if tokio::fs::try_exists(&text_path).await? {
        let text = tokio::fs::read_to_string(&text_path).await?;
        return Ok(text.trim().to_string());
    }

    let raw = tokio::fs::read_to_string(json_path).await?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    Ok(value
        .get("text")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string())
}
