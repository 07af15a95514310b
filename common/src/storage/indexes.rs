use anyhow::{Context, Result};
use tracing::info;

use crate::storage::{
    db::SurrealDbClient,
    types::{document::Document, StoredObject},
};

const FTS_ANALYZER_NAME: &str = "document_en_fts_analyzer";
pub const DOCUMENT_TEXT_INDEX: &str = "idx_document_text_fts";

#[derive(Clone, Copy)]
struct FtsIndexSpec {
    index_name: &'static str,
    table: &'static str,
    field: &'static str,
    analyzer: &'static str,
    method: &'static str,
}

impl FtsIndexSpec {
    fn definition(&self) -> String {
        format!(
            "DEFINE INDEX IF NOT EXISTS {index} ON TABLE {table} FIELDS {field} SEARCH ANALYZER {analyzer} {method};",
            index = self.index_name,
            table = self.table,
            field = self.field,
            analyzer = self.analyzer,
            method = self.method,
        )
    }

    fn rebuild(&self) -> String {
        format!(
            "REBUILD INDEX IF EXISTS {index} ON {table};",
            index = self.index_name,
            table = self.table,
        )
    }
}

fn document_text_spec() -> FtsIndexSpec {
    FtsIndexSpec {
        index_name: DOCUMENT_TEXT_INDEX,
        table: Document::table_name(),
        field: "text",
        analyzer: FTS_ANALYZER_NAME,
        method: "BM25",
    }
}

/// Defines the analyzer and BM25 index behind `text @@ $query` searches.
/// Idempotent.
pub async fn ensure_document_text_index(db: &SurrealDbClient) -> Result<()> {
    create_fts_analyzer(db).await?;

    let spec = document_text_spec();
    let res = db
        .client
        .query(spec.definition())
        .await
        .with_context(|| format!("creating index {} on {}", spec.index_name, spec.table))?;
    res.check()
        .with_context(|| format!("index definition failed for {}", spec.index_name))?;
    Ok(())
}

/// Rebuilds the document text index so it reflects every stored document.
pub async fn rebuild_document_text_index(db: &SurrealDbClient) -> Result<()> {
    ensure_document_text_index(db).await?;

    let spec = document_text_spec();
    info!(index = %spec.index_name, table = %spec.table, "rebuilding full-text index");
    let res = db
        .client
        .query(spec.rebuild())
        .await
        .with_context(|| format!("rebuilding index {}", spec.index_name))?;
    res.check()
        .with_context(|| format!("index rebuild failed for {}", spec.index_name))?;
    Ok(())
}

async fn create_fts_analyzer(db: &SurrealDbClient) -> Result<()> {
    let analyzer_query = format!(
        "DEFINE ANALYZER IF NOT EXISTS {analyzer}
            TOKENIZERS class
            FILTERS lowercase, ascii, snowball(english);",
        analyzer = FTS_ANALYZER_NAME
    );

    let res = db
        .client
        .query(analyzer_query)
        .await
        .context("creating FTS analyzer")?;

    res.check().context("failed to create FTS analyzer")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn index_definition_names_analyzer_and_method() {
        let definition = document_text_spec().definition();
        assert!(definition.contains("ON TABLE document FIELDS text"));
        assert!(definition.contains(&format!("SEARCH ANALYZER {FTS_ANALYZER_NAME} BM25")));
    }

    #[tokio::test]
    async fn index_can_be_defined_and_rebuilt_repeatedly() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");

        ensure_document_text_index(&db).await.expect("define");
        ensure_document_text_index(&db).await.expect("define again");
        rebuild_document_text_index(&db).await.expect("rebuild");
    }
}
