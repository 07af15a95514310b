use std::{io::Cursor, sync::Arc};

use bytes::Bytes;
use common::{
    coordination::{CoordinationStore, ProgressTracker},
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{artifact::Artifact, document::Document, search::Search},
    },
};
use docx_rs::{
    BreakType, Docx, Hyperlink, HyperlinkType, Paragraph, Run, Style, StyleType,
};
use tracing::{info, warn};

pub const SUPPORTED_FORMATS: [&str; 3] = [".txt", ".md", ".docx"];

const PAGE_BREAK: &str = "\n\n\n";
const DATE_FORMAT: &str = "%B %d, %Y at %-I:%M %p";
const HEADING_STYLE: &str = "Heading1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Text,
    Markdown,
    Docx,
}

impl ArtifactFormat {
    pub fn parse(format: &str) -> Result<Self, AppError> {
        match format {
            ".txt" => Ok(Self::Text),
            ".md" => Ok(Self::Markdown),
            ".docx" => Ok(Self::Docx),
            other => Err(AppError::Validation(format!(
                "Cannot create artifact of type {other}"
            ))),
        }
    }
}

fn image_url(doc: &Document, public_base_url: &str) -> String {
    format!(
        "{}/img/{}/{}.webp",
        public_base_url.trim_end_matches('/'),
        doc.album,
        doc.stem
    )
}

fn album_line(doc: &Document) -> String {
    format!("{} - {} of {}", doc.title, doc.album_index, doc.album)
}

/// One document as a markdown page: front matter, a blank line, the text.
pub fn render_page(doc: &Document, public_base_url: &str, is_last_page: bool) -> String {
    format!(
        "---\ndate: {date}\nalbum: {album}\nimage: {image}\n---\n\n{text}\n{brk}",
        date = doc.scanned_at.format(DATE_FORMAT),
        album = album_line(doc),
        image = image_url(doc, public_base_url),
        text = doc.text,
        brk = if is_last_page { "" } else { PAGE_BREAK },
    )
}

/// Empty Word document carrying the heading style used for page dates.
pub fn docx_document() -> Docx {
    Docx::new().add_style(
        Style::new(HEADING_STYLE, StyleType::Paragraph)
            .name("Heading 1")
            .size(32)
            .bold(),
    )
}

/// Appends one document as a Word page: date heading, bold album line,
/// image link, separator, then the text. Every page but the last ends in a
/// page break.
pub fn add_docx_page(docx: Docx, doc: &Document, public_base_url: &str, is_last_page: bool) -> Docx {
    let image = image_url(doc, public_base_url);

    let mut text = Run::new();
    for (i, line) in doc.text.lines().enumerate() {
        if i > 0 {
            text = text.add_break(BreakType::TextWrapping);
        }
        text = text.add_text(line);
    }
    let mut body = Paragraph::new().add_run(text);
    if !is_last_page {
        body = body.add_run(Run::new().add_break(BreakType::Page));
    }

    docx.add_paragraph(
        Paragraph::new()
            .add_run(Run::new().add_text(doc.scanned_at.format(DATE_FORMAT).to_string()))
            .style(HEADING_STYLE),
    )
    .add_paragraph(Paragraph::new().add_run(Run::new().add_text(album_line(doc)).bold()))
    .add_paragraph(
        Paragraph::new().add_hyperlink(
            Hyperlink::new(&image, HyperlinkType::External).add_run(
                Run::new()
                    .add_text(&image)
                    .color("0000FF")
                    .underline("single")
                    .bold(),
            ),
        ),
    )
    .add_paragraph(Paragraph::new().add_run(Run::new().add_text("-----")))
    .add_paragraph(body)
}

pub fn pack_docx(docx: Docx) -> Result<Vec<u8>, AppError> {
    let mut buffer = Cursor::new(Vec::new());
    docx.build()
        .pack(&mut buffer)
        .map_err(|err| AppError::Processing(format!("Failed to pack docx: {err}")))?;
    Ok(buffer.into_inner())
}

/// Renders a search's documents into an artifact file in the working store.
pub struct ArtifactRenderer {
    db: Arc<SurrealDbClient>,
    working: StorageManager,
    coordination: Arc<dyn CoordinationStore>,
    batch_name: String,
    public_base_url: String,
}

impl ArtifactRenderer {
    pub fn new(
        db: Arc<SurrealDbClient>,
        working: StorageManager,
        coordination: Arc<dyn CoordinationStore>,
        batch_name: &str,
        public_base_url: &str,
    ) -> Self {
        Self {
            db,
            working,
            coordination,
            batch_name: batch_name.to_string(),
            public_base_url: public_base_url.to_string(),
        }
    }

    /// Creates the artifact record, resets its progress counter, renders every
    /// document with a tick per page and leaves the artifact in `SENDING`.
    ///
    /// Returns `None` without storing anything when the search has no results.
    #[tracing::instrument(skip_all, fields(search_id = %search.id, format = %format))]
    pub async fn create_artifact(
        &self,
        search: &Search,
        format: &str,
    ) -> Result<Option<Artifact>, AppError> {
        let kind = ArtifactFormat::parse(format)?;
        if search.result_count() == 0 {
            warn!(query = %search.query, "search has no results, skipping artifact");
            return Ok(None);
        }
        self.remove_previous(search, format).await?;

        let artifact = Artifact::new(search, format, &self.batch_name, &self.public_base_url)?;
        self.db.store_item(artifact.clone()).await?;
        let tracker = ProgressTracker::for_artifact(Arc::clone(&self.coordination), &artifact);
        tracker.init().await?;
        info!(artifact_id = %artifact.id, path = %artifact.path, "artifact created");

        let started = artifact.mark_started(&self.db).await?;
        match self.render(&started, kind, search, &tracker).await {
            Ok(filesize) => {
                let sending = started.mark_sending(filesize, &self.db).await?;
                info!(artifact_id = %sending.id, filesize, "artifact rendered");
                Ok(Some(sending))
            }
            Err(err) => {
                warn!(artifact_id = %started.id, error = %err, "artifact rendering failed");
                started.mark_failed(&self.db).await?;
                Err(err)
            }
        }
    }

    /// A search gets at most one artifact per format; an older one is dropped
    /// together with its rendered file.
    async fn remove_previous(&self, search: &Search, format: &str) -> Result<(), AppError> {
        let previous = Artifact::get_for_search(&search.id, &self.db)
            .await?
            .into_iter()
            .filter(|artifact| artifact.format == format);
        for artifact in previous {
            warn!(artifact_id = %artifact.id, "search already has a {format} artifact, replacing it");
            self.working.delete_if_exists(&artifact.path).await?;
            self.db.delete_item::<Artifact>(&artifact.id).await?;
        }
        Ok(())
    }

    async fn render(
        &self,
        artifact: &Artifact,
        kind: ArtifactFormat,
        search: &Search,
        tracker: &ProgressTracker,
    ) -> Result<u64, AppError> {
        let documents = Document::get_by_ids(&search.document_ids, &self.db).await?;
        let pages = documents.len();

        let bytes = match kind {
            ArtifactFormat::Docx => {
                let mut docx = docx_document();
                for (i, doc) in documents.iter().enumerate() {
                    docx = add_docx_page(docx, doc, &self.public_base_url, i + 1 == pages);
                    tracker.tick(1).await?;
                }
                Bytes::from(pack_docx(docx)?)
            }
            ArtifactFormat::Text | ArtifactFormat::Markdown => {
                let mut body = String::new();
                for (i, doc) in documents.iter().enumerate() {
                    body.push_str(&render_page(doc, &self.public_base_url, i + 1 == pages));
                    tracker.tick(1).await?;
                }
                Bytes::from(body)
            }
        };

        self.working.put(&artifact.path, bytes).await?;
        Ok(self.working.size(&artifact.path).await?)
    }
}
