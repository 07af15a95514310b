use std::{path::Path, sync::Arc};

use common::{
    coordination::{CoordinationStore, LockGuard, ProgressTracker, SurrealCoordinationStore},
    error::AppError,
    jobs::{JobHandle, Scheduler},
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{
            artifact::{Artifact, ArtifactStatus},
            corpus_snapshot::CorpusSnapshot,
        },
    },
    utils::config::AppConfig,
};
use ingestion_pipeline::{DefaultLoadServices, LoadPipeline, LoadServices};
use search_pipeline::{
    pipeline::RUN_SEARCH_TASK, DefaultSearchServices, SearchPipeline, SearchServices,
};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub version_tag: String,
    pub latest_corpus: Option<CorpusSnapshot>,
    pub ingestion_running: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactProgress {
    pub artifact_id: String,
    pub format: String,
    pub status: ArtifactStatus,
    pub progress: f64,
    pub url: String,
}

/// The id of the search a search job created, available as soon as its
/// query stage has finished.
pub fn search_id(handle: &JobHandle) -> Option<String> {
    let output = handle.task_output(RUN_SEARCH_TASK)?;
    output.get("search_id")?.as_str().map(str::to_string)
}

/// Entry point for callers: starts load and search jobs and reports on the
/// corpus. Load jobs are serialized through the ingestion lock; searches run
/// freely.
pub struct Orchestrator {
    db: Arc<SurrealDbClient>,
    coordination: Arc<dyn CoordinationStore>,
    lock: LockGuard,
    load: LoadPipeline,
    search: SearchPipeline,
    search_services: Arc<dyn SearchServices>,
}

impl Orchestrator {
    /// Connects to the configured database and storage and wires the default
    /// collaborators.
    pub async fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let db = Arc::new(
            SurrealDbClient::new(
                &config.surrealdb_address,
                &config.surrealdb_username,
                &config.surrealdb_password,
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await?,
        );
        db.ensure_initialized().await?;

        let coordination: Arc<dyn CoordinationStore> =
            Arc::new(SurrealCoordinationStore::new(Arc::clone(&db)));
        let working = StorageManager::new(config).await?;
        let publish = StorageManager::publish(config).await?;

        let load_services = Arc::new(DefaultLoadServices::new(Arc::clone(&db)));
        let search_services = Arc::new(DefaultSearchServices::new(
            Arc::clone(&db),
            Arc::clone(&coordination),
            working,
            publish,
            config,
        ));

        Ok(Self::with_services(
            db,
            coordination,
            load_services,
            search_services,
            config,
        ))
    }

    pub fn with_services(
        db: Arc<SurrealDbClient>,
        coordination: Arc<dyn CoordinationStore>,
        load_services: Arc<dyn LoadServices>,
        search_services: Arc<dyn SearchServices>,
        config: &AppConfig,
    ) -> Self {
        let scheduler = Scheduler::new(config.fan_out_failure_policy);
        let lock = LockGuard::new(Arc::clone(&coordination));
        Self {
            load: LoadPipeline::new(lock.clone(), scheduler.clone(), load_services),
            search: SearchPipeline::new(
                scheduler,
                Arc::clone(&search_services),
                config.artifact_formats.clone(),
            ),
            search_services,
            db,
            coordination,
            lock,
        }
    }

    /// Fails synchronously with `AlreadyRunning`, `InvalidPath` or `NoAlbums`
    /// before anything is dispatched.
    pub async fn start_load(&self, path: &Path) -> Result<JobHandle, AppError> {
        self.load.start(path).await
    }

    pub fn start_search(&self, query: &str) -> JobHandle {
        self.search.start(query)
    }

    pub async fn get_overview(&self) -> Result<Overview, AppError> {
        Ok(Overview {
            version_tag: env!("CARGO_PKG_VERSION").to_string(),
            latest_corpus: CorpusSnapshot::get_latest(&self.db).await?,
            ingestion_running: self.is_loading().await?,
        })
    }

    pub async fn is_loading(&self) -> Result<bool, AppError> {
        self.lock.is_held().await
    }

    /// Clears the ingestion flag regardless of who set it.
    pub async fn reset_lock(&self) -> Result<(), AppError> {
        if self.lock.is_held().await? {
            warn!("force releasing ingestion lock");
        }
        self.lock.release().await?;
        info!("ingestion lock cleared");
        Ok(())
    }

    /// Removes a search with its artifacts and their files. Refused while a
    /// load is rewriting the corpus.
    pub async fn delete_search(&self, search_id: &str) -> Result<usize, AppError> {
        if self.is_loading().await? {
            return Err(AppError::AlreadyRunning);
        }
        self.search_services.delete_search(search_id).await
    }

    /// Status and progress of every artifact generated for a search.
    pub async fn artifact_progress(
        &self,
        search_id: &str,
    ) -> Result<Vec<ArtifactProgress>, AppError> {
        let artifacts = Artifact::get_for_search(search_id, &self.db).await?;
        let mut report = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let tracker = ProgressTracker::for_artifact(Arc::clone(&self.coordination), &artifact);
            let progress = tracker
                .progress(&artifact.status, artifact.total_units as u64)
                .await?;
            report.push(ArtifactProgress {
                artifact_id: artifact.id,
                format: artifact.format,
                status: artifact.status,
                progress,
                url: artifact.url,
            });
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use async_trait::async_trait;
    use common::{
        coordination::MemoryCoordinationStore,
        jobs::JobStatus,
        storage::types::{document::Document, search::Search},
    };
    use ingestion_pipeline::pipeline::{INDEX_CORPUS_TASK, LOAD_ALBUM_TASK};
    use tokio::sync::Semaphore;
    use uuid::Uuid;

    /// Search services whose rendering stops halfway until the gate opens.
    struct GatedSearchServices {
        db: Arc<SurrealDbClient>,
        coordination: Arc<dyn CoordinationStore>,
        gate: Semaphore,
    }

    #[async_trait]
    impl SearchServices for GatedSearchServices {
        async fn run_search(&self, query: &str) -> Result<Search, AppError> {
            let mut search = Search::new(query, None);
            for i in 0..4 {
                search.add_document(&format!("doc-{i}"));
            }
            self.db.store_item(search.clone()).await?;
            Ok(search)
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
                .ok_or_else(|| AppError::NotFound(search_id.to_string()))?;
            let artifact = Artifact::new(&search, format, "00", "https://cdn.example.com")?;
            self.db.store_item(artifact.clone()).await?;
            let tracker = ProgressTracker::for_artifact(Arc::clone(&self.coordination), &artifact);
            tracker.init().await?;
            let started = artifact.mark_started(&self.db).await?;
            tracker.tick(2).await?;

            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|err| AppError::InternalError(err.to_string()))?;
            tracker.tick(2).await?;
            Ok(Some(started.mark_sending(4, &self.db).await?))
        }

        async fn deliver_artifact(&self, artifact_id: &str) -> Result<Artifact, AppError> {
            let artifact: Artifact = self
                .db
                .get_item(artifact_id)
                .await?
                .ok_or_else(|| AppError::NotFound(artifact_id.to_string()))?;
            artifact.mark_succeeded(&self.db).await
        }

        async fn delete_search(&self, _search_id: &str) -> Result<usize, AppError> {
            Ok(0)
        }
    }

    async fn write_album(root: &Path, name: &str, pages: &[(&str, &str)]) {
        let album = root.join(name);
        tokio::fs::create_dir(&album).await.expect("album dir");
        for (stem, text) in pages {
            tokio::fs::write(
                album.join(format!("{stem}.json")),
                serde_json::json!({ "text": text }).to_string(),
            )
            .await
            .expect("page");
        }
    }

    async fn orchestrator() -> (Orchestrator, StorageManager) {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        db.ensure_initialized().await.expect("init");
        let coordination: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());
        let publish = StorageManager::in_memory();
        let config = AppConfig {
            public_base_url: "https://cdn.example.com".into(),
            ..AppConfig::default()
        };
        let orchestrator = Orchestrator::with_services(
            Arc::clone(&db),
            Arc::clone(&coordination),
            Arc::new(DefaultLoadServices::new(Arc::clone(&db))),
            Arc::new(DefaultSearchServices::new(
                Arc::clone(&db),
                coordination,
                StorageManager::in_memory(),
                publish.clone(),
                &config,
            )),
            &config,
        );
        (orchestrator, publish)
    }

    #[tokio::test]
    async fn overview_before_any_load_has_no_corpus() {
        let (orchestrator, _) = orchestrator().await;

        let overview = orchestrator.get_overview().await.expect("overview");

        assert_eq!(overview.version_tag, env!("CARGO_PKG_VERSION"));
        assert!(overview.latest_corpus.is_none());
        assert!(!overview.ingestion_running);
    }

    #[tokio::test]
    async fn load_then_search_publishes_artifacts() {
        let root = tempfile::tempdir().expect("tempdir");
        write_album(
            root.path(),
            "1990-01",
            &[
                ("000001_1990-01-01_09-00-00_letter", "The harvest came early"),
                ("000002_1990-01-02_09-00-00_note", "A quiet winter"),
            ],
        )
        .await;
        write_album(
            root.path(),
            "1990-02",
            &[("000001_1990-02-01_09-00-00_card", "Harvest moon over the barn")],
        )
        .await;
        write_album(
            root.path(),
            "1990-03",
            &[("000001_1990-03-01_09-00-00_memo", "Nothing to report")],
        )
        .await;
        let (orchestrator, publish) = orchestrator().await;

        let load = orchestrator.start_load(root.path()).await.expect("start load");
        assert_eq!(load.wait().await, JobStatus::Succeeded);
        let snapshot = load.snapshot();
        assert_eq!(snapshot.task(LOAD_ALBUM_TASK).succeeded, 3);
        assert_eq!(snapshot.task(INDEX_CORPUS_TASK).succeeded, 1);
        assert!(!orchestrator.is_loading().await.expect("flag"));

        let overview = orchestrator.get_overview().await.expect("overview");
        let corpus = overview.latest_corpus.expect("corpus snapshot");
        assert_eq!(corpus.document_count, 4);

        let search = orchestrator.start_search("harvest");
        assert_eq!(search.wait().await, JobStatus::Succeeded);
        let output = search.snapshot().output.expect("search output");
        let search_id = search_id(&search).expect("search id");
        assert_eq!(output[0]["search_id"], search_id.as_str());
        assert_eq!(output[1]["search_id"], search_id.as_str());

        let report = orchestrator
            .artifact_progress(&search_id)
            .await
            .expect("progress");
        assert_eq!(report.len(), 2);
        let mut paths = Vec::new();
        for artifact in &report {
            assert_eq!(artifact.status, ArtifactStatus::Success);
            assert!((artifact.progress - 100.0).abs() < f64::EPSILON);
            let path = artifact
                .url
                .strip_prefix("https://cdn.example.com/")
                .expect("url prefix")
                .to_string();
            let body = publish.get(&path).await.expect("published");
            if artifact.format == ".docx" {
                assert!(body.starts_with(b"PK"));
            } else {
                let body = String::from_utf8(body.to_vec()).expect("utf8");
                assert!(body.contains("The harvest came early"));
                assert!(body.contains("Harvest moon over the barn"));
                assert!(!body.contains("A quiet winter"));
            }
            paths.push(path);
        }

        assert_eq!(orchestrator.delete_search(&search_id).await.expect("delete"), 2);
        for path in &paths {
            assert!(!publish.exists(path).await.expect("exists"));
        }
        assert!(orchestrator
            .artifact_progress(&search_id)
            .await
            .expect("progress")
            .is_empty());

        let documents: Vec<Document> = Document::get_all_ordered(&orchestrator.db)
            .await
            .expect("documents");
        assert_eq!(documents.len(), 4);
    }

    #[tokio::test]
    async fn second_load_is_refused_until_reset() {
        let root = tempfile::tempdir().expect("tempdir");
        write_album(
            root.path(),
            "1990-01",
            &[("000001_1990-01-01_09-00-00_letter", "text")],
        )
        .await;
        let (orchestrator, _) = orchestrator().await;
        orchestrator.lock.acquire().await.expect("stale lock");

        let err = orchestrator
            .start_load(root.path())
            .await
            .expect_err("lock held");
        assert!(matches!(err, AppError::AlreadyRunning));

        orchestrator.reset_lock().await.expect("reset");
        orchestrator.reset_lock().await.expect("reset twice");
        assert!(!orchestrator.is_loading().await.expect("flag"));

        let handle = orchestrator.start_load(root.path()).await.expect("retry");
        assert_eq!(handle.wait().await, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn preflight_errors_leave_lock_untouched() {
        let root = tempfile::tempdir().expect("tempdir");
        let (orchestrator, _) = orchestrator().await;

        let err = orchestrator
            .start_load(root.path())
            .await
            .expect_err("no albums");
        assert!(matches!(err, AppError::NoAlbums(_)));

        let err = orchestrator
            .start_load(&root.path().join("missing"))
            .await
            .expect_err("invalid path");
        assert!(matches!(err, AppError::InvalidPath(_)));
        assert!(!orchestrator.is_loading().await.expect("flag"));
    }

    #[tokio::test]
    async fn search_progress_is_visible_while_rendering() {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        let coordination: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::new());
        let services = Arc::new(GatedSearchServices {
            db: Arc::clone(&db),
            coordination: Arc::clone(&coordination),
            gate: Semaphore::new(0),
        });
        let config = AppConfig {
            artifact_formats: vec![".txt".into()],
            ..AppConfig::default()
        };
        let orchestrator = Orchestrator::with_services(
            Arc::clone(&db),
            coordination,
            Arc::new(DefaultLoadServices::new(Arc::clone(&db))),
            services.clone(),
            &config,
        );

        let handle = orchestrator.start_search("harvest");
        let halfway = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(id) = search_id(&handle) {
                    let report = orchestrator.artifact_progress(&id).await.expect("progress");
                    if let Some(artifact) = report.into_iter().find(|a| a.progress > 0.0) {
                        return artifact;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("render reached halfway");

        assert_eq!(handle.status(), JobStatus::Running);
        assert_eq!(halfway.status, ArtifactStatus::Started);
        assert!(halfway.progress > 0.0 && halfway.progress < 100.0);
        assert!((halfway.progress - 50.0).abs() < f64::EPSILON);

        services.gate.add_permits(1);
        assert_eq!(handle.wait().await, JobStatus::Succeeded);
        let id = search_id(&handle).expect("search id");
        let report = orchestrator.artifact_progress(&id).await.expect("progress");
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].status, ArtifactStatus::Success);
        assert!((report[0].progress - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn delete_search_is_refused_during_a_load() {
        let (orchestrator, _) = orchestrator().await;
        orchestrator.lock.acquire().await.expect("lock");

        let err = orchestrator
            .delete_search("any")
            .await
            .expect_err("loading");
        assert!(matches!(err, AppError::AlreadyRunning));

        orchestrator.reset_lock().await.expect("reset");
        let err = orchestrator
            .delete_search("missing")
            .await
            .expect_err("unknown search");
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
