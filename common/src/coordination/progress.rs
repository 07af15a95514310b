use std::sync::Arc;

use tracing::debug;

use super::{artifact_progress_key, CoordinationStore};
use crate::{
    error::AppError,
    storage::types::artifact::{Artifact, ArtifactStatus},
};

/// Live progress counter for one artifact, kept in the coordination store.
#[derive(Clone)]
pub struct ProgressTracker {
    store: Arc<dyn CoordinationStore>,
    artifact_id: String,
    key: String,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn CoordinationStore>, artifact_id: &str) -> Self {
        Self {
            store,
            artifact_id: artifact_id.to_string(),
            key: artifact_progress_key(artifact_id),
        }
    }

    pub fn for_artifact(store: Arc<dyn CoordinationStore>, artifact: &Artifact) -> Self {
        Self::new(store, &artifact.id)
    }

    pub fn artifact_id(&self) -> &str {
        &self.artifact_id
    }

    /// Resets the counter to zero. Called once, when the artifact is created.
    pub async fn init(&self) -> Result<(), AppError> {
        self.store.set_counter(&self.key, 0).await
    }

    pub async fn tick(&self, n: u64) -> Result<u64, AppError> {
        let ticks = self.store.increment_counter(&self.key, n).await?;
        debug!(artifact_id = %self.artifact_id, ticks, "artifact progress ticked");
        Ok(ticks)
    }

    pub async fn ticks(&self) -> Result<u64, AppError> {
        self.store.get_counter(&self.key).await
    }

    /// Percentage in `[0, 100]` for an artifact in `status` with
    /// `total_units` pages to render.
    pub async fn progress(
        &self,
        status: &ArtifactStatus,
        total_units: u64,
    ) -> Result<f64, AppError> {
        match status {
            ArtifactStatus::Pending => Ok(0.0),
            ArtifactStatus::Sending | ArtifactStatus::Success => Ok(100.0),
            ArtifactStatus::Started | ArtifactStatus::Failure => {
                Ok(progress_fraction(self.ticks().await?, total_units))
            }
        }
    }
}

/// Counter as a percentage of `total_units`. Nothing to render counts as done.
#[allow(clippy::cast_precision_loss)]
pub fn progress_fraction(ticks: u64, total_units: u64) -> f64 {
    if total_units == 0 {
        return 100.0;
    }
    let percent = ticks as f64 / total_units as f64 * 100.0;
    percent.clamp(0.0, 100.0)
}
