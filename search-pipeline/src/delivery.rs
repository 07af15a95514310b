use std::sync::Arc;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::artifact::{Artifact, ArtifactStatus},
    },
};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{info, warn};

/// Publishes rendered artifacts by copying them from the working store to
/// the publish store.
pub struct ArtifactPublisher {
    db: Arc<SurrealDbClient>,
    working: StorageManager,
    publish: StorageManager,
    retries: usize,
    base_delay_ms: u64,
}

impl ArtifactPublisher {
    pub fn new(
        db: Arc<SurrealDbClient>,
        working: StorageManager,
        publish: StorageManager,
        retries: usize,
    ) -> Self {
        Self {
            db,
            working,
            publish,
            retries,
            base_delay_ms: 100,
        }
    }

    #[must_use]
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    #[tracing::instrument(skip_all, fields(artifact_id = %artifact_id))]
    pub async fn deliver(&self, artifact_id: &str) -> Result<Artifact, AppError> {
        let artifact: Artifact = self
            .db
            .get_item(artifact_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("artifact {artifact_id}")))?;
        if artifact.status != ArtifactStatus::Sending {
            return Err(AppError::Validation(format!(
                "Artifact {artifact_id} is {}, not ready for delivery",
                artifact.status.as_str()
            )));
        }

        let retry_strategy = ExponentialBackoff::from_millis(self.base_delay_ms)
            .map(jitter)
            .take(self.retries);
        let mut attempt = 0_usize;
        let upload = Retry::spawn(retry_strategy, || {
            attempt += 1;
            let attempt = attempt;
            let path = artifact.path.clone();
            async move {
                let result = self.copy(&path).await;
                if let Err(err) = &result {
                    warn!(attempt, path = %path, error = %err, "artifact upload failed");
                }
                result
            }
        })
        .await;

        match upload {
            Ok(()) => {
                let delivered = artifact.mark_succeeded(&self.db).await?;
                info!(url = %delivered.url, "artifact delivered");
                Ok(delivered)
            }
            Err(err) => {
                artifact.mark_failed(&self.db).await?;
                Err(AppError::DeliveryFailure(format!("{}: {err}", artifact.path)))
            }
        }
    }

    async fn copy(&self, path: &str) -> Result<(), AppError> {
        let bytes = self.working.get(path).await?;
        self.publish.put(path, bytes).await?;
        Ok(())
    }
}
