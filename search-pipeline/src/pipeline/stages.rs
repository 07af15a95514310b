use std::sync::Arc;

use async_trait::async_trait;
use common::{
    error::AppError,
    jobs::{JobTask, TaskValue},
};
use serde_json::json;
use tracing::info;

use super::services::SearchServices;

pub const RUN_SEARCH_TASK: &str = "run_search";
pub const CREATE_ARTIFACT_TASK: &str = "create_artifact";
pub const DELIVER_ARTIFACT_TASK: &str = "deliver_artifact";

fn string_field(input: &TaskValue, field: &str) -> Result<String, AppError> {
    input
        .get(field)
        .and_then(TaskValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| AppError::Validation(format!("Task input is missing `{field}`")))
}

pub struct RunSearchTask {
    pub services: Arc<dyn SearchServices>,
    pub query: String,
}

#[async_trait]
impl JobTask for RunSearchTask {
    fn name(&self) -> &str {
        RUN_SEARCH_TASK
    }

    #[tracing::instrument(skip_all, fields(query = %self.query))]
    async fn run(&self, _input: TaskValue) -> Result<TaskValue, AppError> {
        let search = self
            .services
            .run_search(&self.query)
            .await
            .map_err(|err| AppError::SearchTaskFailure(format!("{}: {err}", self.query)))?;
        info!(search_id = %search.id, results = search.result_count(), "search complete");
        Ok(json!({ "search_id": search.id }))
    }
}

pub struct CreateArtifactTask {
    pub services: Arc<dyn SearchServices>,
    pub format: String,
}

#[async_trait]
impl JobTask for CreateArtifactTask {
    fn name(&self) -> &str {
        CREATE_ARTIFACT_TASK
    }

    #[tracing::instrument(skip_all, fields(format = %self.format))]
    async fn run(&self, input: TaskValue) -> Result<TaskValue, AppError> {
        let search_id = string_field(&input, "search_id")?;
        match self
            .services
            .create_artifact(&search_id, &self.format)
            .await?
        {
            Some(artifact) => Ok(json!({
                "artifact_id": artifact.id,
                "search_id": search_id,
                "format": self.format,
                "skipped": false,
            })),
            None => {
                info!(search_id = %search_id, "no results to render");
                Ok(json!({
                    "artifact_id": null,
                    "search_id": search_id,
                    "format": self.format,
                    "skipped": true,
                }))
            }
        }
    }
}

pub struct DeliverArtifactTask {
    pub services: Arc<dyn SearchServices>,
}

#[async_trait]
impl JobTask for DeliverArtifactTask {
    fn name(&self) -> &str {
        DELIVER_ARTIFACT_TASK
    }

    #[tracing::instrument(skip_all)]
    async fn run(&self, input: TaskValue) -> Result<TaskValue, AppError> {
        if input.get("skipped").and_then(TaskValue::as_bool) == Some(true) {
            return Ok(json!({
                "artifact_id": null,
                "search_id": input.get("search_id").cloned().unwrap_or(TaskValue::Null),
                "format": input.get("format").cloned().unwrap_or(TaskValue::Null),
                "url": null,
                "skipped": true,
            }));
        }
        let artifact_id = string_field(&input, "artifact_id")?;
        let artifact = self.services.deliver_artifact(&artifact_id).await?;
        Ok(json!({
            "artifact_id": artifact.id,
            "search_id": artifact.search_id,
            "format": artifact.format,
            "url": artifact.url,
            "skipped": false,
        }))
    }
}
