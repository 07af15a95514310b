mod services;
mod stages;

#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultSearchServices, SearchServices};
pub use stages::{CREATE_ARTIFACT_TASK, DELIVER_ARTIFACT_TASK, RUN_SEARCH_TASK};

use std::{collections::HashSet, sync::Arc};

use common::jobs::{chain, group, JobHandle, Scheduler, TaskNode, TaskValue};
use tracing::info;

use self::stages::{CreateArtifactTask, DeliverArtifactTask, RunSearchTask};

/// A query followed by one create-then-deliver chain per output format.
/// Searches take no lock and may run concurrently.
#[allow(clippy::module_name_repetitions)]
pub struct SearchPipeline {
    scheduler: Scheduler,
    services: Arc<dyn SearchServices>,
    formats: Vec<String>,
}

impl SearchPipeline {
    /// Repeated formats are kept once, in first-seen order.
    pub fn new(scheduler: Scheduler, services: Arc<dyn SearchServices>, formats: Vec<String>) -> Self {
        let mut seen = HashSet::new();
        let formats = formats
            .into_iter()
            .filter(|format| seen.insert(format.clone()))
            .collect();
        Self {
            scheduler,
            services,
            formats,
        }
    }

    pub fn formats(&self) -> &[String] {
        &self.formats
    }

    #[tracing::instrument(skip_all, fields(query = %query))]
    pub fn start(&self, query: &str) -> JobHandle {
        let per_format = self.formats.iter().map(|format| {
            chain([
                TaskNode::new(Arc::new(CreateArtifactTask {
                    services: Arc::clone(&self.services),
                    format: format.clone(),
                })),
                TaskNode::new(Arc::new(DeliverArtifactTask {
                    services: Arc::clone(&self.services),
                })),
            ])
        });
        let search = TaskNode::new(Arc::new(RunSearchTask {
            services: Arc::clone(&self.services),
            query: query.to_string(),
        }));

        let handle = self.scheduler.submit(
            "search",
            chain([search.into(), group(per_format)]),
            TaskValue::Null,
        );
        info!(job_id = %handle.id(), formats = self.formats.len(), "search job submitted");
        handle
    }
}
