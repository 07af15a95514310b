use std::{
    any::Any,
    collections::{HashMap, VecDeque},
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, PoisonError},
};

use futures::{future::BoxFuture, FutureExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    handle::{JobState, TaskOutcome},
    FailurePolicy, JobHandle, Stage, TaskNode, TaskValue,
};
use crate::error::AppError;

/// Finished jobs kept for lookup by id before the oldest are evicted.
const DEFAULT_FINISHED_RETENTION: usize = 256;

#[derive(Default)]
struct Registry {
    jobs: HashMap<String, JobHandle>,
    order: VecDeque<String>,
}

impl Registry {
    fn insert(&mut self, handle: JobHandle) {
        self.order.push_back(handle.id().to_string());
        self.jobs.insert(handle.id().to_string(), handle);
    }

    /// Drops the oldest finished jobs until at most `keep` finished ones remain.
    fn evict_finished(&mut self, keep: usize) {
        let finished: Vec<String> = self
            .order
            .iter()
            .filter(|id| {
                self.jobs
                    .get(*id)
                    .is_some_and(|handle| handle.status().is_finished())
            })
            .cloned()
            .collect();
        let excess = finished.len().saturating_sub(keep);
        for id in finished.into_iter().take(excess) {
            self.jobs.remove(&id);
            self.order.retain(|kept| kept != &id);
        }
    }
}

/// Runs job graphs on the tokio runtime, one spawned task per dispatched
/// graph node.
#[derive(Clone)]
pub struct Scheduler {
    policy: FailurePolicy,
    retention: usize,
    registry: Arc<Mutex<Registry>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(FailurePolicy::default())
    }
}

impl Scheduler {
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            policy,
            retention: DEFAULT_FINISHED_RETENTION,
            registry: Arc::default(),
        }
    }

    /// Caps how many finished jobs stay reachable through [`Scheduler::job`].
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Starts `stage` with `input` and returns without waiting for any task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, name: &str, stage: Stage, input: TaskValue) -> JobHandle {
        let state = Arc::new(JobState::new(name));
        let handle = JobHandle::new(Arc::clone(&state));
        {
            let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry.evict_finished(self.retention);
            registry.insert(handle.clone());
        }

        info!(
            job_id = %state.id(),
            job = %name,
            tasks = stage.task_count(),
            policy = ?self.policy,
            "job submitted"
        );

        let run = JobRun {
            state,
            policy: self.policy,
        };
        tokio::spawn(async move {
            run.state.mark_running();
            let result = AssertUnwindSafe(run.execute(stage, input, CancellationToken::new()))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(AppError::InternalError(format!(
                        "job panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                });
            match &result {
                Ok(_) => info!(job_id = %run.state.id(), "job succeeded"),
                Err(err) => warn!(job_id = %run.state.id(), error = %err, "job failed"),
            }
            run.state.finish(result);
        });

        handle
    }

    pub fn job(&self, id: &str) -> Option<JobHandle> {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .jobs
            .get(id)
            .cloned()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[derive(Clone)]
struct JobRun {
    state: Arc<JobState>,
    policy: FailurePolicy,
}

impl JobRun {
    fn execute(
        &self,
        stage: Stage,
        input: TaskValue,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<TaskValue, AppError>> {
        let run = self.clone();
        async move {
            match stage {
                Stage::Task(node) => run.run_task(node, input, cancel).await,
                Stage::Chain(stages) => {
                    let mut value = input;
                    for stage in stages {
                        value = run.execute(stage, value, cancel.clone()).await?;
                    }
                    Ok(value)
                }
                Stage::Group(members) => run.fan_out(members, input, cancel).await,
                Stage::Chord { header, callback } => {
                    let collected = run.fan_out(header, input, cancel.clone()).await?;
                    run.execute(*callback, collected, cancel).await
                }
            }
        }
        .boxed()
    }

    async fn run_task(
        &self,
        node: TaskNode,
        input: TaskValue,
        cancel: CancellationToken,
    ) -> Result<TaskValue, AppError> {
        let name = node.name().to_string();
        if cancel.is_cancelled() {
            self.state.record_outcome(&name, TaskOutcome::Cancelled, None);
            return Err(AppError::Cancelled(name));
        }

        self.state.record_dispatch(&name);
        debug!(job_id = %self.state.id(), task = %name, "task dispatched");

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(AppError::Cancelled(name.clone())),
            result = AssertUnwindSafe(node.task.run(input)).catch_unwind() => {
                result.unwrap_or_else(|payload| {
                    Err(AppError::InternalError(format!(
                        "task {name} panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                })
            }
        };

        match outcome {
            Ok(value) => {
                self.state.record_outcome(&name, TaskOutcome::Succeeded, None);
                self.state.record_output(&name, &value);
                debug!(job_id = %self.state.id(), task = %name, "task succeeded");
                Ok(value)
            }
            Err(err @ AppError::Cancelled(_)) => {
                self.state.record_outcome(&name, TaskOutcome::Cancelled, None);
                debug!(job_id = %self.state.id(), task = %name, "task cancelled");
                Err(err)
            }
            Err(err) => {
                self.state.record_outcome(&name, TaskOutcome::Failed, Some(&err));
                warn!(job_id = %self.state.id(), task = %name, error = %err, "task failed");
                for callback in &node.error_callbacks {
                    callback.on_error(&name, &err).await;
                }
                Err(err)
            }
        }
    }

    /// Dispatches every member at once and collects their outputs in member
    /// order. Resolves only after all members have finished, failing with the
    /// first member error.
    async fn fan_out(
        &self,
        members: Vec<Stage>,
        input: TaskValue,
        cancel: CancellationToken,
    ) -> Result<TaskValue, AppError> {
        let expected = members.len();
        let barrier = self.state.open_barrier(expected);
        let group_cancel = match self.policy {
            FailurePolicy::ContinueSiblings => cancel,
            FailurePolicy::CancelSiblings => cancel.child_token(),
        };

        let mut running = JoinSet::new();
        for (index, member) in members.into_iter().enumerate() {
            let member_run = self.execute(member, input.clone(), group_cancel.clone());
            running.spawn(async move { (index, member_run.await) });
        }

        let mut outputs = vec![TaskValue::Null; expected];
        let mut first_error: Option<AppError> = None;
        while let Some(joined) = running.join_next().await {
            let result = match joined {
                Ok((index, Ok(value))) => {
                    if let Some(slot) = outputs.get_mut(index) {
                        *slot = value;
                    }
                    Ok(())
                }
                Ok((_, Err(err))) => Err(err),
                Err(join_err) => Err(AppError::Join(join_err)),
            };

            match result {
                Ok(()) => self.state.record_barrier(barrier, true),
                Err(err) => {
                    self.state.record_barrier(barrier, false);
                    if self.policy == FailurePolicy::CancelSiblings {
                        group_cancel.cancel();
                    }
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        match first_error {
            Some(err) => {
                debug!(
                    job_id = %self.state.id(),
                    barrier,
                    expected,
                    "group failed; join callback will not run"
                );
                Err(err)
            }
            None => Ok(TaskValue::Array(outputs)),
        }
    }
}
