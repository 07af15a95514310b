use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use super::TaskValue;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed(String),
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCESS",
            JobStatus::Failed(_) => "FAILURE",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Completion counts for one fan-out group, checked against its size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BarrierCounts {
    pub expected: usize,
    pub completed: usize,
    pub failed: usize,
}

impl BarrierCounts {
    pub fn is_released(&self) -> bool {
        self.failed == 0 && self.completed == self.expected
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: String,
    pub name: String,
    pub status: JobStatus,
    pub tasks: BTreeMap<String, TaskCounts>,
    pub barriers: Vec<BarrierCounts>,
    pub first_error: Option<String>,
    /// Latest successful output of each task, recorded as tasks finish.
    pub task_outputs: BTreeMap<String, TaskValue>,
    pub output: Option<TaskValue>,
}

impl JobSnapshot {
    pub fn task(&self, name: &str) -> TaskCounts {
        self.tasks.get(name).copied().unwrap_or_default()
    }

    pub fn task_output(&self, name: &str) -> Option<&TaskValue> {
        self.task_outputs.get(name)
    }
}

#[derive(Debug, Default)]
struct Ledger {
    tasks: BTreeMap<String, TaskCounts>,
    barriers: Vec<BarrierCounts>,
    first_error: Option<String>,
    task_outputs: BTreeMap<String, TaskValue>,
    output: Option<TaskValue>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum TaskOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

pub(crate) struct JobState {
    id: String,
    name: String,
    ledger: Mutex<Ledger>,
    status: watch::Sender<JobStatus>,
}

impl JobState {
    pub(crate) fn new(name: &str) -> Self {
        let (status, _) = watch::channel(JobStatus::Pending);
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            ledger: Mutex::new(Ledger::default()),
            status,
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn mark_running(&self) {
        self.status.send_replace(JobStatus::Running);
    }

    pub(crate) fn record_dispatch(&self, task: &str) {
        let mut ledger = self.ledger();
        let counts = ledger.tasks.entry(task.to_string()).or_default();
        counts.dispatched += 1;
    }

    pub(crate) fn record_outcome(
        &self,
        task: &str,
        outcome: TaskOutcome,
        error: Option<&AppError>,
    ) {
        let mut ledger = self.ledger();
        let counts = ledger.tasks.entry(task.to_string()).or_default();
        match outcome {
            TaskOutcome::Succeeded => counts.succeeded += 1,
            TaskOutcome::Failed => counts.failed += 1,
            TaskOutcome::Cancelled => counts.cancelled += 1,
        }
        if matches!(outcome, TaskOutcome::Failed) && ledger.first_error.is_none() {
            ledger.first_error = error.map(ToString::to_string);
        }
    }

    pub(crate) fn record_output(&self, task: &str, value: &TaskValue) {
        self.ledger()
            .task_outputs
            .insert(task.to_string(), value.clone());
    }

    pub(crate) fn open_barrier(&self, expected: usize) -> usize {
        let mut ledger = self.ledger();
        ledger.barriers.push(BarrierCounts {
            expected,
            ..BarrierCounts::default()
        });
        ledger.barriers.len() - 1
    }

    pub(crate) fn record_barrier(&self, barrier: usize, succeeded: bool) {
        let mut ledger = self.ledger();
        if let Some(counts) = ledger.barriers.get_mut(barrier) {
            if succeeded {
                counts.completed += 1;
            } else {
                counts.failed += 1;
            }
        }
    }

    pub(crate) fn finish(&self, result: Result<TaskValue, AppError>) {
        let status = {
            let mut ledger = self.ledger();
            match result {
                Ok(output) => {
                    ledger.output = Some(output);
                    JobStatus::Succeeded
                }
                Err(err) => {
                    let message = ledger
                        .first_error
                        .clone()
                        .unwrap_or_else(|| err.to_string());
                    JobStatus::Failed(message)
                }
            }
        };
        self.status.send_replace(status);
    }

    fn snapshot(&self) -> JobSnapshot {
        let ledger = self.ledger();
        JobSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            status: self.status.borrow().clone(),
            tasks: ledger.tasks.clone(),
            barriers: ledger.barriers.clone(),
            first_error: ledger.first_error.clone(),
            task_outputs: ledger.task_outputs.clone(),
            output: ledger.output.clone(),
        }
    }
}

/// Opaque reference to a submitted job, used to poll or await its outcome.
#[derive(Clone)]
pub struct JobHandle {
    state: Arc<JobState>,
}

impl JobHandle {
    pub(crate) fn new(state: Arc<JobState>) -> Self {
        Self { state }
    }

    pub fn id(&self) -> &str {
        &self.state.id
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn status(&self) -> JobStatus {
        self.state.status.borrow().clone()
    }

    /// Resolves once every task the job dispatched has finished.
    pub async fn wait(&self) -> JobStatus {
        let mut rx = self.state.status.subscribe();
        let status = match rx.wait_for(JobStatus::is_finished).await {
            Ok(status) => status.clone(),
            Err(_) => self.status(),
        };
        status
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.state.snapshot()
    }

    /// Latest output of the named task, available as soon as it succeeds.
    pub fn task_output(&self, name: &str) -> Option<TaskValue> {
        self.state.ledger().task_outputs.get(name).cloned()
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("status", &self.status())
            .finish()
    }
}
