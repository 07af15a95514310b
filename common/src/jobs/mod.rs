//! Explicit job-stage graphs and the scheduler that runs them.
//!
//! A job is a tree of [`Stage`]s: single tasks, sequential chains, parallel
//! groups and chords (a group joined by a callback that only runs once every
//! member succeeded). [`Scheduler::submit`] returns a [`JobHandle`] right away
//! and drives the graph on spawned tokio tasks, counting dispatches and
//! completions per task name and per barrier so callers can poll progress.

mod handle;
mod scheduler;
mod stage;

pub use handle::{BarrierCounts, JobHandle, JobSnapshot, JobStatus, TaskCounts};
pub use scheduler::Scheduler;
pub use stage::{
    chain, chord, group, task_fn, ErrorCallback, JobTask, Stage, TaskNode, TaskValue,
};

use serde::{Deserialize, Serialize};

/// What happens to the rest of a group once one member fails.
///
/// Either way the group's join callback never runs and the failing task's
/// own error callbacks fire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Siblings already dispatched run to completion.
    #[default]
    #[serde(rename = "continue")]
    ContinueSiblings,
    /// Siblings still running are cancelled and unstarted ones are skipped.
    #[serde(rename = "cancel")]
    CancelSiblings,
}

#[cfg(test)]
mod tests;
