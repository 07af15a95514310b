use std::{fmt, future::Future, sync::Arc};

use async_trait::async_trait;

use crate::error::AppError;

/// Values handed from one stage to the next.
pub type TaskValue = serde_json::Value;

#[async_trait]
pub trait JobTask: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, input: TaskValue) -> Result<TaskValue, AppError>;
}

/// Invoked when the task it is attached to fails on its own error.
#[async_trait]
pub trait ErrorCallback: Send + Sync {
    async fn on_error(&self, task_name: &str, error: &AppError);
}

struct FnTask<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> JobTask for FnTask<F>
where
    F: Fn(TaskValue) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TaskValue, AppError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: TaskValue) -> Result<TaskValue, AppError> {
        (self.f)(input).await
    }
}

/// Wraps an async closure as a named task.
pub fn task_fn<F, Fut>(name: impl Into<String>, f: F) -> TaskNode
where
    F: Fn(TaskValue) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TaskValue, AppError>> + Send + 'static,
{
    TaskNode::new(Arc::new(FnTask {
        name: name.into(),
        f,
    }))
}

#[derive(Clone)]
pub struct TaskNode {
    pub(crate) task: Arc<dyn JobTask>,
    pub(crate) error_callbacks: Vec<Arc<dyn ErrorCallback>>,
}

impl TaskNode {
    pub fn new(task: Arc<dyn JobTask>) -> Self {
        Self {
            task,
            error_callbacks: Vec::new(),
        }
    }

    #[must_use]
    pub fn on_error(mut self, callback: Arc<dyn ErrorCallback>) -> Self {
        self.error_callbacks.push(callback);
        self
    }

    pub fn name(&self) -> &str {
        self.task.name()
    }
}

impl fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskNode")
            .field("name", &self.name())
            .field("error_callbacks", &self.error_callbacks.len())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum Stage {
    Task(TaskNode),
    /// Runs stages one after another, feeding each output into the next.
    Chain(Vec<Stage>),
    /// Runs stages in parallel on the same input; outputs are collected in
    /// member order.
    Group(Vec<Stage>),
    /// A group whose collected outputs feed `callback`, which is dispatched
    /// only after every member succeeded.
    Chord {
        header: Vec<Stage>,
        callback: Box<Stage>,
    },
}

impl From<TaskNode> for Stage {
    fn from(node: TaskNode) -> Self {
        Stage::Task(node)
    }
}

impl Stage {
    /// Number of task nodes in this stage tree.
    pub fn task_count(&self) -> usize {
        match self {
            Stage::Task(_) => 1,
            Stage::Chain(stages) | Stage::Group(stages) => {
                stages.iter().map(Stage::task_count).sum()
            }
            Stage::Chord { header, callback } => {
                header.iter().map(Stage::task_count).sum::<usize>() + callback.task_count()
            }
        }
    }
}

pub fn chain<S: Into<Stage>>(stages: impl IntoIterator<Item = S>) -> Stage {
    Stage::Chain(stages.into_iter().map(Into::into).collect())
}

pub fn group<S: Into<Stage>>(stages: impl IntoIterator<Item = S>) -> Stage {
    Stage::Group(stages.into_iter().map(Into::into).collect())
}

pub fn chord<S: Into<Stage>>(
    header: impl IntoIterator<Item = S>,
    callback: impl Into<Stage>,
) -> Stage {
    Stage::Chord {
        header: header.into_iter().map(Into::into).collect(),
        callback: Box::new(callback.into()),
    }
}
