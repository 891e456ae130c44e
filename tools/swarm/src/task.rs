//! Task descriptors.

use crate::events::{EventReporter, PublishError};
use async_trait::async_trait;
use std::{fmt, sync::Arc};

/// An error returned by a task.
///
/// Request errors are never returned: tasks publish them as events instead.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The runner stopped and dropped the event channel.
    #[error("runner stopped")]
    RunnerStopped,
}

impl From<PublishError> for TaskError {
    fn from(_: PublishError) -> Self {
        Self::RunnerStopped
    }
}

/// The function executed by a task.
#[async_trait]
pub trait TaskFn: Send + Sync {
    /// Run this task once, publishing the outcome of every request into the reporter.
    async fn run(&self, reporter: &dyn EventReporter) -> Result<(), TaskError>;
}

/// A task registered with the runner.
#[derive(Clone)]
pub struct Task {
    name: String,
    weight: u32,
    function: Arc<dyn TaskFn>,
}

impl Task {
    /// Construct a task with a weight of 1.
    pub fn new<F: TaskFn + 'static>(name: impl Into<String>, function: F) -> Self {
        Self { name: name.into(), weight: 1, function: Arc::new(function) }
    }

    /// Set this task's weight.
    ///
    /// Workers pick a task with a probability proportional to its weight.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// The task's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The task's weight.
    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Run this task once.
    pub async fn run(&self, reporter: &dyn EventReporter) -> Result<(), TaskError> {
        self.function.run(reporter).await
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("name", &self.name).field("weight", &self.weight).finish()
    }
}
