//! Task worker.

use crate::{
    events::EventReporter,
    task::{Task, TaskError},
    wait_time::WaitTime,
};
use anyhow::Context;
use log::warn;
use rand::distributions::{Distribution, WeightedIndex};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::time::sleep;

// The longest a worker sleeps before checking whether it should stop.
const MAX_SLEEP_SLICE: Duration = Duration::from_millis(100);

/// A worker that runs weighted tasks in a loop.
pub struct Worker<R> {
    tasks: Arc<[Task]>,
    weights: WeightedIndex<u32>,
    reporter: R,
    wait_time: WaitTime,
    running: Arc<AtomicBool>,
}

impl<R: EventReporter> Worker<R> {
    /// Construct a new worker.
    pub fn new(
        tasks: Arc<[Task]>,
        reporter: R,
        wait_time: WaitTime,
        running: Arc<AtomicBool>,
    ) -> anyhow::Result<Self> {
        let weights = WeightedIndex::new(tasks.iter().map(Task::weight)).context("invalid task weights")?;
        Ok(Self { tasks, weights, reporter, wait_time, running })
    }

    /// Run tasks until the runner stops.
    pub async fn run(self) -> anyhow::Result<()> {
        while self.running.load(Ordering::Acquire) {
            let task = self.pick_task().context("no tasks available")?;
            let started_at = Instant::now();
            if let Err(e @ TaskError::RunnerStopped) = task.run(&self.reporter).await {
                warn!("Stopping worker because task {} failed: {e}", task.name());
                return Ok(());
            }
            let wait = self.wait_time.wait_after(started_at.elapsed());
            self.sleep(wait).await;
        }
        Ok(())
    }

    fn pick_task(&self) -> Option<&Task> {
        let index = self.weights.sample(&mut rand::thread_rng());
        self.tasks.get(index)
    }

    async fn sleep(&self, duration: Duration) {
        let started_at = Instant::now();
        while self.running.load(Ordering::Acquire) {
            let remaining = duration.saturating_sub(started_at.elapsed());
            if remaining.is_zero() {
                break;
            }
            sleep(remaining.min(MAX_SLEEP_SLICE)).await;
        }
    }
}
