//! Task based load generation.
//!
//! Tasks are registered as [`task::Task`] descriptors and handed to [`run`], which spawns workers that
//! execute them in a loop. Tasks report the outcome of every request they perform through the
//! [`events::EventReporter`] they are given, and the runner aggregates those events into statistics
//! and reports.

#![deny(missing_docs)]
#![forbid(unsafe_code)]
#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::iterator_step_by_zero,
    clippy::invalid_regex,
    clippy::string_slice,
    clippy::unimplemented,
    clippy::todo
)]

pub mod events;
pub mod http;
pub mod mode;
pub mod report;
pub mod runner;
pub mod spec;
pub mod task;
pub mod wait_time;
pub mod worker;

use log::info;
use runner::{LoadTestRunner, RunSummary, RunnerConfig};
use task::Task;

/// Run the given tasks until the runner's stop conditions are met or the process receives ctrl-c.
pub async fn run(tasks: Vec<Task>, config: RunnerConfig) -> anyhow::Result<RunSummary> {
    let runner = LoadTestRunner::new(config);
    let stop = runner.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received ctrl-c, stopping execution...");
            stop.stop();
        }
    });
    runner.run(tasks).await
}
