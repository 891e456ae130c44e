//! Runtime implementation

use crate::{
    events::{ChannelReporter, RequestEvent, RequestOutcome},
    http::now_millis,
    mode::RunnerMode,
    report::{EventRecord, ReportGenerator, RunMetadata, TaskMetadata},
    spec::WorkerIncrementMode,
    task::Task,
    wait_time::WaitTime,
    worker::Worker,
};
use anyhow::bail;
use chrono::{SecondsFormat, Utc};
use futures::channel::mpsc::{channel, Receiver, Sender};
use log::{error, info, warn};
use request_stats::RequestStats;
use std::{
    collections::VecDeque,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    task::JoinSet,
    time::{sleep, Instant},
};

const EVENT_CHANNEL_SIZE: usize = 10000;
const RESPONSE_TIME_WINDOW_SIZE: usize = 100;

// The error rate is only enforced once this many events have been received.
const MIN_ERROR_RATE_SAMPLES: usize = 10;

/// Load testing runner implementation.
pub struct LoadTestRunner {
    config: RunnerConfig,
    sender: Sender<RequestEvent>,
    receiver: Receiver<RequestEvent>,
    workers: JoinSet<()>,
    total_workers: Arc<AtomicU32>,
    running: Arc<AtomicBool>,
    started_at: Instant,
    mode: RunnerMode,
    window_last_response_times: VecDeque<Duration>,
    stats: RequestStats,
    stats_reset: bool,
    events_received: usize,
    records: Vec<EventRecord>,
}

/// Runner configuration.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Report output path. No report is written if unset.
    pub output_path: Option<PathBuf>,

    /// The maximum amount of time we want to run this for.
    pub max_test_duration: Option<Duration>,

    /// The maximum average response time we're willing to tolerate.
    pub max_response_time: Duration,

    /// The maximum error rate we're willing to tolerate.
    pub max_error_rate: f64,

    /// The maximum number of workers.
    pub max_workers: Option<u32>,

    /// The worker increment mode.
    pub mode: WorkerIncrementMode,

    /// The time workers wait after every task.
    pub wait_time: WaitTime,

    /// The interval at which statistics are logged.
    pub stats_interval: Duration,

    /// Reset the statistics once all workers have been spawned.
    pub reset_stats: bool,

    /// Keep every received event in [`RunSummary::records`].
    ///
    /// Events are always kept when a report is written.
    pub collect_records: bool,

    /// How long to wait for workers to finish their current task once the run stops. Workers still
    /// running after this are aborted.
    pub drain_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            output_path: None,
            max_test_duration: None,
            max_response_time: Duration::from_secs(5),
            max_error_rate: 0.25,
            max_workers: None,
            mode: WorkerIncrementMode::Hatch { hatch_rate: 1, max_workers: 1 },
            wait_time: WaitTime::None,
            stats_interval: Duration::from_secs(2),
            reset_stats: false,
            collect_records: false,
            drain_timeout: Duration::from_secs(10),
        }
    }
}

/// The outcome of a run.
pub struct RunSummary {
    /// The statistics gathered.
    pub stats: RequestStats,

    /// Every event received, in order. Only populated when records are collected or a report is written.
    pub records: Vec<EventRecord>,

    /// The run's metadata.
    pub metadata: RunMetadata,
}

/// A runner error.
#[derive(Debug, thiserror::Error)]
#[error("runner error: {0}")]
pub struct RunnerError(String);

/// A handle that allows stopping a running test.
#[derive(Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Stop the test. Workers finish their current task and exit.
    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl LoadTestRunner {
    /// Create a new runner.
    pub fn new(config: RunnerConfig) -> Self {
        let (sender, receiver) = channel(EVENT_CHANNEL_SIZE);
        LoadTestRunner {
            mode: RunnerMode::new(
                config.mode.clone(),
                config.max_test_duration,
                config.max_response_time,
                config.max_workers,
            ),
            config,
            sender,
            receiver,
            workers: JoinSet::new(),
            total_workers: Default::default(),
            running: Arc::new(AtomicBool::new(true)),
            started_at: Instant::now(),
            window_last_response_times: VecDeque::new(),
            stats: RequestStats::new(),
            stats_reset: false,
            events_received: 0,
            records: Vec::new(),
        }
    }

    /// Get a handle that can stop this runner.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.running.clone())
    }

    /// Run the given tasks.
    pub async fn run(mut self, tasks: Vec<Task>) -> anyhow::Result<RunSummary> {
        if tasks.is_empty() {
            bail!("no tasks to run");
        }
        if tasks.iter().all(|task| task.weight() == 0) {
            bail!("at least one task needs a non zero weight");
        }
        if matches!(self.config.mode, WorkerIncrementMode::Steady { .. }) && self.config.max_test_duration.is_none() {
            bail!("steady mode requires max test duration");
        }
        self.config.mode.validate(self.config.max_workers)?;
        self.config.wait_time.validate()?;

        let started_at = Utc::now();
        let task_metadata =
            tasks.iter().map(|task| TaskMetadata { name: task.name().to_string(), weight: task.weight() }).collect();
        let tasks: Arc<[Task]> = tasks.into();

        let result = self.run_tests(tasks).await;
        let metadata = RunMetadata {
            tasks: task_metadata,
            mode: format!("{:?}", self.config.mode),
            started_at: started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms: self.started_at.elapsed().as_millis(),
        };
        if let Some(output_path) = &self.config.output_path {
            ReportGenerator::write_report(output_path, &metadata, &self.stats, &self.records)?;
        }
        result?;
        Ok(RunSummary { stats: self.stats, records: self.records, metadata })
    }

    async fn run_tests(&mut self, tasks: Arc<[Task]>) -> anyhow::Result<()> {
        let mut error_rate = 0.0;
        let mut last_stats_at = Instant::now();

        self.started_at = Instant::now();
        while self.running.load(Ordering::Acquire) {
            let response_times = self.window_last_response_times.make_contiguous();
            if let Err(e) = self.mode.tick(response_times) {
                warn!("Stopping execution: {e}");
                break;
            }
            self.try_spawn_workers(&tasks)?;
            self.try_reset_stats();

            if self.try_receive_all() > 0 {
                let total = self.stats.total();
                error_rate = total.fail_ratio();
                if self.events_received >= MIN_ERROR_RATE_SAMPLES && error_rate > self.config.max_error_rate {
                    warn!(
                        "Error rate {error_rate:.2} is higher than maximum allowed ({:.2}), stopping execution",
                        self.config.max_error_rate
                    );
                    break;
                }
            }
            if last_stats_at.elapsed() >= self.config.stats_interval {
                ReportGenerator::log_stats(&self.stats, false);
                last_stats_at = Instant::now();
            }
            sleep(Duration::from_millis(10)).await;
        }
        self.running.store(false, Ordering::Release);

        info!("Waiting for all workers to finish...");
        let drain_started_at = Instant::now();
        while self.total_workers.load(Ordering::Acquire) > 0 {
            if drain_started_at.elapsed() >= self.config.drain_timeout {
                let pending = self.total_workers.swap(0, Ordering::AcqRel);
                warn!("Aborting {pending} workers that didn't finish within {:?}", self.config.drain_timeout);
                self.workers.abort_all();
                break;
            }
            self.try_receive_all();
            sleep(Duration::from_millis(10)).await;
        }
        self.try_receive_all();

        let total = self.stats.total();
        let (failed, requests) = (total.num_failures(), total.num_requests());
        let error_rate_percent = total.fail_ratio() * 100.0;
        info!("All workers finished, {failed}/{requests} ({error_rate_percent:.2}%) requests failed");
        ReportGenerator::log_stats(&self.stats, true);

        if self.events_received >= MIN_ERROR_RATE_SAMPLES && error_rate > self.config.max_error_rate {
            Err(RunnerError("error rate exceeded".to_string()).into())
        } else {
            Ok(())
        }
    }

    fn try_spawn_workers(&mut self, tasks: &Arc<[Task]>) -> anyhow::Result<()> {
        let target_workers = self.mode.target_workers();
        let total_workers = self.total_workers.swap(target_workers, Ordering::AcqRel);
        let missing_workers = target_workers.saturating_sub(total_workers);
        if missing_workers == 0 {
            return Ok(());
        }

        info!("Have {total_workers} workers, need to spawn {missing_workers} more");
        for _ in 0..missing_workers {
            let reporter = ChannelReporter::new(self.sender.clone());
            let worker = Worker::new(tasks.clone(), reporter, self.config.wait_time.clone(), self.running.clone())?;
            let total_workers = self.total_workers.clone();
            let running = self.running.clone();
            self.workers.spawn(Self::launch_worker(worker, running, total_workers));
        }

        Ok(())
    }

    fn try_reset_stats(&mut self) {
        if self.config.reset_stats && !self.stats_reset && self.mode.ramp_up_complete() {
            info!("All {} workers spawned, resetting stats", self.mode.target_workers());
            self.stats.reset();
            self.stats_reset = true;
        }
    }

    async fn launch_worker(worker: Worker<ChannelReporter>, running: Arc<AtomicBool>, total_workers: Arc<AtomicU32>) {
        log::debug!("Spawning new worker...");

        match worker.run().await {
            Ok(_) => log::debug!("Worker finished successfully"),
            Err(e) => error!("Worker finished with an error: {e}"),
        };
        // The count is zeroed when workers are aborted during the drain.
        let _ = total_workers.fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1));

        if running.swap(false, Ordering::AcqRel) {
            info!("Worker finished, stopping execution...");
        }
    }

    // Returns the number of events received.
    fn try_receive_all(&mut self) -> usize {
        let mut received: usize = 0;
        while let Ok(Some(event)) = self.receiver.try_next() {
            self.process_event(event);
            received = received.saturating_add(1);
        }
        received
    }

    fn process_event(&mut self, event: RequestEvent) {
        self.events_received = self.events_received.saturating_add(1);
        let timestamp = now_millis();
        let RequestEvent { test_name, request_type, outcome } = &event;
        match outcome {
            RequestOutcome::Success { response_time, content_length } => {
                self.stats.log_request(request_type, test_name, *response_time, *content_length, timestamp);
                match Duration::try_from_secs_f64(response_time / 1000.0) {
                    Ok(response_time) => {
                        if self.window_last_response_times.len() >= RESPONSE_TIME_WINDOW_SIZE {
                            self.window_last_response_times.pop_front();
                        }
                        self.window_last_response_times.push_back(response_time);
                    }
                    Err(_) => warn!("Ignoring invalid response time {response_time} for {request_type} {test_name}"),
                }
            }
            RequestOutcome::Failure { error } => {
                self.stats.log_request(request_type, test_name, event.measurement(), 0, timestamp);
                self.stats.log_error(request_type, test_name, error, timestamp);
            }
        }

        if !self.config.collect_records && self.config.output_path.is_none() {
            return;
        }
        let total_workers = self.total_workers.load(Ordering::Acquire);
        let record = EventRecord { event, elapsed_since_start: self.started_at.elapsed(), total_workers };
        self.records.push(record);
    }
}
