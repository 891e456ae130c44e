//! The runner mode.

use crate::spec::WorkerIncrementMode;
use anyhow::bail;
use std::time::{Duration, Instant};

const RESPONSE_TIME_CHECK_WINDOW_SIZE: usize = 10;
const MAX_RESPONSE_TIME_CHECK_FREQUENCY: Duration = Duration::from_secs(5);
const DEFAULT_AUTOMATIC_MODE_WORKERS: u32 = 5;
const HATCH_FREQUENCY: Duration = Duration::from_secs(1);

// Automatic mode increments the number of workers every 10 seconds by 20%.
const DEFAULT_AUTOMATIC_MODE_INCREMENT_RATIO: f64 = 0.2;
const DEFAULT_AUTOMATIC_MODE_INCREMENT_FREQUENCY: Duration = Duration::from_secs(10);

/// The mode the runner is using.
pub struct RunnerMode {
    worker_increment_mode: WorkerIncrementMode,
    target_workers: u32,
    max_workers: u32,
    max_test_duration: Option<Duration>,
    max_response_time: Duration,
    started_at: Instant,
    last_increment_at: Instant,
    last_response_time_validation_at: Instant,
}

impl RunnerMode {
    /// Construct a new runner mode.
    pub fn new(
        worker_increment_mode: WorkerIncrementMode,
        max_test_duration: Option<Duration>,
        max_response_time: Duration,
        max_workers: Option<u32>,
    ) -> Self {
        use WorkerIncrementMode::*;
        let max_workers = match &worker_increment_mode {
            Hatch { max_workers: hatch_max, .. } => max_workers.map_or(*hatch_max, |max| max.min(*hatch_max)),
            _ => max_workers.unwrap_or(u32::MAX),
        };
        let target_workers = match &worker_increment_mode {
            Manual { initial_workers, .. } => *initial_workers,
            Automatic => DEFAULT_AUTOMATIC_MODE_WORKERS,
            Steady { workers } => *workers,
            Hatch { hatch_rate, .. } => *hatch_rate,
        };
        let now = Instant::now();
        Self {
            worker_increment_mode,
            target_workers: target_workers.min(max_workers),
            max_workers,
            max_test_duration,
            max_response_time,
            started_at: now,
            last_increment_at: now,
            last_response_time_validation_at: now,
        }
    }

    /// The current target worker count.
    pub fn target_workers(&self) -> u32 {
        self.target_workers
    }

    /// Whether the worker count has reached its final value.
    ///
    /// Modes that grow without a cap never complete their ramp up.
    pub fn ramp_up_complete(&self) -> bool {
        match self.worker_increment_mode {
            WorkerIncrementMode::Steady { .. } => true,
            _ => self.target_workers >= self.max_workers,
        }
    }

    /// Ticks the runner mode to perform any state updates.
    ///
    /// `response_times` holds the most recent successful response times, oldest first.
    pub fn tick(&mut self, response_times: &[Duration]) -> anyhow::Result<()> {
        let target_frequency = match self.worker_increment_mode {
            WorkerIncrementMode::Manual { worker_increment_frequency, .. } => worker_increment_frequency,
            WorkerIncrementMode::Automatic => DEFAULT_AUTOMATIC_MODE_INCREMENT_FREQUENCY,
            WorkerIncrementMode::Steady { .. } => Duration::MAX,
            WorkerIncrementMode::Hatch { .. } => HATCH_FREQUENCY,
        };
        if self.last_increment_at.elapsed() >= target_frequency {
            self.increment_workers();
            self.last_increment_at = Instant::now();
        }
        if self.last_response_time_validation_at.elapsed() >= MAX_RESPONSE_TIME_CHECK_FREQUENCY {
            self.validate_max_response_time(response_times)?;
            self.last_response_time_validation_at = Instant::now();
        }
        let elapsed = self.started_at.elapsed();
        let max_duration = self.max_test_duration.unwrap_or(Duration::MAX);
        if elapsed > max_duration {
            bail!("test has been running for longer than the configured time limit: {elapsed:?} > {max_duration:?}");
        }
        Ok(())
    }

    // Validate that the last N response times don't average more than our max allowed one.
    fn validate_max_response_time(&self, response_times: &[Duration]) -> anyhow::Result<()> {
        let window_size = response_times.len().min(RESPONSE_TIME_CHECK_WINDOW_SIZE) as u32;
        if window_size == 0 {
            return Ok(());
        }
        let window_total = response_times
            .iter()
            .rev()
            .take(RESPONSE_TIME_CHECK_WINDOW_SIZE)
            .try_fold(Duration::ZERO, |total, response_time| total.checked_add(*response_time))
            .unwrap_or(Duration::MAX);
        let window_mean = window_total.checked_div(window_size).unwrap_or(Duration::ZERO);
        if window_mean >= self.max_response_time {
            bail!("response time ({:?}) is beyond the maximum allowed ({:?})", window_mean, self.max_response_time)
        } else {
            Ok(())
        }
    }

    fn increment_workers(&mut self) {
        use WorkerIncrementMode::*;
        let increment = match self.worker_increment_mode {
            Manual { worker_increment, .. } => worker_increment,
            Automatic => (self.target_workers as f64 * DEFAULT_AUTOMATIC_MODE_INCREMENT_RATIO).ceil() as u32,
            Steady { .. } => 0,
            Hatch { hatch_rate, .. } => hatch_rate,
        };
        self.target_workers = self.target_workers.saturating_add(increment).min(self.max_workers);
    }
}
