//! Test specifications.

use crate::{
    http::{HttpGetTask, HttpTaskConfig},
    runner::RunnerConfig,
    task::Task,
    wait_time::WaitTime,
};
use anyhow::{bail, Context};
use reqwest::Url;
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};

/// Test specification.
#[derive(Deserialize, Debug)]
pub struct TestSpec {
    /// The tasks executed by every worker.
    pub tasks: Vec<TaskSpec>,

    /// The maximum amount of time we want to run this for.
    #[serde(with = "humantime_serde", default)]
    pub max_test_duration: Option<Duration>,

    /// The maximum average response time we're willing to tolerate.
    #[serde(with = "humantime_serde", default = "default_max_response_time")]
    pub max_response_time: Duration,

    /// The maximum failure rate we're willing to tolerate before stopping the test.
    ///
    /// Note that this is a rate in the range 0-1.
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,

    /// The maximum number of workers, regardless of the increment mode.
    #[serde(default)]
    pub max_workers: Option<u32>,

    /// The worker increment mode.
    pub mode: WorkerIncrementMode,

    /// The start policy to use.
    #[serde(default = "default_start_policy")]
    pub start_policy: StartPolicy,

    /// The time workers wait after every task.
    #[serde(default)]
    pub wait_time: WaitTime,

    /// The interval at which statistics are printed.
    #[serde(with = "humantime_serde", default = "default_stats_interval")]
    pub stats_interval: Duration,

    /// Reset the statistics once all workers have been spawned, so that they only cover the steady
    /// state of the test.
    #[serde(default)]
    pub reset_stats: bool,

    /// How long to wait for running tasks once the test stops.
    #[serde(with = "humantime_serde", default = "default_drain_timeout")]
    pub drain_timeout: Duration,
}

impl TestSpec {
    /// Validate this spec.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tasks.is_empty() {
            bail!("at least one task is required");
        }
        if self.tasks.iter().any(|task| task.weight() == 0) {
            bail!("task weights must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.max_error_rate) {
            bail!("max error rate must be in the range 0-1");
        }
        if matches!(self.mode, WorkerIncrementMode::Steady { .. }) && self.max_test_duration.is_none() {
            bail!("steady mode requires max test duration");
        }
        self.mode.validate(self.max_workers)?;
        self.wait_time.validate()?;
        Ok(())
    }

    /// Build the tasks in this spec, optionally pointing every HTTP task to a different host.
    pub fn build_tasks(&self, host: Option<&str>) -> anyhow::Result<Vec<Task>> {
        self.tasks.iter().map(|spec| spec.build(host)).collect()
    }

    /// Build the runner configuration for this spec.
    pub fn runner_config(&self, output_path: Option<PathBuf>) -> RunnerConfig {
        RunnerConfig {
            output_path,
            max_test_duration: self.max_test_duration,
            max_response_time: self.max_response_time,
            max_error_rate: self.max_error_rate,
            max_workers: self.max_workers,
            mode: self.mode.clone(),
            wait_time: self.wait_time.clone(),
            stats_interval: self.stats_interval,
            reset_stats: self.reset_stats,
            collect_records: false,
            drain_timeout: self.drain_timeout,
        }
    }

    /// The URLs targeted by the HTTP tasks in this spec.
    pub fn target_urls(&self, host: Option<&str>) -> anyhow::Result<Vec<String>> {
        self.tasks
            .iter()
            .map(|task| match task {
                TaskSpec::HttpGet { config, .. } => resolve_url(&config.url, host),
            })
            .collect()
    }
}

/// A task definition.
#[derive(Deserialize, Clone, Debug)]
#[serde(tag = "type")]
pub enum TaskSpec {
    /// A single HTTP GET request.
    HttpGet {
        /// The request configuration.
        #[serde(flatten)]
        config: HttpTaskConfig,

        /// The task's weight.
        #[serde(default = "default_weight")]
        weight: u32,
    },
}

impl TaskSpec {
    /// The task's weight.
    pub fn weight(&self) -> u32 {
        match self {
            Self::HttpGet { weight, .. } => *weight,
        }
    }

    fn build(&self, host: Option<&str>) -> anyhow::Result<Task> {
        match self {
            Self::HttpGet { config, weight } => {
                let config = HttpTaskConfig { url: resolve_url(&config.url, host)?, ..config.clone() };
                let name = format!("GET {}", config.url);
                let task = HttpGetTask::new(config).context("building HTTP client")?;
                Ok(Task::new(name, task).with_weight(*weight))
            }
        }
    }
}

/// The mode in which the number of workers is incremented.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum WorkerIncrementMode {
    /// Manual mode where all configurations are up to the user.
    Manual {
        /// Initial number of workers.
        initial_workers: u32,

        /// Number of workers added on every increment.
        worker_increment: u32,

        /// Frequency at which workers are incremented.
        #[serde(with = "humantime_serde")]
        worker_increment_frequency: Duration,
    },

    /// Automatic mode that progressively pushes the number of workers up.
    Automatic,

    /// A mode that keeps the number of workers steady at a certain number.
    Steady {
        /// Number of workers to use.
        workers: u32,
    },

    /// Add `hatch_rate` workers every second until `max_workers` are running.
    Hatch {
        /// Number of workers added every second.
        hatch_rate: u32,

        /// Number of workers to stop at.
        max_workers: u32,
    },
}

impl WorkerIncrementMode {
    /// Check that this mode, capped at `max_workers`, ever runs a worker.
    pub fn validate(&self, max_workers: Option<u32>) -> anyhow::Result<()> {
        if max_workers == Some(0) {
            bail!("max workers must be greater than 0");
        }
        match self {
            Self::Manual { initial_workers: 0, worker_increment: 0, .. } => {
                bail!("manual mode needs initial workers or a worker increment")
            }
            Self::Steady { workers: 0 } => bail!("steady mode needs at least 1 worker"),
            Self::Hatch { hatch_rate: 0, .. } => bail!("hatch rate must be greater than 0"),
            Self::Hatch { max_workers: 0, .. } => bail!("hatch mode needs at least 1 worker"),
            _ => Ok(()),
        }
    }
}

/// The policy used to start the testing process.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub enum StartPolicy {
    /// Start immediately.
    StartImmediately,

    /// Wait until every target URL is reachable.
    WaitForTargets,
}

// Point `url` to `host`, keeping its path and query.
fn resolve_url(url: &str, host: Option<&str>) -> anyhow::Result<String> {
    let Some(host) = host else {
        return Ok(url.to_string());
    };
    let original = Url::parse(url).with_context(|| format!("invalid url: {url}"))?;
    let mut resolved = Url::parse(host).with_context(|| format!("invalid host: {host}"))?;
    resolved.set_path(original.path());
    resolved.set_query(original.query());
    Ok(resolved.to_string())
}

fn default_weight() -> u32 {
    1
}

fn default_max_response_time() -> Duration {
    Duration::from_secs(5)
}

fn default_max_error_rate() -> f64 {
    0.25
}

fn default_start_policy() -> StartPolicy {
    StartPolicy::StartImmediately
}

fn default_stats_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(10)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const FULL_SPEC: &str = r#"
tasks:
  - type: HttpGet
    test_name: index
    url: http://localhost:8080/
    weight: 3
    timeout: 5s
  - type: HttpGet
    url: http://localhost:8080/slow?delay=1
mode:
  type: Hatch
  hatch_rate: 4
  max_workers: 10
max_test_duration: 1m
max_error_rate: 0.5
start_policy: WaitForTargets
wait_time:
  type: Constant
  wait: 100ms
stats_interval: 5s
reset_stats: true
drain_timeout: 1s
"#;

    fn parse(spec: &str) -> TestSpec {
        serde_yaml::from_str(spec).expect("invalid spec")
    }

    #[test]
    fn full_spec() {
        let spec = parse(FULL_SPEC);
        spec.validate().expect("validation failed");
        assert_eq!(spec.mode, WorkerIncrementMode::Hatch { hatch_rate: 4, max_workers: 10 });
        assert_eq!(spec.max_test_duration, Some(Duration::from_secs(60)));
        assert_eq!(spec.max_response_time, Duration::from_secs(5));
        assert_eq!(spec.max_error_rate, 0.5);
        assert_eq!(spec.start_policy, StartPolicy::WaitForTargets);
        assert_eq!(spec.wait_time, WaitTime::Constant { wait: Duration::from_millis(100) });
        assert_eq!(spec.stats_interval, Duration::from_secs(5));
        assert!(spec.reset_stats);
        assert_eq!(spec.drain_timeout, Duration::from_secs(1));

        let TaskSpec::HttpGet { config, weight } = &spec.tasks[0];
        assert_eq!(config.test_name, "index");
        assert_eq!(config.request_type, "http");
        assert_eq!(config.timeout, Some(Duration::from_secs(5)));
        assert_eq!(*weight, 3);

        let TaskSpec::HttpGet { config, weight } = &spec.tasks[1];
        assert_eq!(config.test_name, "demo");
        assert_eq!(config.timeout, Some(crate::http::DEFAULT_TIMEOUT));
        assert_eq!(*weight, 1);
    }

    #[test]
    fn minimal_spec_defaults() {
        let spec = parse("tasks:\n  - type: HttpGet\nmode:\n  type: Automatic\n");
        spec.validate().expect("validation failed");
        assert_eq!(spec.max_error_rate, 0.25);
        assert_eq!(spec.start_policy, StartPolicy::StartImmediately);
        assert_eq!(spec.wait_time, WaitTime::None);
        assert_eq!(spec.stats_interval, Duration::from_secs(2));
        assert!(!spec.reset_stats);
        assert_eq!(spec.drain_timeout, Duration::from_secs(10));
        let TaskSpec::HttpGet { config, .. } = &spec.tasks[0];
        assert_eq!(config, &HttpTaskConfig::default());
    }

    #[rstest]
    #[case::no_tasks("tasks: []\nmode:\n  type: Automatic\n")]
    #[case::zero_weight("tasks:\n  - type: HttpGet\n    weight: 0\nmode:\n  type: Automatic\n")]
    #[case::steady_without_duration("tasks:\n  - type: HttpGet\nmode:\n  type: Steady\n  workers: 2\n")]
    #[case::zero_hatch_rate("tasks:\n  - type: HttpGet\nmode:\n  type: Hatch\n  hatch_rate: 0\n  max_workers: 1\n")]
    #[case::zero_steady_workers(
        "tasks:\n  - type: HttpGet\nmode:\n  type: Steady\n  workers: 0\nmax_test_duration: 1s\n"
    )]
    #[case::zero_hatch_workers("tasks:\n  - type: HttpGet\nmode:\n  type: Hatch\n  hatch_rate: 1\n  max_workers: 0\n")]
    #[case::zero_manual_workers(
        "tasks:\n  - type: HttpGet\nmode:\n  type: Manual\n  initial_workers: 0\n  worker_increment: 0\n  \
         worker_increment_frequency: 1s\n"
    )]
    #[case::zero_max_workers("tasks:\n  - type: HttpGet\nmode:\n  type: Automatic\nmax_workers: 0\n")]
    #[case::bad_error_rate("tasks:\n  - type: HttpGet\nmode:\n  type: Automatic\nmax_error_rate: 2.0\n")]
    #[case::bad_wait_time(
        "tasks:\n  - type: HttpGet\nmode:\n  type: Automatic\nwait_time:\n  type: Between\n  min: 2s\n  max: 1s\n"
    )]
    fn invalid_specs(#[case] spec: &str) {
        assert!(parse(spec).validate().is_err());
    }

    #[rstest]
    #[case("http://localhost:8080/", None, "http://localhost:8080/")]
    #[case("http://localhost:8080/foo?x=1", Some("https://example.com:9000"), "https://example.com:9000/foo?x=1")]
    #[case("http://localhost:8080/", Some("http://127.0.0.1:1234/ignored"), "http://127.0.0.1:1234/")]
    fn url_resolution(#[case] url: &str, #[case] host: Option<&str>, #[case] expected: &str) {
        assert_eq!(resolve_url(url, host).expect("resolution failed"), expected);
    }

    #[test]
    fn build_tasks() {
        let spec = parse(FULL_SPEC);
        let tasks = spec.build_tasks(Some("http://10.0.0.1:80")).expect("building tasks failed");
        let names: Vec<_> = tasks.iter().map(|task| (task.name().to_string(), task.weight())).collect();
        assert_eq!(
            names,
            vec![("GET http://10.0.0.1/".to_string(), 3), ("GET http://10.0.0.1/slow?delay=1".to_string(), 1)]
        );
    }
}
