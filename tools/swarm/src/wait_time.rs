//! Wait times between task executions.

use rand::Rng;
use serde::Deserialize;
use std::time::Duration;

/// The time a worker waits after running a task.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum WaitTime {
    /// Run the next task immediately.
    #[default]
    None,

    /// Wait a fixed amount of time.
    Constant {
        /// The time to wait.
        #[serde(with = "humantime_serde")]
        wait: Duration,
    },

    /// Wait a random amount of time in the given range.
    Between {
        /// The minimum time to wait.
        #[serde(with = "humantime_serde")]
        min: Duration,

        /// The maximum time to wait.
        #[serde(with = "humantime_serde")]
        max: Duration,
    },

    /// Wait so that tasks start once every `interval`, or immediately if the task took longer than that.
    ConstantPacing {
        /// The target time between task starts.
        #[serde(with = "humantime_serde")]
        interval: Duration,
    },
}

impl WaitTime {
    /// Compute the time to wait after a task that ran for `task_duration`.
    pub fn wait_after(&self, task_duration: Duration) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Constant { wait } => *wait,
            Self::Between { min, max } => {
                let spread = max.saturating_sub(*min);
                min.saturating_add(spread.mul_f64(rand::thread_rng().gen::<f64>()))
            }
            Self::ConstantPacing { interval } => interval.saturating_sub(task_duration),
        }
    }

    /// Check that this wait time is well formed.
    pub fn validate(&self) -> Result<(), InvalidWaitTime> {
        match self {
            Self::Between { min, max } if min > max => Err(InvalidWaitTime(format!("min {min:?} > max {max:?}"))),
            _ => Ok(()),
        }
    }
}

/// A wait time definition is invalid.
#[derive(Debug, thiserror::Error)]
#[error("invalid wait time: {0}")]
pub struct InvalidWaitTime(String);
