//! Statistics for a single request type and name pair.

use serde::Serialize;
use std::collections::BTreeMap;

// The window used to compute current rates, as offsets from the last request's second.
const CURRENT_WINDOW_START_OFFSET: i64 = 12;
const CURRENT_WINDOW_END_OFFSET: i64 = 2;

/// The statistics gathered for a request type and name.
#[derive(Clone, Debug, Default)]
pub struct StatsEntry {
    request_type: String,
    name: String,
    num_requests: u64,
    num_failures: u64,
    total_response_time: f64,
    min_response_time: Option<f64>,
    max_response_time: f64,
    total_content_length: u64,

    // Rounded response time in milliseconds -> number of requests.
    response_times: BTreeMap<u64, u64>,

    // Second since epoch -> number of requests/failures.
    requests_per_sec: BTreeMap<i64, u64>,
    failures_per_sec: BTreeMap<i64, u64>,

    start_time_ms: Option<i64>,
    last_request_ms: Option<i64>,
}

impl StatsEntry {
    /// Construct a new, empty entry.
    pub fn new(request_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self { request_type: request_type.into(), name: name.into(), ..Default::default() }
    }

    /// The request type label, e.g. `http`.
    pub fn request_type(&self) -> &str {
        &self.request_type
    }

    /// The request name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The number of requests logged, including failed ones.
    pub fn num_requests(&self) -> u64 {
        self.num_requests
    }

    /// The number of failed requests.
    pub fn num_failures(&self) -> u64 {
        self.num_failures
    }

    /// The smallest response time seen, in milliseconds.
    pub fn min_response_time(&self) -> Option<f64> {
        self.min_response_time
    }

    /// The largest response time seen, in milliseconds.
    pub fn max_response_time(&self) -> f64 {
        self.max_response_time
    }

    /// The total number of bytes received.
    pub fn total_content_length(&self) -> u64 {
        self.total_content_length
    }

    /// The number of requests per rounded response time.
    pub fn response_times(&self) -> &BTreeMap<u64, u64> {
        &self.response_times
    }

    /// Log a request that took `response_time` milliseconds and returned `content_length` bytes.
    ///
    /// Negative and non-finite response times are logged as 0.
    #[allow(clippy::arithmetic_side_effects)]
    pub fn log(&mut self, response_time: f64, content_length: u64, timestamp_ms: i64) {
        let response_time = if response_time.is_finite() { response_time.max(0.0) } else { 0.0 };
        self.num_requests = self.num_requests.saturating_add(1);
        self.log_time_of_request(timestamp_ms);

        self.total_response_time += response_time;
        let min = self.min_response_time.map_or(response_time, |min| min.min(response_time));
        self.min_response_time = Some(min);
        self.max_response_time = self.max_response_time.max(response_time);

        let count = self.response_times.entry(round_response_time(response_time)).or_default();
        *count = count.saturating_add(1);
        self.total_content_length = self.total_content_length.saturating_add(content_length);
    }

    /// Log a failure. The request itself is expected to be logged via [`StatsEntry::log`].
    pub fn log_error(&mut self, timestamp_ms: i64) {
        self.num_failures = self.num_failures.saturating_add(1);
        let count = self.failures_per_sec.entry(timestamp_ms.div_euclid(1000)).or_default();
        *count = count.saturating_add(1);
    }

    fn log_time_of_request(&mut self, timestamp_ms: i64) {
        let count = self.requests_per_sec.entry(timestamp_ms.div_euclid(1000)).or_default();
        *count = count.saturating_add(1);
        self.start_time_ms.get_or_insert(timestamp_ms);
        self.last_request_ms = Some(timestamp_ms);
    }

    /// The ratio of failed requests, in the range 0-1.
    pub fn fail_ratio(&self) -> f64 {
        match (self.num_requests, self.num_failures) {
            (0, 0) => 0.0,
            (0, _) => 1.0,
            (requests, failures) => failures as f64 / requests as f64,
        }
    }

    /// The average response time in milliseconds.
    pub fn avg_response_time(&self) -> f64 {
        if self.num_requests == 0 {
            0.0
        } else {
            self.total_response_time / self.num_requests as f64
        }
    }

    /// The average content length in bytes.
    pub fn avg_content_length(&self) -> f64 {
        if self.num_requests == 0 {
            0.0
        } else {
            self.total_content_length as f64 / self.num_requests as f64
        }
    }

    /// The median response time.
    ///
    /// This is computed over rounded response times so it is clamped into the exact min/max range.
    pub fn median_response_time(&self) -> u64 {
        let Some(median) = median_from_histogram(self.num_requests, &self.response_times) else {
            return 0;
        };
        let max = self.max_response_time.round() as u64;
        let min = self.min_response_time.unwrap_or_default().round() as u64;
        median.clamp(min, max.max(min))
    }

    /// The response time under which `percent` (0-1) of the requests finished.
    #[allow(clippy::arithmetic_side_effects)]
    pub fn response_time_percentile(&self, percent: f64) -> u64 {
        let target = (self.num_requests as f64 * percent).floor() as u64;
        let mut processed: u64 = 0;
        for (response_time, count) in self.response_times.iter().rev() {
            processed = processed.saturating_add(*count);
            if self.num_requests.saturating_sub(processed) <= target {
                return *response_time;
            }
        }
        0
    }

    /// The requests per second over the last few seconds.
    pub fn current_rps(&self) -> f64 {
        self.current_rate(&self.requests_per_sec)
    }

    /// The failures per second over the last few seconds.
    pub fn current_fail_per_sec(&self) -> f64 {
        self.current_rate(&self.failures_per_sec)
    }

    /// The requests per second since the first request.
    pub fn total_rps(&self) -> f64 {
        self.total_rate(self.num_requests)
    }

    /// The failures per second since the first request.
    pub fn total_fail_per_sec(&self) -> f64 {
        self.total_rate(self.num_failures)
    }

    #[allow(clippy::arithmetic_side_effects)]
    fn current_rate(&self, buckets: &BTreeMap<i64, u64>) -> f64 {
        let (Some(start), Some(last)) = (self.start_time_ms, self.last_request_ms) else {
            return 0.0;
        };
        let (start, last) = (start.div_euclid(1000), last.div_euclid(1000));
        let window_start = last.saturating_sub(CURRENT_WINDOW_START_OFFSET).max(start);
        let window_end = last.saturating_sub(CURRENT_WINDOW_END_OFFSET);
        if window_end <= window_start {
            return 0.0;
        }
        let total: u64 = (window_start..window_end).map(|second| buckets.get(&second).copied().unwrap_or(0)).sum();
        total as f64 / (window_end - window_start) as f64
    }

    #[allow(clippy::arithmetic_side_effects)]
    fn total_rate(&self, count: u64) -> f64 {
        let (Some(start), Some(last)) = (self.start_time_ms, self.last_request_ms) else {
            return 0.0;
        };
        let elapsed = last.saturating_sub(start);
        if elapsed <= 0 {
            0.0
        } else {
            count as f64 / (elapsed as f64 / 1000.0)
        }
    }

    /// Build a serializable summary of this entry.
    pub fn to_row(&self) -> StatsRow {
        StatsRow {
            request_type: self.request_type.clone(),
            name: self.name.clone(),
            num_requests: self.num_requests,
            num_failures: self.num_failures,
            avg_response_time: self.avg_response_time(),
            min_response_time: self.min_response_time.unwrap_or_default(),
            max_response_time: self.max_response_time,
            median_response_time: self.median_response_time(),
            avg_content_length: self.avg_content_length(),
            total_rps: self.total_rps(),
            total_fail_per_sec: self.total_fail_per_sec(),
        }
    }
}

/// A serializable summary of a [`StatsEntry`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsRow {
    /// The request type label.
    pub request_type: String,

    /// The request name.
    pub name: String,

    /// The number of requests.
    pub num_requests: u64,

    /// The number of failures.
    pub num_failures: u64,

    /// The average response time in milliseconds.
    pub avg_response_time: f64,

    /// The minimum response time in milliseconds.
    pub min_response_time: f64,

    /// The maximum response time in milliseconds.
    pub max_response_time: f64,

    /// The median response time in milliseconds.
    pub median_response_time: u64,

    /// The average content length in bytes.
    pub avg_content_length: f64,

    /// The requests per second over the whole run.
    pub total_rps: f64,

    /// The failures per second over the whole run.
    pub total_fail_per_sec: f64,
}

/// Round a response time so that the histogram stays small: 147 becomes 150, 3432 becomes 3400 and
/// 58760 becomes 59000.
pub fn round_response_time(response_time: f64) -> u64 {
    let precision = if response_time < 100.0 {
        1.0
    } else if response_time < 1000.0 {
        10.0
    } else if response_time < 10000.0 {
        100.0
    } else {
        1000.0
    };
    ((response_time / precision).round() * precision) as u64
}

#[allow(clippy::arithmetic_side_effects)]
fn median_from_histogram(total: u64, histogram: &BTreeMap<u64, u64>) -> Option<u64> {
    let mut position = (total.saturating_sub(1)) as f64 / 2.0;
    let mut last = None;
    for (response_time, count) in histogram {
        if position < *count as f64 {
            return Some(*response_time);
        }
        position -= *count as f64;
        last = Some(*response_time);
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn entry_with(response_times: &[f64]) -> StatsEntry {
        let mut entry = StatsEntry::new("http", "demo");
        for (index, response_time) in response_times.iter().enumerate() {
            entry.log(*response_time, 10, 1_000_000 + index as i64 * 100);
        }
        entry
    }

    #[rstest]
    #[case(0.0, 0)]
    #[case(57.4, 57)]
    #[case(147.0, 150)]
    #[case(3432.0, 3400)]
    #[case(58760.0, 59000)]
    fn rounding(#[case] response_time: f64, #[case] expected: u64) {
        assert_eq!(round_response_time(response_time), expected);
    }

    #[test]
    fn basic_aggregates() {
        let entry = entry_with(&[10.0, 20.0, 30.0]);
        assert_eq!(entry.num_requests(), 3);
        assert_eq!(entry.num_failures(), 0);
        assert_eq!(entry.min_response_time(), Some(10.0));
        assert_eq!(entry.max_response_time(), 30.0);
        assert_eq!(entry.avg_response_time(), 20.0);
        assert_eq!(entry.median_response_time(), 20);
        assert_eq!(entry.avg_content_length(), 10.0);
        assert_eq!(entry.total_content_length(), 30);
    }

    #[test]
    fn empty_entry() {
        let entry = StatsEntry::new("http", "demo");
        assert_eq!(entry.avg_response_time(), 0.0);
        assert_eq!(entry.median_response_time(), 0);
        assert_eq!(entry.fail_ratio(), 0.0);
        assert_eq!(entry.current_rps(), 0.0);
        assert_eq!(entry.total_rps(), 0.0);
    }

    #[test]
    fn median_is_clamped_to_exact_max() {
        // 147 is stored as 150 but the median can't be larger than the exact max.
        let entry = entry_with(&[147.0]);
        assert_eq!(entry.median_response_time(), 147);
    }

    #[rstest]
    #[case(0.5, 51)]
    #[case(0.9, 91)]
    #[case(1.0, 100)]
    fn percentiles(#[case] percent: f64, #[case] expected: u64) {
        let response_times: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        let entry = entry_with(&response_times);
        assert_eq!(entry.response_time_percentile(percent), expected);
    }

    #[test]
    fn fail_ratio() {
        let mut entry = entry_with(&[1.0, 1.0, 1.0, 1.0]);
        entry.log_error(1_000_000);
        assert_eq!(entry.fail_ratio(), 0.25);

        let mut entry = StatsEntry::new("http", "demo");
        entry.log_error(1_000_000);
        assert_eq!(entry.fail_ratio(), 1.0);
    }

    #[test]
    fn current_rps_uses_recent_window() {
        let mut entry = StatsEntry::new("http", "demo");
        // 4 requests per second for 20 seconds.
        for second in 0..20 {
            for _ in 0..4 {
                entry.log(5.0, 0, second * 1000);
            }
        }
        assert_eq!(entry.current_rps(), 4.0);
        assert_eq!(entry.current_fail_per_sec(), 0.0);
    }

    #[test]
    fn total_rps() {
        let mut entry = StatsEntry::new("http", "demo");
        entry.log(5.0, 0, 0);
        entry.log(5.0, 0, 1000);
        entry.log(5.0, 0, 2000);
        entry.log_error(2000);
        assert_eq!(entry.total_rps(), 1.5);
        assert_eq!(entry.total_fail_per_sec(), 0.5);
    }

    #[rstest]
    #[case::infinite(f64::INFINITY)]
    #[case::negative_infinite(f64::NEG_INFINITY)]
    #[case::nan(f64::NAN)]
    #[case::negative(-5.0)]
    fn invalid_response_times_are_zero(#[case] response_time: f64) {
        let mut entry = entry_with(&[10.0]);
        entry.log(response_time, 0, 0);
        assert_eq!(entry.num_requests(), 2);
        assert_eq!(entry.avg_response_time(), 5.0);
        assert_eq!(entry.min_response_time(), Some(0.0));
        assert_eq!(entry.max_response_time(), 10.0);
        assert_eq!(entry.response_times().get(&0), Some(&1));
    }
}
