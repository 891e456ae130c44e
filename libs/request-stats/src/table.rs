//! Console tables for request statistics.

use crate::{RequestStats, StatsEntry};

const TYPE_WIDTH: usize = 8;
const NAME_WIDTH: usize = 50;
const ERROR_WIDTH: usize = 100;

/// The percentiles shown in [`percentile_table`].
pub const PERCENTILES_TO_REPORT: &[f64] = &[0.50, 0.66, 0.75, 0.80, 0.90, 0.95, 0.98, 0.99, 0.999, 0.9999, 1.0];

/// The request statistics table.
///
/// When `current` is set the rates are the ones for the last few seconds, otherwise they cover the whole run.
pub fn stats_table(stats: &RequestStats, current: bool) -> Vec<String> {
    let mut lines = vec![format!(
        "{:<TYPE_WIDTH$} {:<NAME_WIDTH$} {:>7} {:>12} |{:>7} {:>7} {:>7}{:>7} | {:>7} {:>11}",
        "Type", "Name", "# reqs", "# fails", "Avg", "Min", "Max", "Med", "req/s", "failures/s"
    )];
    let separator = format!(
        "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
        "-".repeat(TYPE_WIDTH),
        "-".repeat(NAME_WIDTH),
        "-".repeat(7),
        "-".repeat(13),
        "-".repeat(7),
        "-".repeat(7),
        "-".repeat(7),
        "-".repeat(7),
        "-".repeat(8),
        "-".repeat(11)
    );
    lines.push(separator.clone());
    lines.extend(stats.entries().map(|entry| stats_line(entry, current)));
    lines.push(separator);
    lines.push(stats_line(stats.total(), current));
    lines
}

fn stats_line(entry: &StatsEntry, current: bool) -> String {
    let (rps, fail_per_sec) = if current {
        (entry.current_rps(), entry.current_fail_per_sec())
    } else {
        (entry.total_rps(), entry.total_fail_per_sec())
    };
    let failures = format!("{}({:.2}%)", entry.num_failures(), entry.fail_ratio() * 100.0);
    format!(
        "{:<TYPE_WIDTH$} {:<NAME_WIDTH$} {:>7} {:>12} |{:>7.0} {:>7.0} {:>7.0}{:>7} | {:>7.2} {:>11.2}",
        entry.request_type(),
        entry.name(),
        entry.num_requests(),
        failures,
        entry.avg_response_time(),
        entry.min_response_time().unwrap_or_default(),
        entry.max_response_time(),
        entry.median_response_time(),
        rps,
        fail_per_sec,
    )
}

/// The response time percentiles table.
pub fn percentile_table(stats: &RequestStats) -> Vec<String> {
    let mut header = format!("{:<TYPE_WIDTH$} {:<NAME_WIDTH$} {:>8}", "Type", "Name", "# reqs");
    for percentile in PERCENTILES_TO_REPORT {
        header.push_str(&format!(" {:>6}", readable_percentile(*percentile)));
    }
    let mut separator = format!("{}|{}|{}", "-".repeat(TYPE_WIDTH), "-".repeat(NAME_WIDTH), "-".repeat(8));
    for _ in PERCENTILES_TO_REPORT {
        separator.push('|');
        separator.push_str(&"-".repeat(6));
    }

    let mut lines = vec!["Response time percentiles (approximated)".to_string(), header, separator.clone()];
    lines.extend(stats.entries().filter(|entry| !entry.response_times().is_empty()).map(percentile_line));
    lines.push(separator);
    if !stats.total().response_times().is_empty() {
        lines.push(percentile_line(stats.total()));
    }
    lines
}

fn percentile_line(entry: &StatsEntry) -> String {
    let mut line =
        format!("{:<TYPE_WIDTH$} {:<NAME_WIDTH$} {:>8}", entry.request_type(), entry.name(), entry.num_requests());
    for percentile in PERCENTILES_TO_REPORT {
        line.push_str(&format!(" {:>6}", entry.response_time_percentile(*percentile)));
    }
    line
}

/// The error report table. Empty if no errors were seen.
pub fn error_table(stats: &RequestStats) -> Vec<String> {
    let mut errors = stats.errors().peekable();
    if errors.peek().is_none() {
        return Vec::new();
    }
    let separator = format!("{}|{}", "-".repeat(18), "-".repeat(ERROR_WIDTH));
    let header = format!("{:<18} {:<ERROR_WIDTH$}", "# occurrences", "Error");
    let mut lines = vec!["Error report".to_string(), header, separator.clone()];
    for error in errors {
        let description = format!("{} {}: {}", error.request_type, error.name, error.message);
        lines.push(format!("{:<18} {:<ERROR_WIDTH$}", error.occurrences, description));
    }
    lines.push(separator);
    lines
}

#[allow(clippy::arithmetic_side_effects)]
fn readable_percentile(percentile: f64) -> String {
    let percent = (percentile * 100.0 * 1e6).round() / 1e6;
    format!("{percent}%")
}
