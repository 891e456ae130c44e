//! Reporting for executed tests.

use crate::events::RequestEvent;
use csv::Writer;
use log::info;
use request_stats::{
    table::{error_table, percentile_table, stats_table},
    RequestStats, StatsError, StatsRow,
};
use serde::Serialize;
use std::{fs, path::Path, time::Duration};

/// A published event along with the runner state at the time it was received.
#[derive(Clone, Debug)]
pub struct EventRecord {
    /// The event.
    pub event: RequestEvent,

    /// The amount of time elapsed since the entire load test execution began.
    pub elapsed_since_start: Duration,

    /// The number of workers that were running at the time this event was received.
    pub total_workers: u32,
}

/// Metadata about a run.
#[derive(Clone, Debug, Serialize)]
pub struct RunMetadata {
    /// The tasks executed.
    pub tasks: Vec<TaskMetadata>,

    /// The worker increment mode used.
    pub mode: String,

    /// When the run started, in RFC 3339 format.
    pub started_at: String,

    /// The run's duration in milliseconds.
    pub duration_ms: u128,
}

/// Metadata about a task.
#[derive(Clone, Debug, Serialize)]
pub struct TaskMetadata {
    /// The task's name.
    pub name: String,

    /// The task's weight.
    pub weight: u32,
}

#[derive(Serialize)]
struct Report<'a> {
    metadata: &'a RunMetadata,
    stats: Vec<StatsRow>,
    errors: Vec<&'a StatsError>,
    content: String,
}

/// A report generator.
pub struct ReportGenerator;

impl ReportGenerator {
    /// Write the report into the given file path.
    pub fn write_report(
        output_path: &Path,
        metadata: &RunMetadata,
        stats: &RequestStats,
        records: &[EventRecord],
    ) -> anyhow::Result<()> {
        let content = Self::serialize_records(records)?;
        let report = Report { metadata, stats: stats.rows(), errors: stats.errors().collect(), content };
        fs::write(output_path, serde_json::to_string(&report)?)?;

        info!("Load test report has been saved successfully to {output_path:?}");
        Ok(())
    }

    /// Log the statistics tables.
    ///
    /// The final summary uses rates for the entire run and includes percentiles and errors.
    pub fn log_stats(stats: &RequestStats, final_summary: bool) {
        for line in Self::stats_lines(stats, final_summary) {
            info!("{line}");
        }
    }

    // Periodic logs are skipped until the first request comes in.
    fn stats_lines(stats: &RequestStats, final_summary: bool) -> Vec<String> {
        if !final_summary && stats.is_empty() {
            return Vec::new();
        }
        let mut lines = stats_table(stats, !final_summary);
        if final_summary {
            lines.push(String::new());
            lines.extend(percentile_table(stats));
            lines.push(String::new());
            lines.extend(error_table(stats));
        }
        lines
    }

    fn serialize_records(records: &[EventRecord]) -> anyhow::Result<String> {
        let mut writer = Writer::from_writer(vec![]);
        writer.write_record(["Id", "Elapsed", "Total workers", "Kind", "Type", "Name", "Response time", "Detail"])?;
        for (index, record) in records.iter().enumerate() {
            let EventRecord { event, elapsed_since_start, total_workers } = record;
            writer.write_record(&[
                index.to_string(),
                elapsed_since_start.as_millis().to_string(),
                total_workers.to_string(),
                event.kind().to_string(),
                event.request_type.clone(),
                event.test_name.clone(),
                event.measurement().to_string(),
                event.detail().to_string(),
            ])?;
        }
        let buffer = writer.into_inner()?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn records() -> Vec<EventRecord> {
        vec![
            EventRecord {
                event: RequestEvent::success("demo", "http", 5.0, 100),
                elapsed_since_start: Duration::from_millis(10),
                total_workers: 1,
            },
            EventRecord {
                event: RequestEvent::failure("demo", "http", "connection refused"),
                elapsed_since_start: Duration::from_millis(20),
                total_workers: 2,
            },
        ]
    }

    #[test]
    fn records_csv() {
        let csv = ReportGenerator::serialize_records(&records()).expect("serialization failed");
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Id,Elapsed,Total workers,Kind,Type,Name,Response time,Detail",
                "0,10,1,request_success,http,demo,5,100",
                "1,20,2,request_failure,http,demo,0,connection refused",
            ]
        );
    }

    #[test]
    fn write_report() {
        let mut stats = RequestStats::new();
        stats.log_request("http", "demo", 5.0, 100, 0);
        stats.log_request("http", "demo", 0.0, 0, 0);
        stats.log_error("http", "demo", "connection refused", 0);
        let metadata = RunMetadata {
            tasks: vec![TaskMetadata { name: "GET /".into(), weight: 1 }],
            mode: "Steady".into(),
            started_at: "2024-01-01T00:00:00.000Z".into(),
            duration_ms: 1000,
        };
        let directory = tempfile::tempdir().expect("creating temp dir failed");
        let path = directory.path().join("report.json");

        ReportGenerator::write_report(&path, &metadata, &stats, &records()).expect("writing report failed");

        let report: Value = serde_json::from_str(&fs::read_to_string(&path).expect("reading report failed"))
            .expect("invalid json");
        assert_eq!(report["metadata"]["tasks"][0]["name"], "GET /");
        assert_eq!(report["stats"].as_array().map(Vec::len), Some(2));
        assert_eq!(report["stats"][1]["name"], "Aggregated");
        assert_eq!(report["errors"][0]["occurrences"], 1);
        assert!(report["content"].as_str().is_some_and(|content| content.lines().count() == 3));
    }

    #[test]
    fn stats_lines() {
        let mut stats = RequestStats::new();
        assert!(ReportGenerator::stats_lines(&stats, false).is_empty());
        assert!(!ReportGenerator::stats_lines(&stats, true).is_empty());

        stats.log_request("http", "demo", 5.0, 100, 0);
        let periodic = ReportGenerator::stats_lines(&stats, false);
        assert!(periodic.iter().any(|line| line.contains("demo")));
        let summary = ReportGenerator::stats_lines(&stats, true);
        assert!(summary.len() > periodic.len());
    }
}
