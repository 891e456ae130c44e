//! Request statistics for load tests.
//!
//! Every request published by a load test task is logged into a [`RequestStats`] instance, which keeps
//! a [`StatsEntry`] per request type and name, an aggregated entry across all of them and a table of
//! the errors seen.

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

pub mod entry;
pub mod table;

pub use entry::{StatsEntry, StatsRow};

use serde::Serialize;
use std::collections::BTreeMap;

/// The name used for the aggregated entry.
pub const AGGREGATED_NAME: &str = "Aggregated";

/// A request type and name pair.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct StatsKey {
    request_type: String,
    name: String,
}

/// An error seen during a load test.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsError {
    /// The request type label.
    pub request_type: String,

    /// The request name.
    pub name: String,

    /// The error message.
    pub message: String,

    /// The number of times this error was seen.
    pub occurrences: u64,
}

/// The statistics for all requests performed during a load test.
#[derive(Clone, Debug)]
pub struct RequestStats {
    entries: BTreeMap<StatsKey, StatsEntry>,
    errors: BTreeMap<(StatsKey, String), StatsError>,
    total: StatsEntry,
}

impl Default for RequestStats {
    fn default() -> Self {
        Self { entries: BTreeMap::new(), errors: BTreeMap::new(), total: StatsEntry::new("", AGGREGATED_NAME) }
    }
}

impl RequestStats {
    /// Construct an empty set of statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Log a request.
    pub fn log_request(
        &mut self,
        request_type: &str,
        name: &str,
        response_time: f64,
        content_length: u64,
        timestamp_ms: i64,
    ) {
        self.entry_mut(request_type, name).log(response_time, content_length, timestamp_ms);
        self.total.log(response_time, content_length, timestamp_ms);
    }

    /// Log an error for a request.
    ///
    /// This only accounts for the failure, the request itself must be logged via
    /// [`RequestStats::log_request`].
    pub fn log_error(&mut self, request_type: &str, name: &str, message: &str, timestamp_ms: i64) {
        self.entry_mut(request_type, name).log_error(timestamp_ms);
        self.total.log_error(timestamp_ms);

        let key = (Self::key(request_type, name), message.to_string());
        let error = self.errors.entry(key).or_insert_with(|| StatsError {
            request_type: request_type.to_string(),
            name: name.to_string(),
            message: message.to_string(),
            occurrences: 0,
        });
        error.occurrences = error.occurrences.saturating_add(1);
    }

    /// Get the entry for the given request type and name, if any request was logged for it.
    pub fn entry(&self, request_type: &str, name: &str) -> Option<&StatsEntry> {
        self.entries.get(&Self::key(request_type, name))
    }

    /// All entries, sorted by request type and name.
    pub fn entries(&self) -> impl Iterator<Item = &StatsEntry> {
        self.entries.values()
    }

    /// The errors seen, sorted by request type, name and message.
    pub fn errors(&self) -> impl Iterator<Item = &StatsError> {
        self.errors.values()
    }

    /// The entry aggregating every request.
    pub fn total(&self) -> &StatsEntry {
        &self.total
    }

    /// Whether no request has been logged yet.
    pub fn is_empty(&self) -> bool {
        self.total.num_requests() == 0
    }

    /// Summary rows for every entry followed by the aggregated one.
    pub fn rows(&self) -> Vec<StatsRow> {
        self.entries().chain([&self.total]).map(StatsEntry::to_row).collect()
    }

    /// Clear all statistics.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn entry_mut(&mut self, request_type: &str, name: &str) -> &mut StatsEntry {
        self.entries.entry(Self::key(request_type, name)).or_insert_with(|| StatsEntry::new(request_type, name))
    }

    fn key(request_type: &str, name: &str) -> StatsKey {
        StatsKey { request_type: request_type.to_string(), name: name.to_string() }
    }
}
