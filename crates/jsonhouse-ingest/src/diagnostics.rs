//! Log throttling for the ingest hot path
//!
//! Both helpers are owned by an [`IngestProcessor`](crate::IngestProcessor)
//! instance rather than being process globals.

use crate::error::ExecutionError;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, warn};

const DEDUP_CAPACITY: usize = 10_000;

/// Logs each distinct warning once.
#[derive(Default)]
pub struct DedupLog {
    seen: Mutex<HashSet<String>>,
}

impl DedupLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits `message` at warn level unless it was already emitted.
    /// Returns whether it was logged.
    pub fn warn_once(&self, table: &str, message: &str) -> bool {
        let key = format!("{}:{}", table, message);
        let mut seen = self.seen.lock();
        if seen.contains(&key) {
            return false;
        }
        if seen.len() >= DEDUP_CAPACITY {
            seen.clear();
        }
        seen.insert(key);
        drop(seen);
        warn!(table = %table, "{}", message);
        true
    }
}

const MAX_ERROR_LOGS: u64 = 50;
const FULL_QUERY_THRESHOLD: u64 = 5;
const MAX_QUERY_LENGTH: usize = 100;
const SUMMARY_INTERVAL: u64 = 1000;

/// How a single execution failure was reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorLogDecision {
    Full,
    Truncated,
    Summary,
    Suppressed,
}

/// Bounds error log volume during sustained backend outages: the first few
/// failures carry the full statement, later ones a truncated statement,
/// after that only a periodic summary.
#[derive(Default)]
pub struct ErrorLogLimiter {
    count: AtomicU64,
}

impl ErrorLogLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn record(&self, statement: &str, err: &ExecutionError) -> ErrorLogDecision {
        if statement.starts_with("CREATE") {
            error!(error = %err, statement = %statement, "error executing DDL");
        }

        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if count < MAX_ERROR_LOGS {
            if count > FULL_QUERY_THRESHOLD {
                let shown = truncate(statement, MAX_QUERY_LENGTH);
                error!(error = %err, statement = %shown, "error executing ingest statement");
                ErrorLogDecision::Truncated
            } else {
                error!(error = %err, statement = %statement, "error executing ingest statement");
                ErrorLogDecision::Full
            }
        } else if count % SUMMARY_INTERVAL == 0 {
            let shown = truncate(statement, MAX_QUERY_LENGTH);
            error!(
                total_errors = count,
                last_error = %err,
                last_statement = %shown,
                "errors executing ingest statements"
            );
            ErrorLogDecision::Summary
        } else {
            ErrorLogDecision::Suppressed
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut shown: String = text.chars().take(max_chars).collect();
    shown.push_str("...");
    shown
}
