//! Column promotion heuristic
//!
//! Small tables (and the common table) promote every new field. Large
//! tables never do. In between, a field is promoted once it was seen
//! `field_frequency` times within one window; the window restarts every
//! `always_add_column_limit` ingest calls.

use crate::config::PromotionThresholds;
use jsonhouse_schema::{Table, COMMON_TABLE_NAME};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Default)]
struct Window {
    calls: u64,
    counts: HashMap<(String, String), u64>,
}

/// Engine-owned promotion state
pub struct Promoter {
    thresholds: PromotionThresholds,
    window: Mutex<Window>,
}

impl Promoter {
    pub fn new(thresholds: PromotionThresholds) -> Self {
        Self {
            thresholds,
            window: Mutex::new(Window::default()),
        }
    }

    /// Counts one ingest call against `table` carrying the non-schema
    /// `keys`, and returns the indices of the keys to promote.
    pub fn should_promote(&self, table: &Table, keys: &[String]) -> Vec<usize> {
        let column_count = table.column_count();
        let is_common = table.name == COMMON_TABLE_NAME;
        let mut window = self.window.lock();
        window.calls += 1;

        if is_common && column_count > self.thresholds.alter_column_upper_limit {
            warn!(
                table = %table.name,
                columns = column_count,
                "common table exceeds the column limit"
            );
        }
        if column_count < self.thresholds.always_add_column_limit || is_common {
            return (0..keys.len()).collect();
        }
        if column_count > self.thresholds.alter_column_upper_limit {
            return Vec::new();
        }

        let window_size = self.thresholds.always_add_column_limit as u64;
        let mut promoted = Vec::new();
        for (index, key) in keys.iter().enumerate() {
            let counter = window
                .counts
                .entry((table.name.clone(), key.clone()))
                .or_insert(0);
            *counter += 1;
            let seen = *counter;
            if window.calls >= window_size {
                window.calls = 0;
                window.counts.clear();
            }
            if seen >= self.thresholds.field_frequency {
                debug!(table = %table.name, field = %key, seen, "promoting field");
                promoted.push(index);
            }
        }
        promoted
    }
}
