//! Seam between lowering and the column store

use crate::error::ExecutionError;
use crate::lowering::Lowered;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Per-statement backend settings, e.g. async insert options
pub type ExecutionSettings = BTreeMap<String, String>;

/// Executes lowered statements against a backend. Calls block until the
/// backend answered; statements of one batch are passed in order.
pub trait StatementExecutor: Send + Sync {
    fn execute(&self, statement: &Lowered, settings: &ExecutionSettings) -> Result<(), ExecutionError>;
}

/// Keeps every executed statement in memory.
#[derive(Default)]
pub struct RecordingExecutor {
    executed: Mutex<Vec<(Lowered, ExecutionSettings)>>,
    fail_matching: Mutex<Option<String>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statements whose text contains `needle` fail with a backend error.
    pub fn fail_when_contains(&self, needle: impl Into<String>) {
        *self.fail_matching.lock() = Some(needle.into());
    }

    pub fn executed(&self) -> Vec<Lowered> {
        self.executed.lock().iter().map(|(s, _)| s.clone()).collect()
    }

    /// Rendered text of everything executed so far.
    pub fn statements(&self) -> Vec<String> {
        self.executed.lock().iter().map(|(s, _)| s.to_string()).collect()
    }

    pub fn settings_of(&self, index: usize) -> Option<ExecutionSettings> {
        self.executed.lock().get(index).map(|(_, settings)| settings.clone())
    }

    pub fn clear(&self) {
        self.executed.lock().clear();
    }
}

impl StatementExecutor for RecordingExecutor {
    fn execute(&self, statement: &Lowered, settings: &ExecutionSettings) -> Result<(), ExecutionError> {
        let text = statement.to_string();
        if let Some(needle) = self.fail_matching.lock().as_deref() {
            if text.contains(needle) {
                return Err(ExecutionError::Backend(format!("rejected: {}", needle)));
            }
        }
        self.executed.lock().push((statement.clone(), settings.clone()));
        Ok(())
    }
}
