//! Error types for ingestion

use jsonhouse_registry::{RegistryError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid table name '{name}': {reason}")]
    InvalidTableName { name: String, reason: String },

    #[error("No attribute kind accepts field '{field}' in table '{table}'")]
    NoAttributeKind { table: String, field: String },

    #[error("Cannot derive columns for table '{table}': {reason}")]
    TableCreation { table: String, reason: String },

    #[error("Failed to encode payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Manifest store error: {0}")]
    Store(#[from] StoreError),

    #[error("Execution failed: {0}")]
    Execution(#[from] ExecutionError),
}

/// Errors reported by the backend executing lowered statements
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("Backend rejected statement: {0}")]
    Backend(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}
