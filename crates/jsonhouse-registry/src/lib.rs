//! Table registry for jsonhouse
//!
//! Resolves logical table names to their current definitions. The registry
//! is shared by every ingest call and refreshed wholesale from the physical
//! store and from persisted virtual table manifests.

pub mod manifest;
pub mod memory;
pub mod refresh;
pub mod source;
pub mod store;

use jsonhouse_schema::{ParseError, Table};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

pub use manifest::{load_virtual_tables, store_virtual_table, ManifestColumn, ManifestWriter, VirtualTableManifest, MANIFEST_VERSION};
pub use memory::InMemoryTableRegistry;
pub use refresh::{spawn_refresh_loop, RefreshConfig, ReloadHandle};
pub use source::{StaticTableSource, TableSource};
pub use store::{FileJsonStore, JsonStore, MemoryJsonStore, StoreError};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Table source failed: {0}")]
    Source(String),

    #[error("Manifest store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid table definition: {0}")]
    Parse(#[from] ParseError),

    #[error("Registry refresh loop is not running")]
    RefreshStopped,

    #[error("Registry reload failed: {0}")]
    Reload(String),
}

/// Lookup and registration of table definitions.
pub trait TableRegistry: Send + Sync {
    /// Finds a table by exact name or `*` glob. An exact match wins;
    /// otherwise the lexicographically smallest matching name.
    fn find_table(&self, pattern: &str) -> Option<Arc<Table>>;

    /// Registers a table unless one with the same name exists. Returns
    /// whether the table was absent.
    fn add_table_if_absent(&self, table: Arc<Table>) -> bool;

    /// Replaces every definition with a fresh read from the sources.
    fn reload_all(&self) -> Result<(), RegistryError>;

    /// Point-in-time copy of all definitions.
    fn definitions(&self) -> BTreeMap<String, Arc<Table>>;
}
