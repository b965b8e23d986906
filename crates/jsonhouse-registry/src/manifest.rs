//! Virtual table manifests
//!
//! A virtual table is a logical table multiplexed onto the common table.
//! Only its column names are persisted; types always come from the common
//! table's real columns when the table is rebuilt.

use crate::store::{JsonStore, StoreError};
use chrono::{SecondsFormat, Utc};
use jsonhouse_schema::{
    Column, Provenance, Table, ATTRIBUTES_METADATA_COLUMN, ATTRIBUTES_VALUES_COLUMN,
    TIMESTAMP_FIELD,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

pub const MANIFEST_VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestColumn {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualTableManifest {
    pub version: String,
    #[serde(rename = "storedAt")]
    pub stored_at: String,
    pub columns: Vec<ManifestColumn>,
}

impl VirtualTableManifest {
    /// Sorted column names of `table`, without the overflow map columns and
    /// always including the timestamp.
    pub fn from_table(table: &Table) -> Self {
        let mut names: BTreeSet<String> = table
            .columns()
            .keys()
            .filter(|name| {
                name.as_str() != ATTRIBUTES_VALUES_COLUMN && name.as_str() != ATTRIBUTES_METADATA_COLUMN
            })
            .cloned()
            .collect();
        names.insert(TIMESTAMP_FIELD.to_string());

        Self {
            version: MANIFEST_VERSION.to_string(),
            stored_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            columns: names.into_iter().map(|name| ManifestColumn { name }).collect(),
        }
    }
}

/// Persists the manifest of a virtual table under its name.
pub fn store_virtual_table(store: &dyn JsonStore, table: &Table) -> Result<(), StoreError> {
    let manifest = VirtualTableManifest::from_table(table);
    debug!(table = %table.name, columns = manifest.columns.len(), "storing virtual table manifest");
    store.put(&table.name, &serde_json::to_value(&manifest)?)
}

/// Serializes manifest writes.
///
/// The column snapshot is taken under the same lock as the write. Column
/// sets only grow, so the last write always carries every column any
/// earlier write did.
pub struct ManifestWriter {
    store: Arc<dyn JsonStore>,
    write_lock: Mutex<()>,
}

impl ManifestWriter {
    pub fn new(store: Arc<dyn JsonStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn write(&self, table: &Table) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        store_virtual_table(self.store.as_ref(), table)
    }
}

/// Rebuilds every stored virtual table against the common table's columns.
/// Unreadable or unknown-version manifests are skipped.
pub fn load_virtual_tables(store: &dyn JsonStore, common: &Table) -> Result<Vec<Table>, StoreError> {
    let common_columns = common.columns();
    let mut tables = Vec::new();

    for (name, value) in store.list()? {
        let manifest: VirtualTableManifest = match serde_json::from_value(value) {
            Ok(m) => m,
            Err(e) => {
                warn!(table = %name, error = %e, "skipping unreadable virtual table manifest");
                continue;
            }
        };
        if manifest.version != MANIFEST_VERSION {
            warn!(
                table = %name,
                version = %manifest.version,
                "skipping virtual table manifest with unsupported version"
            );
            continue;
        }

        let mut columns = Vec::with_capacity(manifest.columns.len());
        for entry in &manifest.columns {
            match common_columns.get(&entry.name) {
                Some(real) => columns.push(
                    Column::new(entry.name.clone(), real.ty.clone(), Provenance::Manifest)
                        .with_modifiers(real.modifiers.clone())
                        .with_comment(real.comment.clone()),
                ),
                None => warn!(
                    table = %name,
                    column = %entry.name,
                    "virtual table column missing from common table"
                ),
            }
        }

        tables.push(
            Table::new(name, common.config.clone())
                .with_columns(columns)
                .with_comment(format!("Virtual table. Version: {}", manifest.stored_at))
                .into_virtual(),
        );
    }

    Ok(tables)
}
