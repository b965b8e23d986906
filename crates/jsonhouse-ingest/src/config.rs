//! Ingest configuration
//!
//! Deserialized from the `ingest:` section of the server configuration.
//! Every field has a default, so an empty section is valid.

use crate::executor::ExecutionSettings;
use jsonhouse_schema::{AttributeKind, PartitionStrategy, TableConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::warn;

/// Which lowering strategy a table uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// SQL DDL/DML text
    #[default]
    Sql,
    /// Schema manifest plus inline events, one JSON payload per batch
    Manifest,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sql" => Ok(BackendKind::Sql),
            "manifest" => Ok(BackendKind::Manifest),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionThresholds {
    /// Tables with fewer columns promote every new field
    pub always_add_column_limit: usize,
    /// Tables with more columns never promote
    pub alter_column_upper_limit: usize,
    /// Occurrences within one window needed to promote
    pub field_frequency: u64,
}

impl Default for PromotionThresholds {
    fn default() -> Self {
        Self {
            always_add_column_limit: 100,
            alter_column_upper_limit: 1000,
            field_frequency: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncInsertConfig {
    pub enabled: bool,
    pub busy_timeout_ms: u64,
    pub max_data_size: u64,
    pub max_query_number: u64,
}

impl Default for AsyncInsertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            busy_timeout_ms: 100,
            max_data_size: 33_554_432,
            max_query_number: 10_000,
        }
    }
}

impl AsyncInsertConfig {
    fn apply(&self, settings: &mut ExecutionSettings) {
        if !self.enabled {
            return;
        }
        settings.insert("async_insert".to_string(), "1".to_string());
        settings.insert("wait_for_async_insert".to_string(), "1".to_string());
        settings.insert(
            "async_insert_busy_timeout_ms".to_string(),
            self.busy_timeout_ms.to_string(),
        );
        settings.insert(
            "async_insert_max_data_size".to_string(),
            self.max_data_size.to_string(),
        );
        settings.insert(
            "async_insert_max_query_number".to_string(),
            self.max_query_number.to_string(),
        );
    }
}

/// Per-table overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableIngestConfig {
    pub backend: Option<BackendKind>,
    pub use_common_table: bool,
    pub partitioning: Option<PartitionStrategy>,
    pub async_insert: Option<AsyncInsertConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub default_backend: BackendKind,
    pub cluster_name: Option<String>,
    pub partitioning: PartitionStrategy,
    /// Overflow kinds by type name, in matching order
    pub attribute_kinds: Vec<String>,
    pub promotion: PromotionThresholds,
    /// Flatten nested objects into `_`-joined columns
    pub flatten_nested: bool,
    pub async_insert: AsyncInsertConfig,
    pub tables: HashMap<String, TableIngestConfig>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            default_backend: BackendKind::Sql,
            cluster_name: None,
            partitioning: PartitionStrategy::None,
            attribute_kinds: vec!["String".to_string()],
            promotion: PromotionThresholds::default(),
            flatten_nested: true,
            async_insert: AsyncInsertConfig::default(),
            tables: HashMap::new(),
        }
    }
}

impl IngestConfig {
    pub fn backend_for(&self, table: &str) -> BackendKind {
        self.tables
            .get(table)
            .and_then(|t| t.backend)
            .unwrap_or(self.default_backend)
    }

    pub fn uses_common_table(&self, table: &str) -> bool {
        self.tables
            .get(table)
            .map(|t| t.use_common_table)
            .unwrap_or(false)
    }

    pub fn attribute_kinds(&self) -> Vec<AttributeKind> {
        self.attribute_kinds
            .iter()
            .filter_map(|name| {
                let kind = AttributeKind::named(name);
                if kind.is_none() {
                    warn!(kind = %name, "ignoring unknown attribute kind");
                }
                kind
            })
            .collect()
    }

    /// Physical layout for a table created by ingest.
    pub fn table_config_for(&self, table: &str) -> TableConfig {
        let partitioning = self
            .tables
            .get(table)
            .and_then(|t| t.partitioning)
            .unwrap_or(self.partitioning);
        TableConfig {
            cluster_name: self.cluster_name.clone(),
            attributes: self.attribute_kinds(),
            ..TableConfig::default()
        }
        .with_partitioning(partitioning)
    }

    /// Settings sent along with every INSERT into `table`.
    pub fn insert_settings_for(&self, table: &str) -> ExecutionSettings {
        let mut settings = ExecutionSettings::new();
        settings.insert("date_time_input_format".to_string(), "best_effort".to_string());
        let async_insert = self
            .tables
            .get(table)
            .and_then(|t| t.async_insert.as_ref())
            .unwrap_or(&self.async_insert);
        async_insert.apply(&mut settings);
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IngestConfig::default();
        assert_eq!(config.backend_for("any"), BackendKind::Sql);
        assert!(!config.uses_common_table("any"));
        assert_eq!(config.promotion.always_add_column_limit, 100);
        let table = config.table_config_for("any");
        assert_eq!(table.attributes, vec![AttributeKind::string()]);
        assert!(table.partition_by.is_none());
    }

    #[test]
    fn test_per_table_overrides() {
        let mut config = IngestConfig::default();
        config.tables.insert(
            "metrics".to_string(),
            TableIngestConfig {
                backend: Some(BackendKind::Manifest),
                use_common_table: true,
                partitioning: Some(PartitionStrategy::Monthly),
                async_insert: Some(AsyncInsertConfig {
                    enabled: false,
                    ..AsyncInsertConfig::default()
                }),
            },
        );
        assert_eq!(config.backend_for("metrics"), BackendKind::Manifest);
        assert!(config.uses_common_table("metrics"));
        assert_eq!(
            config.table_config_for("metrics").partition_by.as_deref(),
            Some("toYYYYMM(\"@timestamp\")")
        );
        let settings = config.insert_settings_for("metrics");
        assert!(!settings.contains_key("async_insert"));
        assert_eq!(config.insert_settings_for("logs").get("async_insert").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("SQL".parse::<BackendKind>().unwrap(), BackendKind::Sql);
        assert_eq!("manifest".parse::<BackendKind>().unwrap(), BackendKind::Manifest);
        assert!("duck".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_unknown_attribute_kinds_skipped() {
        let config = IngestConfig {
            attribute_kinds: vec!["Int64".to_string(), "Decimal".to_string(), "String".to_string()],
            ..IngestConfig::default()
        };
        let kinds = config.attribute_kinds();
        assert_eq!(kinds.len(), 2);
        assert_eq!(kinds[0].name(), "Int64");
    }
}
