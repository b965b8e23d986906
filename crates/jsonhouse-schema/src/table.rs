//! Columns and tables
//!
//! A `Table` owns its column set behind a copy-on-write holder: writers
//! clone the current set, modify the clone and swap it in, so readers
//! always see a complete version.

use crate::attribute::AttributeKind;
use crate::comment::CommentMetadata;
use crate::parser::CreateTableDefinition;
use crate::types::Type;
use crate::TIMESTAMP_FIELD;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Where a column came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    /// Read from the physical store
    Discovered,
    /// Part of the CREATE TABLE issued on first sighting
    Created,
    /// Added later by promotion
    Promoted,
    /// Rebuilt from a virtual table manifest
    Manifest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub ty: Type,
    pub modifiers: String,
    pub comment: String,
    pub provenance: Provenance,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: Type, provenance: Provenance) -> Self {
        Self {
            name: name.into(),
            ty,
            modifiers: String::new(),
            comment: String::new(),
            provenance,
        }
    }

    pub fn with_modifiers(mut self, modifiers: impl Into<String>) -> Self {
        self.modifiers = modifiers.into();
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Pre-encoding field name recorded in the column comment, if any.
    pub fn original_field_name(&self) -> Option<String> {
        CommentMetadata::unmarshal(&self.comment)
            .and_then(|m| m.field_name().map(str::to_string))
    }

    /// Column definition as it appears inside CREATE TABLE.
    pub fn definition_sql(&self) -> String {
        let mut sql = format!("{} {}", quote_identifier(&self.name), self.ty);
        if !self.modifiers.is_empty() {
            sql.push(' ');
            sql.push_str(&self.modifiers);
        }
        if !self.comment.is_empty() {
            sql.push_str(" COMMENT ");
            sql.push_str(&quote_string(&self.comment));
        }
        sql
    }
}

pub type ColumnSet = BTreeMap<String, Column>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionStrategy {
    #[default]
    None,
    Hourly,
    Daily,
    Monthly,
    Yearly,
}

impl PartitionStrategy {
    pub fn expression(&self, timestamp_field: &str) -> Option<String> {
        let field = quote_identifier(timestamp_field);
        match self {
            PartitionStrategy::None => None,
            PartitionStrategy::Hourly => Some(format!("toStartOfHour({})", field)),
            PartitionStrategy::Daily => Some(format!("toYYYYMMDD({})", field)),
            PartitionStrategy::Monthly => Some(format!("toYYYYMM({})", field)),
            PartitionStrategy::Yearly => Some(format!("toYear({})", field)),
        }
    }
}

/// Physical layout used when a table is created by ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct TableConfig {
    pub has_timestamp: bool,
    pub timestamp_defaults_now: bool,
    pub engine: String,
    pub order_by: Option<String>,
    pub partition_by: Option<String>,
    pub primary_key: Option<String>,
    pub ttl: Option<String>,
    pub settings: Option<String>,
    pub cluster_name: Option<String>,
    /// Overflow kinds in matching order
    pub attributes: Vec<AttributeKind>,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            has_timestamp: true,
            timestamp_defaults_now: true,
            engine: "MergeTree".to_string(),
            order_by: Some(quote_identifier(TIMESTAMP_FIELD)),
            partition_by: None,
            primary_key: None,
            ttl: None,
            settings: None,
            cluster_name: None,
            attributes: vec![AttributeKind::string()],
        }
    }
}

impl TableConfig {
    pub fn with_partitioning(mut self, strategy: PartitionStrategy) -> Self {
        if self.has_timestamp {
            self.partition_by = strategy.expression(TIMESTAMP_FIELD);
        }
        self
    }

    /// ENGINE clause and everything after the column list.
    pub fn create_table_tail(&self) -> String {
        let mut tail = format!("ENGINE = {}", self.engine);
        if let Some(order_by) = &self.order_by {
            tail.push_str(&format!("\nORDER BY ({})", order_by));
        }
        if let Some(partition_by) = &self.partition_by {
            tail.push_str(&format!("\nPARTITION BY {}", partition_by));
        }
        if let Some(primary_key) = &self.primary_key {
            tail.push_str(&format!("\nPRIMARY KEY ({})", primary_key));
        }
        if let Some(ttl) = &self.ttl {
            tail.push_str(&format!("\nTTL {}", ttl));
        }
        if let Some(settings) = &self.settings {
            tail.push_str(&format!("\nSETTINGS {}", settings));
        }
        tail
    }
}

pub struct Table {
    pub name: String,
    pub database: Option<String>,
    pub cluster: Option<String>,
    columns: RwLock<Arc<ColumnSet>>,
    pub config: TableConfig,
    pub is_virtual: bool,
    pub timestamp_field: Option<String>,
    pub comment: String,
    pub create_query: Option<String>,
}

impl Table {
    pub fn new(name: impl Into<String>, config: TableConfig) -> Self {
        let cluster = config.cluster_name.clone();
        Self {
            name: name.into(),
            database: None,
            cluster,
            columns: RwLock::new(Arc::new(ColumnSet::new())),
            timestamp_field: config.has_timestamp.then(|| TIMESTAMP_FIELD.to_string()),
            config,
            is_virtual: false,
            comment: String::new(),
            create_query: None,
        }
    }

    pub fn with_columns(self, columns: impl IntoIterator<Item = Column>) -> Self {
        let set: ColumnSet = columns.into_iter().map(|c| (c.name.clone(), c)).collect();
        *self.columns.write() = Arc::new(set);
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Marks the table as virtual: it exists in memory only and is
    /// multiplexed onto the common table.
    pub fn into_virtual(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    /// Builds a table from a parsed CREATE TABLE statement.
    pub fn from_definition(def: CreateTableDefinition, config: TableConfig, query: &str) -> Self {
        let columns: Vec<Column> = def
            .columns
            .into_iter()
            .map(|c| {
                Column::new(c.name, c.ty, Provenance::Discovered)
                    .with_modifiers(c.modifiers)
                    .with_comment(c.comment.unwrap_or_default())
            })
            .collect();
        let mut table = Table::new(def.name, config).with_columns(columns);
        table.database = def.database;
        table.cluster = def.cluster;
        table.create_query = Some(query.to_string());
        table.timestamp_field = table.discover_timestamp_field();
        table
    }

    fn discover_timestamp_field(&self) -> Option<String> {
        let columns = self.columns();
        if columns.contains_key(TIMESTAMP_FIELD) {
            return Some(TIMESTAMP_FIELD.to_string());
        }
        columns
            .values()
            .find(|c| c.ty.is_datetime())
            .map(|c| c.name.clone())
    }

    /// Current column set. Cheap; the snapshot never changes underneath.
    pub fn columns(&self) -> Arc<ColumnSet> {
        Arc::clone(&self.columns.read())
    }

    pub fn column(&self, name: &str) -> Option<Column> {
        self.columns.read().get(name).cloned()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.read().contains_key(name)
    }

    pub fn column_count(&self) -> usize {
        self.columns.read().len()
    }

    /// Adds columns that are not present yet and returns the ones actually
    /// added. Existing columns are never replaced.
    pub fn add_columns(&self, new_columns: Vec<Column>) -> Vec<Column> {
        let mut holder = self.columns.write();
        let mut next: ColumnSet = (**holder).clone();
        let mut added = Vec::new();
        for column in new_columns {
            if !next.contains_key(&column.name) {
                next.insert(column.name.clone(), column.clone());
                added.push(column);
            }
        }
        if !added.is_empty() {
            *holder = Arc::new(next);
        }
        added
    }

    pub fn replace_columns(&self, columns: ColumnSet) {
        *self.columns.write() = Arc::new(columns);
    }

    /// `"db"."table"` or `"table"`.
    pub fn qualified_name(&self) -> String {
        match &self.database {
            Some(db) if !db.is_empty() => {
                format!("{}.{}", quote_identifier(db), quote_identifier(&self.name))
            }
            _ => quote_identifier(&self.name),
        }
    }

    /// ` ON CLUSTER "c"` or an empty string.
    pub fn on_cluster_clause(&self) -> String {
        match &self.cluster {
            Some(cluster) if !cluster.is_empty() => {
                format!(" ON CLUSTER {}", quote_identifier(cluster))
            }
            _ => String::new(),
        }
    }

    /// Column name to original field name, from column comments.
    pub fn original_field_names(&self) -> BTreeMap<String, String> {
        self.columns()
            .values()
            .filter_map(|c| c.original_field_name().map(|f| (c.name.clone(), f)))
            .collect()
    }
}

impl Clone for Table {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            database: self.database.clone(),
            cluster: self.cluster.clone(),
            columns: RwLock::new(self.columns()),
            config: self.config.clone(),
            is_virtual: self.is_virtual,
            timestamp_field: self.timestamp_field.clone(),
            comment: self.comment.clone(),
            create_query: self.create_query.clone(),
        }
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("database", &self.database)
            .field("cluster", &self.cluster)
            .field("columns", &self.column_count())
            .field("is_virtual", &self.is_virtual)
            .finish()
    }
}

/// Double-quoted identifier.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Single-quoted string literal.
pub fn quote_string(text: &str) -> String {
    format!("'{}'", text.replace('\\', "\\\\").replace('\'', "\\'"))
}
