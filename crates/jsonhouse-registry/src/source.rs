//! Physical table sources
//!
//! The registry does not introspect the column store itself; it asks a
//! `TableSource` for the current physical tables.

use crate::RegistryError;
use jsonhouse_schema::{parse_create_table, Table, TableConfig};
use parking_lot::RwLock;
use tracing::warn;

/// Trait for listing physical tables at reload time
pub trait TableSource: Send + Sync {
    fn list_tables(&self) -> Result<Vec<Table>, RegistryError>;
}

/// Table source backed by a fixed set of CREATE TABLE statements
pub struct StaticTableSource {
    statements: RwLock<Vec<String>>,
    config: TableConfig,
}

impl StaticTableSource {
    pub fn new() -> Self {
        Self::with_config(TableConfig::default())
    }

    pub fn with_config(config: TableConfig) -> Self {
        Self {
            statements: RwLock::new(Vec::new()),
            config,
        }
    }

    pub fn add_statement(&self, query: impl Into<String>) {
        self.statements.write().push(query.into());
    }
}

impl Default for StaticTableSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TableSource for StaticTableSource {
    fn list_tables(&self) -> Result<Vec<Table>, RegistryError> {
        let statements = self.statements.read();
        let mut tables = Vec::with_capacity(statements.len());
        for query in statements.iter() {
            match parse_create_table(query) {
                Ok(def) => tables.push(Table::from_definition(def, self.config.clone(), query)),
                Err(e) => warn!(error = %e, "skipping unparseable table definition"),
            }
        }
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_source_lists_parsed_tables() {
        let source = StaticTableSource::new();
        source.add_statement("CREATE TABLE a (x Int64) ENGINE = Memory");
        source.add_statement("not a table");
        source.add_statement("CREATE TABLE IF NOT EXISTS b (y String, z Array(String))");

        let tables = source.list_tables().unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].name, "a");
        assert_eq!(tables[1].column_count(), 2);
    }
}
