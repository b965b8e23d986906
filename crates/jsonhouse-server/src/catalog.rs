//! In-process dry-run catalog
//!
//! Stands in for the column store: executed DDL is applied to an in-memory
//! set of tables, which the registry then reads back as its table source.
//! Inserts are only counted.

use jsonhouse_ingest::{AlterAction, ExecutionError, ExecutionSettings, IngestConfig, Lowered, Statement, StatementExecutor};
use jsonhouse_registry::{RegistryError, TableSource};
use jsonhouse_schema::{parse_create_table, Column, Provenance, Table};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

pub struct DryRunCatalog {
    ingest: IngestConfig,
    /// Tables by qualified name
    tables: RwLock<BTreeMap<String, Table>>,
    inserted_rows: AtomicU64,
}

impl DryRunCatalog {
    pub fn new(ingest: IngestConfig) -> Self {
        Self {
            ingest,
            tables: RwLock::new(BTreeMap::new()),
            inserted_rows: AtomicU64::new(0),
        }
    }

    /// Registers a table from its CREATE TABLE statement. Statements for
    /// tables that already exist are ignored.
    pub fn load_statement(&self, query: &str) -> Result<(), RegistryError> {
        let definition = parse_create_table(query)?;
        let config = self.ingest.table_config_for(&definition.name);
        let table = Table::from_definition(definition, config, query);
        let key = table.qualified_name();

        let mut tables = self.tables.write();
        if !tables.contains_key(&key) {
            info!(table = %table.name, columns = table.column_count(), "catalog table created");
            tables.insert(key, table);
        }
        Ok(())
    }

    pub fn inserted_rows(&self) -> u64 {
        self.inserted_rows.load(Ordering::Relaxed)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().values().map(|t| t.name.clone()).collect()
    }

    fn apply_alter(&self, qualified_name: &str, action: &AlterAction) -> Result<(), ExecutionError> {
        let tables = self.tables.read();
        let table = tables
            .get(qualified_name)
            .ok_or_else(|| ExecutionError::Backend(format!("table {} does not exist", qualified_name)))?;

        match action {
            AlterAction::AddColumn { column, ty } => {
                let added = table.add_columns(vec![Column::new(column.clone(), ty.clone(), Provenance::Discovered)]);
                debug!(table = %table.name, column = %column, added = !added.is_empty(), "catalog column added");
            }
            AlterAction::CommentColumn { column, comment } => {
                let mut columns = (*table.columns()).clone();
                let existing = columns
                    .get_mut(column)
                    .ok_or_else(|| ExecutionError::Backend(format!("column {} does not exist", column)))?;
                existing.comment = comment.clone();
                table.replace_columns(columns);
            }
        }
        Ok(())
    }
}

impl StatementExecutor for DryRunCatalog {
    fn execute(&self, statement: &Lowered, _settings: &ExecutionSettings) -> Result<(), ExecutionError> {
        match statement {
            Lowered::Sql(Statement::CreateTable(create)) => self
                .load_statement(&create.to_sql())
                .map_err(|e| ExecutionError::Backend(e.to_string())),
            Lowered::Sql(Statement::Alter(alter)) => self.apply_alter(&alter.qualified_name, &alter.action),
            Lowered::Sql(Statement::Insert(insert)) => {
                if !self.tables.read().contains_key(&insert.qualified_name) {
                    return Err(ExecutionError::Backend(format!(
                        "table {} does not exist",
                        insert.qualified_name
                    )));
                }
                let rows = insert.rows.len() as u64;
                let total = self.inserted_rows.fetch_add(rows, Ordering::Relaxed) + rows;
                debug!(table = %insert.qualified_name, rows, total, "dry-run insert");
                Ok(())
            }
            Lowered::Native(payload) => {
                let events = payload.body["ingest"].as_array().map(Vec::len).unwrap_or(0) as u64;
                self.inserted_rows.fetch_add(events, Ordering::Relaxed);
                debug!(table = %payload.table, events, "dry-run manifest payload");
                Ok(())
            }
        }
    }
}

impl TableSource for DryRunCatalog {
    fn list_tables(&self) -> Result<Vec<Table>, RegistryError> {
        Ok(self.tables.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonhouse_ingest::{AlterStatement, InsertStatement};
    use jsonhouse_schema::{TableConfig, Type};

    fn sql(statement: Statement) -> Lowered {
        Lowered::Sql(statement)
    }

    #[test]
    fn test_applies_ddl() {
        let catalog = DryRunCatalog::new(IngestConfig::default());
        catalog
            .load_statement("CREATE TABLE IF NOT EXISTS \"logs\" (\"msg\" Nullable(String)) ENGINE = MergeTree")
            .unwrap();

        let table = Table::new("logs", TableConfig::default());
        let column = Column::new("level", Type::nullable_scalar("Int64"), Provenance::Promoted)
            .with_comment("jsonhouseMetadataV1:fieldName=Level");
        let settings = ExecutionSettings::new();
        catalog
            .execute(&sql(Statement::Alter(AlterStatement::add_column(&table, &column))), &settings)
            .unwrap();
        catalog
            .execute(&sql(Statement::Alter(AlterStatement::comment_column(&table, &column))), &settings)
            .unwrap();

        let tables = catalog.list_tables().unwrap();
        assert_eq!(tables.len(), 1);
        let level = tables[0].column("level").unwrap();
        assert_eq!(level.ty.to_string(), "Nullable(Int64)");
        assert_eq!(level.original_field_name().as_deref(), Some("Level"));
    }

    #[test]
    fn test_counts_inserted_rows() {
        let catalog = DryRunCatalog::new(IngestConfig::default());
        catalog.load_statement("CREATE TABLE logs (msg String)").unwrap();
        let insert = InsertStatement {
            qualified_name: "\"logs\"".to_string(),
            rows: vec!["{}".to_string(), "{}".to_string()],
        };
        catalog
            .execute(&sql(Statement::Insert(insert)), &ExecutionSettings::new())
            .unwrap();
        assert_eq!(catalog.inserted_rows(), 2);
    }

    #[test]
    fn test_unknown_table_rejected() {
        let catalog = DryRunCatalog::new(IngestConfig::default());
        let insert = InsertStatement {
            qualified_name: "\"nope\"".to_string(),
            rows: vec!["{}".to_string()],
        };
        let err = catalog
            .execute(&sql(Statement::Insert(insert)), &ExecutionSettings::new())
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Backend(_)));
    }
}
