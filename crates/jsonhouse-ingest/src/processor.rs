//! Batch ingest entry point
//!
//! Encodes field names, resolves or creates the destination table,
//! validates, lowers and executes one batch. Tables routed to the common
//! table are ingested twice: once into their in-memory virtual table,
//! which only tracks the apparent schema, and once into the physical
//! common table with the index name injected.

use crate::config::{BackendKind, IngestConfig};
use crate::content::ContentGenerator;
use crate::diagnostics::{DedupLog, ErrorLogLimiter};
use crate::document::{validate_table_name, AddIndexName, Document, TransformerPipeline};
use crate::encoder::FieldEncoder;
use crate::error::IngestError;
use crate::executor::{ExecutionSettings, StatementExecutor};
use crate::lowering::{Lowered, Lowerer, LoweringInput, ManifestLowerer, SqlLowerer};
use crate::statements::{columns_for_new_table, CreateTableStatement, CREATED_BY_COMMENT};
use jsonhouse_registry::{JsonStore, TableRegistry};
use jsonhouse_schema::{Table, COMMON_TABLE_NAME, INDEX_NAME_FIELD};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// A lowered batch, ready for execution
pub struct LoweredBatch {
    pub table: Arc<Table>,
    pub statements: Vec<Lowered>,
}

pub struct IngestProcessor {
    config: IngestConfig,
    registry: Arc<dyn TableRegistry>,
    executor: Arc<dyn StatementExecutor>,
    content: Arc<ContentGenerator>,
    encoder: FieldEncoder,
    sql: SqlLowerer,
    manifest: ManifestLowerer,
    dedup: DedupLog,
    errors: ErrorLogLimiter,
}

impl IngestProcessor {
    pub fn new(
        config: IngestConfig,
        registry: Arc<dyn TableRegistry>,
        executor: Arc<dyn StatementExecutor>,
        manifests: Arc<dyn JsonStore>,
    ) -> Self {
        let content = Arc::new(ContentGenerator::new(config.promotion, manifests));
        Self {
            sql: SqlLowerer::new(Arc::clone(&content)),
            manifest: ManifestLowerer::new(Arc::clone(&content)),
            content,
            config,
            registry,
            executor,
            encoder: FieldEncoder::new(),
            dedup: DedupLog::new(),
            errors: ErrorLogLimiter::new(),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn TableRegistry> {
        &self.registry
    }

    pub fn encoder(&self) -> &FieldEncoder {
        &self.encoder
    }

    /// Execution failures seen so far
    pub fn execution_failures(&self) -> u64 {
        self.errors.total()
    }

    /// Ingests a batch into the logical table `index_name` and returns the
    /// number of documents written.
    pub fn ingest(&self, index_name: &str, documents: Vec<Document>) -> Result<usize, IngestError> {
        validate_table_name(index_name)?;
        let count = documents.len();
        if count == 0 {
            return Ok(0);
        }

        if self.config.uses_common_table(index_name) {
            let virtual_batch = self.lower_batch(index_name, documents.clone(), &TransformerPipeline::new(), true)?;
            debug!(
                table = %index_name,
                statements = virtual_batch.statements.len(),
                "virtual table updated"
            );

            let pipeline = TransformerPipeline::new().with(AddIndexName::new(INDEX_NAME_FIELD, index_name));
            let batch = self.lower_batch(COMMON_TABLE_NAME, documents, &pipeline, false)?;
            self.execute_batch(&batch)?;
        } else {
            let batch = self.lower_batch(index_name, documents, &TransformerPipeline::new(), false)?;
            self.execute_batch(&batch)?;
        }
        Ok(count)
    }

    /// Runs everything up to execution. Schema changes decided here are
    /// already applied to the in-memory table.
    pub fn lower_batch(
        &self,
        table_name: &str,
        documents: Vec<Document>,
        transformers: &TransformerPipeline,
        is_virtual: bool,
    ) -> Result<LoweredBatch, IngestError> {
        let encodings = self.encoder.collect(table_name, &documents);
        let documents: Vec<Document> = documents
            .into_iter()
            .map(|doc| self.encoder.rewrite(table_name, doc, self.config.flatten_nested))
            .collect();
        let documents = transformers.apply(documents);

        let first = documents.first().cloned().unwrap_or_default();
        let (table, create_table) = self.find_or_create_table(table_name, &first, &encodings, is_virtual)?;

        let lowerer: &dyn Lowerer = match self.config.backend_for(table_name) {
            BackendKind::Sql => &self.sql,
            BackendKind::Manifest => &self.manifest,
        };
        let statements = lowerer.lower(LoweringInput {
            table: &table,
            documents,
            encodings: &encodings,
            create_table,
        })?;
        Ok(LoweredBatch { table, statements })
    }

    fn find_or_create_table(
        &self,
        name: &str,
        first: &Document,
        encodings: &BTreeMap<String, String>,
        is_virtual: bool,
    ) -> Result<(Arc<Table>, Option<CreateTableStatement>), IngestError> {
        if let Some(table) = self.registry.find_table(name) {
            return Ok((table, None));
        }

        let config = self.config.table_config_for(name);
        let (columns, skipped) = columns_for_new_table(first, &config, encodings);
        for e in skipped {
            self.dedup.warn_once(name, &e.to_string());
        }

        let mut table = Table::new(name, config)
            .with_columns(columns.clone())
            .with_comment(CREATED_BY_COMMENT);
        if is_virtual {
            table = table.into_virtual();
        }
        let create = CreateTableStatement::new(&table, columns);
        let table = Arc::new(table);

        if !self.registry.add_table_if_absent(Arc::clone(&table)) {
            // created concurrently by another batch
            return self
                .registry
                .find_table(name)
                .map(|existing| (existing, None))
                .ok_or_else(|| IngestError::TableCreation {
                    table: name.to_string(),
                    reason: "table vanished from the registry after creation".to_string(),
                });
        }

        if table.is_virtual {
            self.content.store_manifest(&table)?;
        }
        info!(
            table = %name,
            columns = table.column_count(),
            is_virtual = table.is_virtual,
            "created table"
        );
        Ok((table, Some(create)))
    }

    /// Executes a lowered batch in order, DDL first. Virtual tables have
    /// no physical backing and are skipped.
    pub fn execute_batch(&self, batch: &LoweredBatch) -> Result<(), IngestError> {
        if batch.table.is_virtual {
            return Ok(());
        }
        let ddl_settings = ExecutionSettings::new();
        let insert_settings = self.config.insert_settings_for(&batch.table.name);

        for statement in &batch.statements {
            let settings = if statement.is_ddl() {
                info!(table = %batch.table.name, statement = %statement, "executing DDL");
                &ddl_settings
            } else {
                debug!(table = %batch.table.name, statement = %statement, "executing insert");
                &insert_settings
            };
            if let Err(e) = self.executor.execute(statement, settings) {
                self.errors.record(&statement.to_string(), &e);
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Column name to original field name for a logical table, from the
    /// encoder and from column comments.
    pub fn field_mapping(&self, index_name: &str) -> BTreeMap<String, String> {
        let mut mapping = self.encoder.reverse_map(index_name);
        if let Some(table) = self.registry.find_table(index_name) {
            for (column, field) in table.original_field_names() {
                mapping.entry(column).or_insert(field);
            }
            let columns = table.columns();
            mapping.retain(|column, _| columns.contains_key(column));
        }
        mapping
    }
}
