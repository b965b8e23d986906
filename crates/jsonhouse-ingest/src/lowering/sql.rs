//! SQL text lowering

use super::{Lowered, Lowerer, LoweringInput};
use crate::content::ContentGenerator;
use crate::error::IngestError;
use crate::statements::{InsertStatement, Statement};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Emits the optional CREATE TABLE, then every column addition of the
/// batch (deduplicated, in the order they were decided), then one INSERT.
pub struct SqlLowerer {
    content: Arc<ContentGenerator>,
}

impl SqlLowerer {
    pub fn new(content: Arc<ContentGenerator>) -> Self {
        Self { content }
    }
}

impl Lowerer for SqlLowerer {
    fn lower(&self, input: LoweringInput<'_>) -> Result<Vec<Lowered>, IngestError> {
        let LoweringInput {
            table,
            documents,
            encodings,
            create_table,
        } = input;

        let mut alters = Vec::new();
        let mut rows = Vec::with_capacity(documents.len());
        for document in documents {
            let content = self.content.generate(table, document, encodings)?;
            alters.extend(content.alters);
            rows.push(serde_json::to_string(&Value::Object(content.row))?);
        }

        let mut statements = Vec::with_capacity(alters.len() + 2);
        if let Some(create) = create_table {
            statements.push(Lowered::Sql(Statement::CreateTable(create)));
        }
        let mut seen = HashSet::new();
        for alter in alters {
            if seen.insert(alter.to_sql()) {
                statements.push(Lowered::Sql(Statement::Alter(alter)));
            }
        }
        statements.push(Lowered::Sql(Statement::Insert(InsertStatement {
            qualified_name: table.qualified_name(),
            rows,
        })));
        Ok(statements)
    }
}
