//! Backend lowering strategies
//!
//! A lowerer turns one batch into the ordered list of things the executor
//! runs. The strategy is chosen per destination table.

pub mod manifest;
pub mod sql;

use crate::document::Document;
use crate::error::IngestError;
use crate::statements::{CreateTableStatement, Statement};
use jsonhouse_schema::Table;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

pub use manifest::ManifestLowerer;
pub use sql::SqlLowerer;

/// Backend-native request body
#[derive(Debug, Clone, PartialEq)]
pub struct NativePayload {
    pub table: String,
    pub body: Value,
}

/// One unit of work for the executor
#[derive(Debug, Clone, PartialEq)]
pub enum Lowered {
    Sql(Statement),
    Native(NativePayload),
}

impl Lowered {
    pub fn is_ddl(&self) -> bool {
        match self {
            Lowered::Sql(statement) => statement.is_ddl(),
            Lowered::Native(_) => false,
        }
    }
}

impl fmt::Display for Lowered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lowered::Sql(statement) => f.write_str(&statement.to_sql()),
            Lowered::Native(payload) => write!(f, "{}", payload.body),
        }
    }
}

pub struct LoweringInput<'a> {
    pub table: &'a Table,
    /// Encoded and transformed documents, not yet validated
    pub documents: Vec<Document>,
    /// Column name to original field name for this batch
    pub encodings: &'a BTreeMap<String, String>,
    /// Present only when the batch created the table
    pub create_table: Option<CreateTableStatement>,
}

pub trait Lowerer: Send + Sync {
    fn lower(&self, input: LoweringInput<'_>) -> Result<Vec<Lowered>, IngestError>;
}
