//! Schema evolution and DDL lowering for jsonhouse
//!
//! Turns batches of schemaless JSON documents into the ordered statements
//! that create, evolve and fill column-store tables:
//!
//! 1. encode field names into storage-safe column names
//! 2. find or create the destination table
//! 3. validate values against existing columns
//! 4. diff the rest against the schema and route it into overflow maps
//! 5. promote frequent overflow fields into real columns
//! 6. lower everything into backend statements and execute them in order

pub mod attributes;
pub mod config;
pub mod content;
pub mod diagnostics;
pub mod differ;
pub mod document;
pub mod encoder;
pub mod error;
pub mod executor;
pub mod lowering;
pub mod processor;
pub mod promotion;
pub mod statements;
pub mod validator;

pub use attributes::{AttributeEntry, AttributeMap};
pub use config::{AsyncInsertConfig, BackendKind, IngestConfig, PromotionThresholds, TableIngestConfig};
pub use content::{ContentGenerator, IngestContent};
pub use differ::{difference, remove_non_schema_fields};
pub use document::{AddIndexName, Document, DocumentTransformer, TransformerPipeline};
pub use encoder::{encode_field_name, FieldEncoder};
pub use error::{ExecutionError, IngestError};
pub use executor::{ExecutionSettings, RecordingExecutor, StatementExecutor};
pub use lowering::{Lowered, Lowerer, LoweringInput, ManifestLowerer, NativePayload, SqlLowerer};
pub use processor::{IngestProcessor, LoweredBatch};
pub use promotion::Promoter;
pub use statements::{AlterAction, AlterStatement, CreateTableStatement, InsertStatement, Statement};
pub use validator::validate;
