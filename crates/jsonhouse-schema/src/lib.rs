//! Schema model for jsonhouse
//!
//! Types, columns and tables as the column store sees them, plus the
//! parsers for backend type names (pest) and CREATE TABLE statements.

pub mod attribute;
pub mod comment;
pub mod parser;
pub mod table;
pub mod types;

pub use attribute::AttributeKind;
pub use comment::CommentMetadata;
pub use parser::{parse_create_table, parse_type, parse_type_or_unknown, ColumnDefinition, CreateTableDefinition, ParseError};
pub use table::{Column, ColumnSet, PartitionStrategy, Provenance, Table, TableConfig};
pub use types::{infer_type, FieldType, InferError, IntegerBounds, RecordKind, RecordType, ScalarType, Type};

/// Primary timestamp column; never renamed by field encoding.
pub const TIMESTAMP_FIELD: &str = "@timestamp";

/// Map column holding overflow values keyed by column name.
pub const ATTRIBUTES_VALUES_COLUMN: &str = "attributes_values";

/// Map column holding `v1;<Type>` metadata for overflow values.
pub const ATTRIBUTES_METADATA_COLUMN: &str = "attributes_metadata";

/// Physical table that hosts every logical table routed to the common table.
pub const COMMON_TABLE_NAME: &str = "jsonhouse_common_table";

/// Field injected into common-table documents naming their logical table.
pub const INDEX_NAME_FIELD: &str = "__jsonhouse_index_name";
