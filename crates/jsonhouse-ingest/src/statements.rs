//! CREATE, ALTER and INSERT statements
//!
//! Every DDL statement against a cluster-qualified table carries the
//! `ON CLUSTER` clause.

use crate::document::Document;
use jsonhouse_schema::table::{quote_identifier, quote_string};
use jsonhouse_schema::{
    infer_type, Column, CommentMetadata, InferError, Provenance, Table, TableConfig, Type,
    ATTRIBUTES_METADATA_COLUMN, ATTRIBUTES_VALUES_COLUMN, TIMESTAMP_FIELD,
};
use std::collections::BTreeMap;
use std::fmt;

/// Table comment of every table created by ingest
pub const CREATED_BY_COMMENT: &str = "created by jsonhouse";

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateTable(CreateTableStatement),
    Alter(AlterStatement),
    Insert(InsertStatement),
}

impl Statement {
    pub fn to_sql(&self) -> String {
        match self {
            Statement::CreateTable(s) => s.to_sql(),
            Statement::Alter(s) => s.to_sql(),
            Statement::Insert(s) => s.to_sql(),
        }
    }

    pub fn is_ddl(&self) -> bool {
        !matches!(self, Statement::Insert(_))
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStatement {
    pub table: String,
    pub qualified_name: String,
    pub on_cluster: String,
    pub columns: Vec<Column>,
    /// ENGINE clause and everything after the column list
    pub tail: String,
    pub comment: String,
}

impl CreateTableStatement {
    pub fn new(table: &Table, columns: Vec<Column>) -> Self {
        Self {
            table: table.name.clone(),
            qualified_name: table.qualified_name(),
            on_cluster: table.on_cluster_clause(),
            columns,
            tail: table.config.create_table_tail(),
            comment: CREATED_BY_COMMENT.to_string(),
        }
    }

    pub fn to_sql(&self) -> String {
        let mut sql = format!("CREATE TABLE IF NOT EXISTS {}{} (\n", self.qualified_name, self.on_cluster);
        for column in &self.columns {
            sql.push_str("  ");
            sql.push_str(&column.definition_sql());
            sql.push_str(",\n");
        }
        sql.push_str(")\n");
        sql.push_str(&self.tail);
        if !self.comment.is_empty() {
            sql.push_str("\nCOMMENT ");
            sql.push_str(&quote_string(&self.comment));
        }
        sql
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlterAction {
    AddColumn { column: String, ty: Type },
    CommentColumn { column: String, comment: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlterStatement {
    pub qualified_name: String,
    pub on_cluster: String,
    pub action: AlterAction,
}

impl AlterStatement {
    pub fn add_column(table: &Table, column: &Column) -> Self {
        Self {
            qualified_name: table.qualified_name(),
            on_cluster: table.on_cluster_clause(),
            action: AlterAction::AddColumn {
                column: column.name.clone(),
                ty: column.ty.clone(),
            },
        }
    }

    pub fn comment_column(table: &Table, column: &Column) -> Self {
        Self {
            qualified_name: table.qualified_name(),
            on_cluster: table.on_cluster_clause(),
            action: AlterAction::CommentColumn {
                column: column.name.clone(),
                comment: column.comment.clone(),
            },
        }
    }

    pub fn column_name(&self) -> &str {
        match &self.action {
            AlterAction::AddColumn { column, .. } | AlterAction::CommentColumn { column, .. } => column,
        }
    }

    pub fn to_sql(&self) -> String {
        let action = match &self.action {
            AlterAction::AddColumn { column, ty } => {
                format!("ADD COLUMN IF NOT EXISTS {} {}", quote_identifier(column), ty)
            }
            AlterAction::CommentColumn { column, comment } => {
                format!("COMMENT COLUMN {} {}", quote_identifier(column), quote_string(comment))
            }
        };
        format!("ALTER TABLE {}{} {}", self.qualified_name, self.on_cluster, action)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub qualified_name: String,
    /// One JSON object per row
    pub rows: Vec<String>,
}

impl InsertStatement {
    pub fn to_sql(&self) -> String {
        format!(
            "INSERT INTO {} FORMAT JSONEachRow {}",
            self.qualified_name,
            self.rows.join(", ")
        )
    }
}

/// Column comment recording the original field name of `column`.
pub fn field_name_comment(column: &str, encodings: &BTreeMap<String, String>) -> String {
    let field = encodings.get(column).map(String::as_str).unwrap_or(column);
    CommentMetadata::with_field_name(field).marshal()
}

/// Columns for a table created from its first document: the timestamp and
/// overflow map columns first, then one column per top-level field in name
/// order. Fields whose type cannot be inferred are skipped and reported.
pub fn columns_for_new_table(
    document: &Document,
    config: &TableConfig,
    encodings: &BTreeMap<String, String>,
) -> (Vec<Column>, Vec<InferError>) {
    let mut columns = Vec::new();
    let mut skipped = Vec::new();

    if config.has_timestamp {
        let mut timestamp = Column::new(TIMESTAMP_FIELD, Type::scalar("DateTime64(3)"), Provenance::Created);
        if config.timestamp_defaults_now {
            timestamp = timestamp.with_modifiers("DEFAULT now64()");
        }
        columns.push(timestamp);
    }
    if !config.attributes.is_empty() {
        for name in [ATTRIBUTES_VALUES_COLUMN, ATTRIBUTES_METADATA_COLUMN] {
            columns.push(Column::new(name, Type::scalar("Map(String, String)"), Provenance::Created));
        }
    }

    let mut names: Vec<&String> = document.keys().collect();
    names.sort();
    for name in names {
        if columns.iter().any(|c| &c.name == name) {
            continue;
        }
        match infer_type(&document[name.as_str()], name) {
            Ok(ty) => columns.push(
                Column::new(name.clone(), ty.to_column_type(), Provenance::Created)
                    .with_comment(field_name_comment(name, encodings)),
            ),
            Err(e) => skipped.push(e),
        }
    }
    (columns, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonhouse_schema::parse_create_table;
    use serde_json::{json, Value};

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_alter_statements() {
        let mut table = Table::new("logs", TableConfig::default());
        let column = Column::new("a_b", Type::nullable_scalar("Int64"), Provenance::Promoted)
            .with_comment("jsonhouseMetadataV1:fieldName=a.b");
        assert_eq!(
            AlterStatement::add_column(&table, &column).to_sql(),
            "ALTER TABLE \"logs\" ADD COLUMN IF NOT EXISTS \"a_b\" Nullable(Int64)"
        );
        table.cluster = Some("main".to_string());
        assert_eq!(
            AlterStatement::comment_column(&table, &column).to_sql(),
            "ALTER TABLE \"logs\" ON CLUSTER \"main\" COMMENT COLUMN \"a_b\" 'jsonhouseMetadataV1:fieldName=a.b'"
        );
    }

    #[test]
    fn test_insert_statement() {
        let insert = InsertStatement {
            qualified_name: "\"t\"".to_string(),
            rows: vec!["{\"a\":1}".to_string(), "{\"a\":2}".to_string()],
        };
        assert_eq!(insert.to_sql(), "INSERT INTO \"t\" FORMAT JSONEachRow {\"a\":1}, {\"a\":2}");
    }

    #[test]
    fn test_columns_for_new_table() {
        let mut encodings = BTreeMap::new();
        encodings.insert("host_name".to_string(), "host.name".to_string());
        let (columns, skipped) = columns_for_new_table(
            &doc(json!({"host_name": "a", "count": 3, "tags": ["x"], "empty": [], "at": "2024-01-01T00:00:00Z"})),
            &TableConfig::default(),
            &encodings,
        );
        let rendered: Vec<String> = columns.iter().map(|c| format!("{} {}", c.name, c.ty)).collect();
        assert_eq!(
            rendered,
            vec![
                "@timestamp DateTime64(3)",
                "attributes_values Map(String, String)",
                "attributes_metadata Map(String, String)",
                "at DateTime64(3)",
                "count Nullable(Int64)",
                "host_name Nullable(String)",
                "tags Array(String)",
            ]
        );
        assert_eq!(columns[0].modifiers, "DEFAULT now64()");
        assert_eq!(columns[5].original_field_name().as_deref(), Some("host.name"));
        assert_eq!(skipped, vec![InferError::EmptyArray("empty".to_string())]);
    }

    #[test]
    fn test_create_table_parses_back() {
        let mut config = TableConfig::default();
        config.cluster_name = Some("main".to_string());
        let table = Table::new("logs", config).with_database("db");
        let (columns, _) = columns_for_new_table(
            &doc(json!({"msg": "hi", "nested": {"a": 1}})),
            &table.config,
            &BTreeMap::new(),
        );
        let create = CreateTableStatement::new(&table, columns.clone());
        let sql = create.to_sql();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"db\".\"logs\" ON CLUSTER \"main\" (\n"));
        assert!(sql.ends_with("ORDER BY (\"@timestamp\")\nCOMMENT 'created by jsonhouse'"));

        let parsed = parse_create_table(&sql).unwrap();
        assert_eq!(parsed.database.as_deref(), Some("db"));
        assert_eq!(parsed.cluster.as_deref(), Some("main"));
        let parsed_columns: Vec<(String, Type)> =
            parsed.columns.into_iter().map(|c| (c.name, c.ty)).collect();
        let expected: Vec<(String, Type)> = columns.into_iter().map(|c| (c.name, c.ty)).collect();
        assert_eq!(parsed_columns, expected);
    }
}
