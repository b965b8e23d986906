//! Manifest lowering
//!
//! For backends that take the table schema as a manifest next to the
//! events instead of DDL. One batch becomes one JSON payload:
//!
//! ```text
//! { "create_table": {...}, "transform": {..., "output_columns": [...]}, "ingest": [events] }
//! ```
//!
//! Events are cast to the declared column types; missing columns get a
//! type default.

use super::{Lowered, Lowerer, LoweringInput, NativePayload};
use crate::content::ContentGenerator;
use crate::document::Document;
use crate::error::IngestError;
use crate::statements::CreateTableStatement;
use chrono::{DateTime, NaiveDateTime, Utc};
use jsonhouse_schema::{Table, Type, TIMESTAMP_FIELD};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// Datetime format string as understood by the backend
pub const DATETIME_FORMAT: &str = "2006-01-02 15:04:05 MST";
const CHRONO_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";

const TRANSFORM_NAME: &str = "transform1";

pub struct ManifestLowerer {
    content: Arc<ContentGenerator>,
    create_statements: Mutex<HashMap<String, CreateTableStatement>>,
}

impl ManifestLowerer {
    pub fn new(content: Arc<ContentGenerator>) -> Self {
        Self {
            content,
            create_statements: Mutex::new(HashMap::new()),
        }
    }

    /// Columns in manifest order: the cached create statement's columns
    /// first, then anything added to the table since.
    fn manifest_columns(&self, table: &Table, create: Option<CreateTableStatement>) -> Vec<(String, Type)> {
        let cached = {
            let mut cache = self.create_statements.lock();
            match create {
                Some(statement) => Some(cache.entry(table.name.clone()).or_insert(statement).clone()),
                None => cache.get(&table.name).cloned(),
            }
        };

        let mut columns: Vec<(String, Type)> = cached
            .map(|statement: CreateTableStatement| {
                statement
                    .columns
                    .into_iter()
                    .map(|c| (c.name, c.ty))
                    .collect()
            })
            .unwrap_or_default();
        let known: HashSet<String> = columns.iter().map(|(name, _)| name.clone()).collect();
        for column in table.columns().values() {
            if !known.contains(&column.name) {
                columns.push((column.name.clone(), column.ty.clone()));
            }
        }
        columns
    }
}

impl Lowerer for ManifestLowerer {
    fn lower(&self, input: LoweringInput<'_>) -> Result<Vec<Lowered>, IngestError> {
        let LoweringInput {
            table,
            documents,
            encodings,
            create_table,
        } = input;
        let batch_size = documents.len();

        let mut rows = Vec::with_capacity(batch_size);
        for document in documents {
            rows.push(self.content.generate(table, document, encodings)?.row);
        }

        let columns = self.manifest_columns(table, create_table);
        let output_columns: Vec<Value> = columns
            .iter()
            .map(|(name, ty)| json!({"name": name, "datatype": datatype(name, ty)}))
            .collect();

        let events: Vec<Value> = rows
            .iter()
            .map(|row| cast_event(row, &columns))
            .filter(|event| !event.is_empty())
            .map(Value::Object)
            .collect();

        info!(
            table = %table.name,
            documents = batch_size,
            columns = columns.len(),
            events = events.len(),
            "lowered batch to manifest payload"
        );

        let body = json!({
            "create_table": {
                "name": table.name,
                "settings": {"merge": {"enabled": true}}
            },
            "transform": {
                "name": TRANSFORM_NAME,
                "type": "json",
                "settings": {
                    "format_details": {"flattening": {"active": false}},
                    "output_columns": output_columns
                }
            },
            "ingest": events
        });

        Ok(vec![Lowered::Native(NativePayload {
            table: table.name.clone(),
            body,
        })])
    }
}

/// Backend type name: lowercased, `float64` as `double`, any datetime
/// as `datetime`.
fn normalize_type(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    if lower.contains("float64") {
        "double".to_string()
    } else if lower.contains("datetime") {
        "datetime".to_string()
    } else {
        lower
    }
}

/// Type arguments of `Map(K, V)`.
fn map_arguments(ty: &Type) -> Option<(String, String)> {
    let Type::Scalar(scalar) = ty else {
        return None;
    };
    if !ty.is_map() {
        return None;
    }
    let open = scalar.name.find('(')?;
    let inner = scalar.name[open + 1..].strip_suffix(')')?;
    let mut depth = 0usize;
    for (i, c) in inner.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                return Some((inner[..i].trim().to_string(), inner[i + 1..].trim().to_string()));
            }
            _ => {}
        }
    }
    None
}

fn element(type_name: String) -> Value {
    let is_datetime = type_name == "datetime";
    let mut element = json!({"type": type_name, "index_options": {"fulltext": false}});
    if is_datetime {
        element["format"] = json!(DATETIME_FORMAT);
    }
    element
}

/// Manifest type name used for casting a column's values.
fn value_type_name(ty: &Type) -> String {
    match ty {
        Type::Scalar(scalar) => normalize_type(&scalar.name),
        Type::Array(_) => "array".to_string(),
        // records are shipped as JSON text
        Type::Record(_) => "string".to_string(),
    }
}

fn datatype(column: &str, ty: &Type) -> Value {
    let mut datatype = Map::new();
    if let Some((key, value)) = map_arguments(ty) {
        datatype.insert("type".to_string(), json!("map"));
        datatype.insert(
            "elements".to_string(),
            json!([element(normalize_type(&key)), element(normalize_type(&value))]),
        );
    } else if let Type::Array(inner) = ty {
        datatype.insert("type".to_string(), json!("array"));
        datatype.insert("elements".to_string(), json!([element(value_type_name(inner))]));
    } else {
        datatype.insert("type".to_string(), json!(value_type_name(ty)));
    }

    if ty.is_nullable() {
        datatype.insert("denullify".to_string(), json!(false));
    }
    if column == TIMESTAMP_FIELD {
        datatype.insert("primary".to_string(), json!(true));
    }
    if datatype.get("type") == Some(&json!("datetime")) {
        datatype.insert("format".to_string(), json!(DATETIME_FORMAT));
    }
    Value::Object(datatype)
}

fn cast_event(row: &Document, columns: &[(String, Type)]) -> Document {
    let mut event = Document::new();
    for (name, ty) in columns {
        let value = match (row.get(name), ty) {
            (value, Type::Array(inner)) => {
                let element_type = value_type_name(inner);
                let items = value.and_then(Value::as_array).cloned().unwrap_or_default();
                Value::Array(
                    items
                        .iter()
                        .filter_map(|item| cast_logged(name, item, &element_type))
                        .collect(),
                )
            }
            (Some(Value::Object(entries)), _) if map_arguments(ty).is_some() => {
                let value_type = map_arguments(ty)
                    .map(|(_, v)| normalize_type(&v))
                    .unwrap_or_else(|| "string".to_string());
                Value::Object(
                    entries
                        .iter()
                        .filter_map(|(k, v)| cast_logged(name, v, &value_type).map(|v| (k.clone(), v)))
                        .collect(),
                )
            }
            (Some(value), _) => cast_logged(name, value, &value_type_name(ty)).unwrap_or(Value::Null),
            (None, _) => default_for_type(&value_type_name(ty)),
        };
        event.insert(name.clone(), value);
    }
    event
}

fn cast_logged(column: &str, value: &Value, type_name: &str) -> Option<Value> {
    let cast = cast_to_type(value, type_name);
    if cast.is_none() {
        warn!(column = %column, value = %value, target = %type_name, "cannot cast value");
    }
    cast
}

/// Converts a JSON value to the representation the backend expects for
/// `type_name`. `None` when the value does not convert.
pub fn cast_to_type(value: &Value, type_name: &str) -> Option<Value> {
    if value.is_null() {
        return Some(Value::Null);
    }
    match type_name {
        "string" => Some(match value {
            Value::String(s) => Value::String(s.clone()),
            other => Value::String(other.to_string()),
        }),
        "double" | "float32" => match value {
            Value::Number(n) => n.as_f64().map(|f| json!(f)),
            Value::String(s) => s.trim().parse::<f64>().ok().map(|f| json!(f)),
            _ => None,
        },
        "bool" => match value {
            Value::Bool(b) => Some(json!(b)),
            Value::String(s) => s.trim().parse::<bool>().ok().map(|b| json!(b)),
            _ => None,
        },
        "datetime" => value.as_str().and_then(parse_timestamp).map(|ts| {
            json!(ts.format(CHRONO_DATETIME_FORMAT).to_string())
        }),
        name if is_integer_type(name) => match value {
            Value::Number(n) => n
                .as_i64()
                .map(|i| json!(i))
                .or_else(|| n.as_u64().map(|u| json!(u)))
                .or_else(|| n.as_f64().map(|f| json!(f.trunc() as i64))),
            Value::String(s) => s.trim().parse::<i64>().ok().map(|i| json!(i)),
            _ => None,
        },
        _ => None,
    }
}

fn is_integer_type(name: &str) -> bool {
    matches!(
        name,
        "int8" | "int16" | "int32" | "int64" | "uint8" | "uint16" | "uint32" | "uint64"
    )
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

fn default_for_type(type_name: &str) -> Value {
    match type_name {
        "string" => json!(""),
        "double" | "float32" => json!(0.0),
        "bool" => json!(false),
        "datetime" => json!(Utc::now().format(CHRONO_DATETIME_FORMAT).to_string()),
        name if is_integer_type(name) => json!(0),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonhouse_schema::parse_type;

    #[test]
    fn test_datatypes() {
        let ts = datatype("@timestamp", &parse_type("DateTime64(3)").unwrap());
        assert_eq!(
            ts,
            json!({"type": "datetime", "primary": true, "format": DATETIME_FORMAT})
        );
        assert_eq!(
            datatype("x", &parse_type("Nullable(Float64)").unwrap()),
            json!({"type": "double", "denullify": false})
        );
        assert_eq!(
            datatype("tags", &parse_type("Array(String)").unwrap()),
            json!({"type": "array", "elements": [{"type": "string", "index_options": {"fulltext": false}}]})
        );
        assert_eq!(
            datatype("attributes_values", &parse_type("Map(String, String)").unwrap()),
            json!({"type": "map", "elements": [
                {"type": "string", "index_options": {"fulltext": false}},
                {"type": "string", "index_options": {"fulltext": false}}
            ]})
        );
    }

    #[test]
    fn test_cast_to_type() {
        assert_eq!(cast_to_type(&json!(5), "string"), Some(json!("5")));
        assert_eq!(cast_to_type(&json!("7"), "int64"), Some(json!(7)));
        assert_eq!(cast_to_type(&json!(7.9), "int64"), Some(json!(7)));
        assert_eq!(cast_to_type(&json!("1.5"), "double"), Some(json!(1.5)));
        assert_eq!(cast_to_type(&json!("true"), "bool"), Some(json!(true)));
        assert_eq!(
            cast_to_type(&json!("2024-01-02T03:04:05+02:00"), "datetime"),
            Some(json!("2024-01-02 01:04:05 UTC"))
        );
        assert_eq!(cast_to_type(&json!("abc"), "int64"), None);
        assert_eq!(cast_to_type(&json!(1), "tuple"), None);
    }

    #[test]
    fn test_defaults() {
        assert_eq!(default_for_type("string"), json!(""));
        assert_eq!(default_for_type("int64"), json!(0));
        assert_eq!(default_for_type("array"), Value::Null);
    }
}
