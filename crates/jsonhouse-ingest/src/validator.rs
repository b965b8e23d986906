//! Value validation against existing column types
//!
//! Fields whose values do not fit their column are taken out of the
//! document and returned, so they can be stored as overflow instead of
//! failing the write.

use crate::document::Document;
use jsonhouse_schema::{infer_type, RecordKind, Table, Type};
use serde_json::Value;

/// Removes fields that do not fit their column and returns them.
pub fn validate(table: &Table, document: &mut Document) -> Document {
    let columns = table.columns();
    let mut invalid = Document::new();
    for (name, column) in columns.iter() {
        let Some(value) = document.get(name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        if !value_fits(name, value, &column.ty) {
            if let Some(value) = document.remove(name) {
                invalid.insert(name.clone(), value);
            }
        }
    }
    invalid
}

/// Whether `value` can be stored in a column of type `ty`.
pub fn value_fits(field: &str, value: &Value, ty: &Type) -> bool {
    match ty {
        Type::Scalar(_) => scalar_fits(field, value, ty),
        Type::Array(element) => match value {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .all(|(i, item)| value_fits(&format!("{}[{}]", field, i), item, element)),
            _ => false,
        },
        Type::Record(record) => match (record.kind, value) {
            (RecordKind::Tuple, Value::Object(map)) => record_fits(field, map, ty),
            (RecordKind::Nested, Value::Array(items)) => items.iter().all(|item| match item {
                Value::Object(map) => record_fits(field, map, ty),
                _ => false,
            }),
            _ => false,
        },
    }
}

fn record_fits(field: &str, map: &Document, ty: &Type) -> bool {
    map.iter().all(|(key, value)| match ty.record_field(key) {
        Some(nested) => value.is_null() || value_fits(&format!("{}.{}", field, key), value, &nested.ty),
        None => false,
    })
}

fn scalar_fits(field: &str, value: &Value, column: &Type) -> bool {
    let Ok(observed) = infer_type(value, field) else {
        return false;
    };
    let column_name = match column.base_name() {
        "LowCardinality" if column_inner(column) == Some("String") => "String",
        name => name,
    };

    if column.is_numeric() {
        return numeric_fits(value, column);
    }

    match (column_name, observed.base_name()) {
        ("String", _) => value.is_string(),
        (name, "DateTime64") if name.starts_with("DateTime") => true,
        (name, observed) => name == observed,
    }
}

fn column_inner(column: &Type) -> Option<&str> {
    match column {
        Type::Scalar(s) => s
            .name
            .find('(')
            .and_then(|open| s.name[open + 1..].strip_suffix(')')),
        _ => None,
    }
}

fn numeric_fits(value: &Value, column: &Type) -> bool {
    if column.is_float() {
        return match value {
            Value::Number(_) => true,
            Value::String(s) => s.trim().parse::<f64>().is_ok(),
            _ => false,
        };
    }

    let Some(bounds) = column.integer_bounds() else {
        return false;
    };
    match value {
        Value::Number(n) => bounds.contains_number(n),
        Value::String(s) => bounds.contains_text(s),
        _ => false,
    }
}
