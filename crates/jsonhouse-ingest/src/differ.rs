//! Name-level difference between documents and table schemas
//!
//! [`difference`] keeps the leaves that have no column, and
//! [`remove_non_schema_fields`] keeps the ones that do. Values inside
//! record-typed columns are compared against the record's fields. Types
//! are not checked here.

use crate::document::Document;
use jsonhouse_schema::{ColumnSet, FieldType, Type};
use serde_json::Value;

/// Leaves of `document` not covered by any column.
pub fn difference(document: &Document, columns: &ColumnSet) -> Document {
    let mut out = Document::new();
    for (name, value) in document {
        match columns.get(name) {
            None => {
                out.insert(name.clone(), value.clone());
            }
            Some(column) => {
                if let (Value::Object(nested), Type::Record(record)) = (value, &column.ty) {
                    let mut path = vec![name.clone()];
                    uncovered_fields(nested, &record.fields, &mut path, &mut out);
                }
            }
        }
    }
    out
}

fn uncovered_fields(
    document: &Document,
    fields: &[FieldType],
    path: &mut Vec<String>,
    out: &mut Document,
) {
    for (name, value) in document {
        match fields.iter().find(|f| &f.name == name) {
            None => insert_at_path(out, path, name, value.clone()),
            Some(field) => {
                if let (Value::Object(nested), Type::Record(record)) = (value, &field.ty) {
                    path.push(name.clone());
                    uncovered_fields(nested, &record.fields, path, out);
                    path.pop();
                }
            }
        }
    }
}

fn insert_at_path(out: &mut Document, path: &[String], name: &str, value: Value) {
    let mut current = out;
    for key in path {
        let slot = current
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Document::new()));
        if !slot.is_object() {
            *slot = Value::Object(Document::new());
        }
        current = match slot {
            Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert(name.to_string(), value);
}

/// `document` restricted to fields that have a column. Record values lose
/// their uncovered nested fields; records left empty are dropped.
pub fn remove_non_schema_fields(document: Document, columns: &ColumnSet) -> Document {
    let mut out = Document::new();
    for (name, value) in document {
        let Some(column) = columns.get(&name) else {
            continue;
        };
        match (value, &column.ty) {
            (Value::Object(nested), Type::Record(record)) => {
                let kept = covered_fields(nested, &record.fields);
                if !kept.is_empty() {
                    out.insert(name, Value::Object(kept));
                }
            }
            (value, _) => {
                out.insert(name, value);
            }
        }
    }
    out
}

fn covered_fields(document: Document, fields: &[FieldType]) -> Document {
    let mut out = Document::new();
    for (name, value) in document {
        let Some(field) = fields.iter().find(|f| f.name == name) else {
            continue;
        };
        match (value, &field.ty) {
            (Value::Object(nested), Type::Record(record)) => {
                let kept = covered_fields(nested, &record.fields);
                if !kept.is_empty() {
                    out.insert(name, Value::Object(kept));
                }
            }
            (Value::Object(nested), _) if nested.is_empty() => {}
            (value, _) => {
                out.insert(name, value);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonhouse_schema::{parse_type, Column, Provenance};
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn columns(defs: &[(&str, &str)]) -> ColumnSet {
        defs.iter()
            .map(|(name, ty)| {
                (
                    name.to_string(),
                    Column::new(*name, parse_type(ty).unwrap(), Provenance::Discovered),
                )
            })
            .collect()
    }

    #[test]
    fn test_difference_top_level() {
        let cols = columns(&[("a", "Int64"), ("b", "String")]);
        let diff = difference(&doc(json!({"a": 1, "c": "x", "d": {"e": 1}})), &cols);
        assert_eq!(Value::Object(diff), json!({"c": "x", "d": {"e": 1}}));
    }

    #[test]
    fn test_difference_inside_record() {
        let cols = columns(&[("r", "Tuple(a Int64, n Tuple(x String))")]);
        let input = doc(json!({"r": {"a": 1, "b": 2, "n": {"x": "1", "y": "2"}}}));
        let diff = difference(&input, &cols);
        assert_eq!(Value::Object(diff), json!({"r": {"b": 2, "n": {"y": "2"}}}));

        let kept = remove_non_schema_fields(input, &cols);
        assert_eq!(Value::Object(kept), json!({"r": {"a": 1, "n": {"x": "1"}}}));
    }

    #[test]
    fn test_remove_drops_emptied_records() {
        let cols = columns(&[("r", "Tuple(a Int64)"), ("s", "String")]);
        let kept = remove_non_schema_fields(doc(json!({"r": {"b": 1}, "s": "x", "t": 1})), &cols);
        assert_eq!(Value::Object(kept), json!({"s": "x"}));
    }

    #[test]
    fn test_covered_name_with_scalar_type_not_recursed() {
        // type mismatch is left to the validator
        let cols = columns(&[("s", "String")]);
        let input = doc(json!({"s": {"x": 1}}));
        assert!(difference(&input, &cols).is_empty());
        assert_eq!(Value::Object(remove_non_schema_fields(input, &cols)), json!({"s": {"x": 1}}));
    }
}
