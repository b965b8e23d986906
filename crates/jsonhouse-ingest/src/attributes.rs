//! Overflow storage for fields without a column
//!
//! Each entry keeps its key, value and inferred type together, so the
//! per-kind key, value and type sequences cannot drift apart.

use crate::document::{stringify_value, Document};
use crate::error::IngestError;
use jsonhouse_schema::{infer_type, AttributeKind, Type, ATTRIBUTES_METADATA_COLUMN, ATTRIBUTES_VALUES_COLUMN};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

pub const METADATA_VERSION: &str = "v1";

/// Type name recorded when a value's type cannot be inferred
pub const UNDEFINED_TYPE: &str = "Undefined";

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeEntry {
    pub key: String,
    pub value: Value,
    /// `None` when inference failed (null, empty array or object)
    pub ty: Option<Type>,
    /// Name of the attribute kind that accepted the value
    pub kind: String,
}

impl AttributeEntry {
    pub fn type_name(&self) -> String {
        self.ty
            .as_ref()
            .map(Type::to_string)
            .unwrap_or_else(|| UNDEFINED_TYPE.to_string())
    }

    /// `v1;<Type>`
    pub fn metadata(&self) -> String {
        format!("{};{}", METADATA_VERSION, self.type_name())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeMap {
    entries: Vec<AttributeEntry>,
}

impl AttributeMap {
    /// Routes every top-level field of `fields` to the first kind that
    /// accepts it. Keys are processed in sorted order.
    pub fn build(table: &str, fields: &Document, kinds: &[AttributeKind]) -> Result<Self, IngestError> {
        let mut map = AttributeMap::default();
        let mut keys: Vec<&String> = fields.keys().collect();
        keys.sort();
        for key in keys {
            let value = &fields[key.as_str()];
            map.push(table, key, value, kinds)?;
        }
        Ok(map)
    }

    fn push(&mut self, table: &str, key: &str, value: &Value, kinds: &[AttributeKind]) -> Result<(), IngestError> {
        let kind = kinds
            .iter()
            .find(|k| k.accepts(value))
            .ok_or_else(|| IngestError::NoAttributeKind {
                table: table.to_string(),
                field: key.to_string(),
            })?;
        self.entries.push(AttributeEntry {
            key: key.to_string(),
            value: value.clone(),
            ty: infer_type(value, key).ok(),
            kind: kind.name().to_string(),
        });
        Ok(())
    }

    pub fn entries(&self) -> &[AttributeEntry] {
        &self.entries
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn remove_keys(&mut self, keys: &HashSet<String>) {
        self.entries.retain(|e| !keys.contains(&e.key));
    }

    /// A copy with validator-rejected fields added, typed by what was
    /// actually observed in the document.
    pub fn with_invalid_fields(
        &self,
        table: &str,
        invalid: &Document,
        kinds: &[AttributeKind],
    ) -> Result<Self, IngestError> {
        let mut merged = self.clone();
        let mut keys: Vec<&String> = invalid.keys().collect();
        keys.sort();
        for key in keys {
            merged.push(table, key, &invalid[key.as_str()], kinds)?;
        }
        Ok(merged)
    }

    /// The values and metadata map columns for one row. Maps without
    /// entries are left out; empty string values are not stored.
    pub fn render(&self) -> Document {
        let mut values = BTreeMap::new();
        let mut metadata = BTreeMap::new();
        for entry in &self.entries {
            let value = stringify_value(&entry.value);
            if !value.is_empty() {
                values.insert(entry.key.clone(), Value::String(value));
            }
            metadata.insert(entry.key.clone(), Value::String(entry.metadata()));
        }

        let mut out = Document::new();
        if !values.is_empty() {
            out.insert(ATTRIBUTES_VALUES_COLUMN.to_string(), Value::Object(values.into_iter().collect()));
        }
        if !metadata.is_empty() {
            out.insert(ATTRIBUTES_METADATA_COLUMN.to_string(), Value::Object(metadata.into_iter().collect()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_first_acceptor_wins() {
        let kinds = vec![AttributeKind::int64(), AttributeKind::float64(), AttributeKind::string()];
        let map = AttributeMap::build("t", &doc(json!({"b": 1.5, "a": 2.0, "c": "x"})), &kinds).unwrap();
        let routed: Vec<(&str, &str)> = map
            .entries()
            .iter()
            .map(|e| (e.key.as_str(), e.kind.as_str()))
            .collect();
        assert_eq!(routed, vec![("a", "Int64"), ("b", "Float64"), ("c", "String")]);
    }

    #[test]
    fn test_no_acceptor_is_an_error() {
        let kinds = vec![AttributeKind::int64()];
        let err = AttributeMap::build("t", &doc(json!({"s": "text"})), &kinds).unwrap_err();
        assert!(matches!(err, IngestError::NoAttributeKind { ref field, .. } if field == "s"));
    }

    #[test]
    fn test_render_maps() {
        let kinds = vec![AttributeKind::string()];
        let map = AttributeMap::build(
            "t",
            &doc(json!({"n": 10, "s": "", "arr": [1, "x"], "nil": null})),
            &kinds,
        )
        .unwrap();
        let row = map.render();
        assert_eq!(
            Value::Object(row),
            json!({
                "attributes_values": {"arr": "[1,\"x\"]", "n": "10", "nil": "null"},
                "attributes_metadata": {
                    "arr": "v1;Array(Int64)",
                    "n": "v1;Int64",
                    "nil": "v1;Undefined",
                    "s": "v1;String"
                }
            })
        );
    }

    #[test]
    fn test_invalid_fields_use_observed_type() {
        let kinds = vec![AttributeKind::string()];
        let map = AttributeMap::default()
            .with_invalid_fields("t", &doc(json!({"string_field": 10})), &kinds)
            .unwrap();
        assert_eq!(map.entries()[0].metadata(), "v1;Int64");
        assert_eq!(map.entries()[0].kind, "String");
    }
}
