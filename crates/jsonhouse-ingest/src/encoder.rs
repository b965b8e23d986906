//! Field name to column name encoding
//!
//! Encoding is not injective (`a.b` and `a_b` both become `a_b`), so the
//! first encoding seen for a `(table, field)` pair is pinned and never
//! changes. A reverse map remembers which original field first produced
//! each column name.

use crate::document::{flatten, Document};
use dashmap::DashMap;
use jsonhouse_schema::TIMESTAMP_FIELD;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

const MAX_COLUMN_NAME_LENGTH: usize = 256;

/// Lowercases ASCII alphanumerics and maps everything else to `_`.
pub fn encode_part(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Storage-safe column name for a (possibly dotted) field name.
pub fn encode_field_name(field: &str) -> String {
    if field == TIMESTAMP_FIELD {
        return field.to_string();
    }
    let mut encoded = encode_part(field);
    if encoded.starts_with(|c: char| c.is_ascii_digit()) {
        encoded.insert(0, '_');
    }
    if encoded.len() > MAX_COLUMN_NAME_LENGTH {
        warn!(column = %encoded, length = encoded.len(), "encoded field name is too long");
    }
    encoded
}

type EncodingKey = (String, String);

/// Engine-owned field encoding state, shared by every batch.
#[derive(Default)]
pub struct FieldEncoder {
    forward: DashMap<EncodingKey, String>,
    reverse: DashMap<EncodingKey, String>,
}

impl FieldEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every field of the batch and returns the batch's
    /// `column -> original field` map.
    ///
    /// Must run over the whole batch before any column is derived from it.
    pub fn collect(&self, table: &str, documents: &[Document]) -> BTreeMap<String, String> {
        let mut batch = BTreeMap::new();
        for document in documents {
            let leaves = flatten(document, ".");
            let fields = document
                .iter()
                .filter(|(_, v)| v.is_object())
                .map(|(k, _)| k)
                .chain(leaves.keys());
            for field in fields {
                let column = self.register(table, field);
                batch.entry(column.clone()).or_insert_with(|| {
                    self.original_name(table, &column)
                        .unwrap_or_else(|| field.clone())
                });
            }
        }
        batch
    }

    fn register(&self, table: &str, field: &str) -> String {
        let column = self
            .forward
            .entry((table.to_string(), field.to_string()))
            .or_insert_with(|| encode_field_name(field))
            .clone();
        self.reverse
            .entry((table.to_string(), column.clone()))
            .or_insert_with(|| field.to_string());
        column
    }

    pub fn encoding_for(&self, table: &str, field: &str) -> Option<String> {
        self.forward
            .get(&(table.to_string(), field.to_string()))
            .map(|c| c.clone())
    }

    pub fn original_name(&self, table: &str, column: &str) -> Option<String> {
        self.reverse
            .get(&(table.to_string(), column.to_string()))
            .map(|f| f.clone())
    }

    /// Every known `column -> original field` pair of a table.
    pub fn reverse_map(&self, table: &str) -> BTreeMap<String, String> {
        self.reverse
            .iter()
            .filter(|entry| entry.key().0 == table)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect()
    }

    /// Rewrites a document to column names. With `flatten_nested` every
    /// leaf becomes a top-level column named after its encoded dotted path;
    /// otherwise only top-level keys are renamed and nested keys are
    /// sanitized in place.
    pub fn rewrite(&self, table: &str, document: Document, flatten_nested: bool) -> Document {
        if flatten_nested {
            let mut out = Document::new();
            for (path, value) in flatten(&document, ".") {
                let column = self
                    .encoding_for(table, &path)
                    .unwrap_or_else(|| encode_field_name(&path));
                out.insert(column, value);
            }
            return out;
        }

        document
            .into_iter()
            .map(|(key, value)| {
                let column = self
                    .encoding_for(table, &key)
                    .unwrap_or_else(|| encode_field_name(&key));
                (column, sanitize_nested(value))
            })
            .collect()
    }
}

fn sanitize_nested(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (encode_part(&k), sanitize_nested(v)))
                .collect(),
        ),
        other => other,
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
    fn test_encode_field_name() {
        assert_eq!(encode_field_name("Service.Name"), "service_name");
        assert_eq!(encode_field_name("1st-field"), "_1st_field");
        assert_eq!(encode_field_name("@timestamp"), "@timestamp");
        assert_eq!(encode_field_name("héllo"), "h_llo");
        assert_eq!(encode_field_name(""), "");
    }

    #[test]
    fn test_over_length_still_encoded() {
        let long = "A".repeat(300);
        assert_eq!(encode_field_name(&long), "a".repeat(300));
    }

    #[test]
    fn test_collision_pinned_to_first_field() {
        let encoder = FieldEncoder::new();
        let batch = encoder.collect("t", &[doc(json!({"a.b": 1})), doc(json!({"a_b": 2}))]);
        assert_eq!(batch.get("a_b").map(String::as_str), Some("a.b"));
        assert_eq!(encoder.encoding_for("t", "a_b").as_deref(), Some("a_b"));
        assert_eq!(encoder.original_name("t", "a_b").as_deref(), Some("a.b"));
        // a later batch does not rename anything
        let later = encoder.collect("t", &[doc(json!({"a_b": 3}))]);
        assert_eq!(later.get("a_b").map(String::as_str), Some("a.b"));
    }

    #[test]
    fn test_tables_are_independent() {
        let encoder = FieldEncoder::new();
        encoder.collect("one", &[doc(json!({"X": 1}))]);
        encoder.collect("two", &[doc(json!({"x": 1}))]);
        assert_eq!(encoder.original_name("one", "x").as_deref(), Some("X"));
        assert_eq!(encoder.original_name("two", "x").as_deref(), Some("x"));
        assert_eq!(encoder.reverse_map("one").len(), 1);
    }

    #[test]
    fn test_rewrite_flattened() {
        let encoder = FieldEncoder::new();
        let input = doc(json!({"Host": {"Name": "a", "IP": "b"}, "tags": ["x"]}));
        encoder.collect("t", std::slice::from_ref(&input));
        let out = encoder.rewrite("t", input, true);
        assert_eq!(
            Value::Object(out),
            json!({"host_name": "a", "host_ip": "b", "tags": ["x"]})
        );
        assert_eq!(encoder.original_name("t", "host_ip").as_deref(), Some("Host.IP"));
    }

    #[test]
    fn test_rewrite_nested_kept() {
        let encoder = FieldEncoder::new();
        let input = doc(json!({"Host": {"Name": "a", "9x": {"Y": 1}}}));
        encoder.collect("t", std::slice::from_ref(&input));
        let out = encoder.rewrite("t", input, false);
        assert_eq!(Value::Object(out), json!({"host": {"name": "a", "9x": {"y": 1}}}));
    }
}
