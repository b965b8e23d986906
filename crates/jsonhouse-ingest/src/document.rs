//! JSON documents and the pre-ingest transformer pipeline

use crate::error::IngestError;
use serde_json::{Map, Value};

/// One incoming JSON object
pub type Document = Map<String, Value>;

/// String values as-is, everything else as compact JSON.
pub fn stringify_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Leaf paths of a document joined with `separator`. Arrays and empty
/// objects are leaves.
pub fn flatten(document: &Document, separator: &str) -> Document {
    let mut out = Document::new();
    flatten_into(document, "", separator, &mut out);
    out
}

fn flatten_into(document: &Document, prefix: &str, separator: &str, out: &mut Document) {
    for (key, value) in document {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}{}{}", prefix, separator, key)
        };
        match value {
            Value::Object(nested) if !nested.is_empty() => {
                flatten_into(nested, &path, separator, out)
            }
            _ => {
                out.insert(path, value.clone());
            }
        }
    }
}

/// Rejects names the document-store API would reject for an index.
pub fn validate_table_name(name: &str) -> Result<(), IngestError> {
    let reject = |reason: &str| {
        Err(IngestError::InvalidTableName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    if name.is_empty() {
        return reject("must not be empty");
    }
    if name == "." || name == ".." {
        return reject("must not be '.' or '..'");
    }
    if name.starts_with(['-', '_', '+']) {
        return reject("must not start with '-', '_' or '+'");
    }
    if name.chars().any(|c| c.is_uppercase()) {
        return reject("must be lowercase");
    }
    if let Some(c) = name
        .chars()
        .find(|c| matches!(c, '\\' | '/' | '*' | '?' | '"' | '<' | '>' | '|' | ',' | '#' | ' '))
    {
        return reject(&format!("must not contain '{}'", c));
    }
    Ok(())
}

/// A rewrite applied to every document after field-name encoding.
pub trait DocumentTransformer: Send + Sync {
    fn transform(&self, document: Document) -> Document;
}

/// Adds the logical table name to documents routed to the common table.
pub struct AddIndexName {
    field: String,
    index_name: String,
}

impl AddIndexName {
    pub fn new(field: impl Into<String>, index_name: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            index_name: index_name.into(),
        }
    }
}

impl DocumentTransformer for AddIndexName {
    fn transform(&self, mut document: Document) -> Document {
        document.insert(self.field.clone(), Value::String(self.index_name.clone()));
        document
    }
}

/// Runs transformers in order.
#[derive(Default)]
pub struct TransformerPipeline {
    stages: Vec<Box<dyn DocumentTransformer>>,
}

impl TransformerPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, stage: impl DocumentTransformer + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn apply(&self, documents: Vec<Document>) -> Vec<Document> {
        documents
            .into_iter()
            .map(|doc| self.stages.iter().fold(doc, |doc, stage| stage.transform(doc)))
            .collect()
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
    fn test_stringify_value() {
        assert_eq!(stringify_value(&json!("plain")), "plain");
        assert_eq!(stringify_value(&json!(10)), "10");
        assert_eq!(stringify_value(&json!([81, "oops", 69])), "[81,\"oops\",69]");
    }

    #[test]
    fn test_flatten() {
        let flat = flatten(
            &doc(json!({"a": {"b": 1, "c": {"d": "x"}}, "e": [1], "f": {}})),
            ".",
        );
        assert_eq!(
            Value::Object(flat),
            json!({"a.b": 1, "a.c.d": "x", "e": [1], "f": {}})
        );
    }

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("logs-2024.01").is_ok());
        for bad in ["", ".", "..", "_hidden", "-x", "+x", "Logs", "a b", "a/b", "a*", "a,b", "a#b"] {
            assert!(validate_table_name(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_pipeline_adds_index_name() {
        let pipeline = TransformerPipeline::new().with(AddIndexName::new("__index", "logs"));
        let out = pipeline.apply(vec![doc(json!({"foo": "bar"}))]);
        assert_eq!(Value::Object(out[0].clone()), json!({"__index": "logs", "foo": "bar"}));
    }
}
