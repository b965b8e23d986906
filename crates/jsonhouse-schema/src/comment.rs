//! Column comment metadata
//!
//! Column comments carry a small versioned `key=value` record, most
//! importantly the field name a column was encoded from:
//!
//! ```text
//! jsonhouseMetadataV1:fieldName=service.name
//! ```
//!
//! `%`, `,` and `=` inside keys and values are percent-escaped.

use std::collections::BTreeMap;

pub const COMMENT_PREFIX: &str = "jsonhouseMetadataV1";
pub const FIELD_NAME_KEY: &str = "fieldName";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentMetadata {
    values: BTreeMap<String, String>,
}

impl CommentMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_name(field_name: impl Into<String>) -> Self {
        let mut metadata = Self::new();
        metadata.set(FIELD_NAME_KEY, field_name);
        metadata
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn field_name(&self) -> Option<&str> {
        self.get(FIELD_NAME_KEY)
    }

    pub fn marshal(&self) -> String {
        let pairs: Vec<String> = self
            .values
            .iter()
            .map(|(k, v)| format!("{}={}", escape(k), escape(v)))
            .collect();
        format!("{}:{}", COMMENT_PREFIX, pairs.join(","))
    }

    /// Returns `None` for comments not written in this format.
    pub fn unmarshal(comment: &str) -> Option<Self> {
        let body = comment.strip_prefix(COMMENT_PREFIX)?.strip_prefix(':')?;
        let mut metadata = Self::new();
        for pair in body.split(',').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=')?;
            metadata.set(unescape(key), unescape(value));
        }
        Some(metadata)
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '%' => out.push_str("%25"),
            ',' => out.push_str("%2C"),
            '=' => out.push_str("%3D"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(text: &str) -> String {
    text.replace("%2C", ",")
        .replace("%3D", "=")
        .replace("%25", "%")
}
