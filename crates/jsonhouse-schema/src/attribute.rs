//! Attribute kinds for overflow storage
//!
//! Fields without a column of their own are stored in generic map columns.
//! Each kind accepts a category of values; kinds are tried in the table's
//! configured order and the first acceptor wins.

use crate::types::{looks_like_timestamp, Type};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeKind {
    pub ty: Type,
}

impl AttributeKind {
    fn of(ty: Type) -> Self {
        Self { ty }
    }

    /// Catch-all kind; every table must have one.
    pub fn string() -> Self {
        Self::of(Type::scalar("String"))
    }

    pub fn int64() -> Self {
        Self::of(Type::scalar("Int64"))
    }

    pub fn float64() -> Self {
        Self::of(Type::scalar("Float64"))
    }

    pub fn bool() -> Self {
        Self::of(Type::scalar("Bool"))
    }

    pub fn datetime() -> Self {
        Self::of(Type::scalar("DateTime64"))
    }

    /// Looks a kind up by its type name, as written in configuration.
    pub fn named(name: &str) -> Option<Self> {
        match name {
            "String" => Some(Self::string()),
            "Int64" => Some(Self::int64()),
            "Float64" => Some(Self::float64()),
            "Bool" => Some(Self::bool()),
            "DateTime64" => Some(Self::datetime()),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        self.ty.base_name()
    }

    pub fn is_catch_all(&self) -> bool {
        self.name() == "String"
    }

    /// Whether a value converts losslessly into this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        if self.is_catch_all() {
            return true;
        }
        if let Some(bounds) = self.ty.integer_bounds() {
            return match value {
                Value::Number(n) => bounds.contains_number(n),
                _ => false,
            };
        }
        if self.ty.is_float() {
            return value.is_number();
        }
        if self.ty.is_datetime() {
            return value.as_str().map(looks_like_timestamp).unwrap_or(false);
        }
        match self.name() {
            "Bool" => value.is_boolean(),
            _ => false,
        }
    }
}
