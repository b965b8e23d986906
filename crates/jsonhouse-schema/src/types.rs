//! Type system for column-store values
//!
//! A closed set of descriptors: scalars (opaque backend names with
//! nullability), arrays and records. Arrays and records are never nullable
//! themselves; nullability lives on their scalar leaves.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Scalar(ScalarType),
    Array(Box<Type>),
    Record(RecordType),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScalarType {
    /// Backend type name including any parameter list, e.g. `DateTime64(3)`
    pub name: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Tuple,
    Nested,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordType {
    pub kind: RecordKind,
    pub fields: Vec<FieldType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldType {
    pub name: String,
    pub ty: Type,
}

impl Type {
    pub fn scalar(name: impl Into<String>) -> Self {
        Type::Scalar(ScalarType {
            name: name.into(),
            nullable: false,
        })
    }

    pub fn nullable_scalar(name: impl Into<String>) -> Self {
        Type::Scalar(ScalarType {
            name: name.into(),
            nullable: true,
        })
    }

    pub fn array(element: Type) -> Self {
        Type::Array(Box::new(element))
    }

    pub fn tuple(fields: Vec<FieldType>) -> Self {
        Type::Record(RecordType {
            kind: RecordKind::Tuple,
            fields,
        })
    }

    /// Placeholder for a column whose type text could not be parsed.
    pub fn unknown(text: &str) -> Self {
        Type::scalar(format!("Unknown({})", text.trim()))
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, Type::Scalar(s) if s.nullable)
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Type::Scalar(_))
    }

    /// Scalar name without its parameter list (`DateTime64(3)` -> `DateTime64`).
    /// Empty for arrays and records.
    pub fn base_name(&self) -> &str {
        match self {
            Type::Scalar(s) => s.base_name(),
            _ => "",
        }
    }

    pub fn is_datetime(&self) -> bool {
        self.base_name().starts_with("DateTime")
    }

    /// Maps are opaque scalars to the model, but behave like containers in DDL.
    pub fn is_map(&self) -> bool {
        self.base_name() == "Map"
    }

    /// True when any part of the type is an array, record or timestamp.
    pub fn contains_container_or_datetime(&self) -> bool {
        match self {
            Type::Scalar(_) => self.is_datetime(),
            Type::Array(_) | Type::Record(_) => true,
        }
    }

    /// Pushes nullability down to scalar leaves. `Nullable(Array(T))` is not
    /// expressible, so it becomes `Array(Nullable(T))`.
    pub fn into_nullable(self) -> Type {
        match self {
            Type::Scalar(s) => Type::Scalar(ScalarType {
                name: s.name,
                nullable: true,
            }),
            Type::Array(element) => Type::Array(Box::new(element.into_nullable())),
            Type::Record(record) => Type::Record(RecordType {
                kind: record.kind,
                fields: record
                    .fields
                    .into_iter()
                    .map(|f| FieldType {
                        name: f.name,
                        ty: f.ty.into_nullable(),
                    })
                    .collect(),
            }),
        }
    }

    /// Storage type for a freshly inferred value. Scalars become nullable
    /// except timestamps, which get millisecond precision; record leaves
    /// become nullable unless they are containers or timestamps themselves.
    pub fn to_column_type(&self) -> Type {
        match self {
            Type::Scalar(s) if s.name == "DateTime64" => Type::scalar("DateTime64(3)"),
            Type::Scalar(_) if self.is_datetime() => self.clone(),
            Type::Scalar(_) => self.clone().into_nullable(),
            Type::Array(_) => self.clone(),
            Type::Record(record) => Type::Record(RecordType {
                kind: record.kind,
                fields: record
                    .fields
                    .iter()
                    .map(|f| FieldType {
                        name: f.name.clone(),
                        ty: if f.ty.contains_container_or_datetime() {
                            f.ty.clone()
                        } else {
                            f.ty.clone().into_nullable()
                        },
                    })
                    .collect(),
            }),
        }
    }

    pub fn record_field(&self, name: &str) -> Option<&FieldType> {
        match self {
            Type::Record(record) => record.fields.iter().find(|f| f.name == name),
            _ => None,
        }
    }

    /// Inclusive bounds for integer scalars.
    pub fn integer_bounds(&self) -> Option<IntegerBounds> {
        let bounds = match self.base_name() {
            "Int8" => IntegerBounds::exact(i8::MIN, i8::MAX),
            "Int16" => IntegerBounds::exact(i16::MIN, i16::MAX),
            "Int32" => IntegerBounds::exact(i32::MIN, i32::MAX),
            "Int64" => IntegerBounds::exact(i64::MIN, i64::MAX),
            "Int128" => IntegerBounds::Exact {
                min: i128::MIN,
                max: i128::MAX,
            },
            "Int256" => IntegerBounds::Wide {
                min_magnitude: INT256_MIN_MAGNITUDE,
                max: INT256_MAX,
            },
            "UInt8" => IntegerBounds::exact(0, u8::MAX),
            "UInt16" => IntegerBounds::exact(0, u16::MAX),
            "UInt32" => IntegerBounds::exact(0, u32::MAX),
            "UInt64" => IntegerBounds::exact(0, u64::MAX),
            "UInt128" => IntegerBounds::Wide {
                min_magnitude: "0",
                max: UINT128_MAX,
            },
            "UInt256" => IntegerBounds::Wide {
                min_magnitude: "0",
                max: UINT256_MAX,
            },
            _ => return None,
        };
        Some(bounds)
    }

    pub fn is_integer(&self) -> bool {
        self.integer_bounds().is_some()
    }

    pub fn is_float(&self) -> bool {
        matches!(self.base_name(), "Float32" | "Float64")
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }
}

const UINT128_MAX: &str = "340282366920938463463374607431768211455";
const INT256_MIN_MAGNITUDE: &str = "57896044618658097711785492504343953926634992332820282019728792003956564819968";
const INT256_MAX: &str = "57896044618658097711785492504343953926634992332820282019728792003956564819967";
const UINT256_MAX: &str = "115792089237316195423570985008687907853269984665640564039457584007913129639935";

/// 2^127, exactly representable as `f64`
const TWO_POW_127: f64 = 170_141_183_460_469_231_731_687_303_715_884_105_728.0;

/// Inclusive range of an integer column.
///
/// Widths that fit `i128` on both ends compare exactly. `UInt128` and the
/// 256-bit types compare decimal magnitudes against their limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegerBounds {
    Exact { min: i128, max: i128 },
    Wide {
        /// Largest magnitude allowed for negative values
        min_magnitude: &'static str,
        max: &'static str,
    },
}

impl IntegerBounds {
    fn exact(min: impl Into<i128>, max: impl Into<i128>) -> Self {
        IntegerBounds::Exact {
            min: min.into(),
            max: max.into(),
        }
    }

    pub fn contains(&self, n: i128) -> bool {
        match *self {
            IntegerBounds::Exact { min, max } => n >= min && n <= max,
            IntegerBounds::Wide { .. } => self.contains_text(&n.to_string()),
        }
    }

    /// JSON numbers: integers as parsed, floats only when they are whole.
    pub fn contains_number(&self, n: &Number) -> bool {
        number_as_i128(n).map(|i| self.contains(i)).unwrap_or(false)
    }

    /// Decimal integer text with an optional sign.
    pub fn contains_text(&self, text: &str) -> bool {
        let text = text.trim();
        let (negative, digits) = match text.strip_prefix('-') {
            Some(digits) => (true, digits),
            None => (false, text.strip_prefix('+').unwrap_or(text)),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        match *self {
            IntegerBounds::Exact { .. } => text.parse::<i128>().map(|n| self.contains(n)).unwrap_or(false),
            IntegerBounds::Wide { min_magnitude, max } => {
                let digits = digits.trim_start_matches('0');
                let limit = if negative { min_magnitude } else { max };
                digits.len() < limit.len() || (digits.len() == limit.len() && digits <= limit)
            }
        }
    }
}

fn number_as_i128(n: &Number) -> Option<i128> {
    if let Some(i) = n.as_i64() {
        return Some(i.into());
    }
    if let Some(u) = n.as_u64() {
        return Some(u.into());
    }
    let f = n.as_f64()?;
    if f.fract() == 0.0 && (-TWO_POW_127..TWO_POW_127).contains(&f) {
        Some(f as i128)
    } else {
        None
    }
}

impl ScalarType {
    pub fn base_name(&self) -> &str {
        match self.name.find('(') {
            Some(idx) => self.name[..idx].trim_end(),
            None => &self.name,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Scalar(s) if s.nullable => write!(f, "Nullable({})", s.name),
            Type::Scalar(s) => f.write_str(&s.name),
            Type::Array(element) => write!(f, "Array({})", element),
            Type::Record(record) => {
                let keyword = match record.kind {
                    RecordKind::Tuple => "Tuple",
                    RecordKind::Nested => "Nested",
                };
                write!(f, "{}(", keyword)?;
                for (i, field) in record.fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} {}", render_field_name(&field.name), field.ty)?;
                }
                f.write_str(")")
            }
        }
    }
}

fn render_field_name(name: &str) -> String {
    let plain = !name.is_empty()
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
        && !name.as_bytes()[0].is_ascii_digit();
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferError {
    #[error("Field '{0}' is null, type is indeterminate")]
    Null(String),

    #[error("Field '{0}' is an empty array, type is indeterminate")]
    EmptyArray(String),

    #[error("Field '{0}' is an empty object, type is indeterminate")]
    EmptyObject(String),
}

/// Infers the column-store type of a JSON value.
pub fn infer_type(value: &Value, field_name: &str) -> Result<Type, InferError> {
    match value {
        Value::Null => Err(InferError::Null(field_name.to_string())),
        Value::Bool(_) => Ok(Type::scalar("Bool")),
        Value::String(s) => {
            if looks_like_timestamp(s) {
                Ok(Type::scalar("DateTime64"))
            } else {
                Ok(Type::scalar("String"))
            }
        }
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                return Ok(Type::scalar("Int64"));
            }
            match n.as_f64() {
                Some(f) if f.is_finite() && f.fract() == 0.0 => Ok(Type::scalar("Int64")),
                _ => Ok(Type::scalar("Float64")),
            }
        }
        Value::Array(items) => match items.first() {
            Some(first) => Ok(Type::array(infer_type(first, field_name)?)),
            None => Err(InferError::EmptyArray(field_name.to_string())),
        },
        Value::Object(map) => {
            if map.is_empty() {
                return Err(InferError::EmptyObject(field_name.to_string()));
            }
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut fields = Vec::with_capacity(keys.len());
            for key in keys {
                let nested = format!("{}.{}", field_name, key);
                fields.push(FieldType {
                    name: key.clone(),
                    ty: infer_type(&map[key.as_str()], &nested)?,
                });
            }
            Ok(Type::tuple(fields))
        }
    }
}

/// RFC 3339 (any fractional precision) or a bare `YYYY-MM-DDTHH:MM:SS`.
pub fn looks_like_timestamp(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").is_ok()
}
