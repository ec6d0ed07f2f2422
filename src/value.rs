//! Scalar values and declared column types
//!
//! Every cell in the cache is one of five scalar shapes. Columns carry a
//! declared `ColumnType`; when batches disagree about a column's type the
//! widening table in [`ColumnType::widen`] decides the outcome:
//!
//! - `Null` is the identity (a column only ever seen empty)
//! - `Boolean` is a restricted integer domain
//! - numeric types widen to `Real`
//! - anything combined with `Text` is `Text`

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Declared type of a cached column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Only null values observed so far
    Null,
    Boolean,
    Integer,
    Real,
    Text,
}

impl ColumnType {
    /// Get the string representation stored in the metadata tables
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Null => "null",
            ColumnType::Boolean => "boolean",
            ColumnType::Integer => "integer",
            ColumnType::Real => "real",
            ColumnType::Text => "text",
        }
    }

    /// Get all column types
    pub fn all() -> &'static [ColumnType] {
        &[
            ColumnType::Null,
            ColumnType::Boolean,
            ColumnType::Integer,
            ColumnType::Real,
            ColumnType::Text,
        ]
    }

    fn rank(&self) -> u8 {
        match self {
            ColumnType::Null => 0,
            ColumnType::Boolean => 1,
            ColumnType::Integer => 2,
            ColumnType::Real => 3,
            ColumnType::Text => 4,
        }
    }

    /// Smallest type able to hold values of both `self` and `other`.
    ///
    /// The five types form a chain (`Null < Boolean < Integer < Real < Text`),
    /// so widening is the maximum of the two.
    pub fn widen(self, other: ColumnType) -> ColumnType {
        if other.rank() > self.rank() { other } else { self }
    }
}

impl FromStr for ColumnType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "null" | "none" => Ok(ColumnType::Null),
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            "integer" | "int" | "int64" => Ok(ColumnType::Integer),
            "real" | "float" | "float64" | "double" => Ok(ColumnType::Real),
            "text" | "string" | "str" => Ok(ColumnType::Text),
            _ => Err(crate::Error::Metadata(format!("Unknown column type: {}", s))),
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The type this value was observed as
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Null => ColumnType::Null,
            Value::Boolean(_) => ColumnType::Boolean,
            Value::Integer(_) => ColumnType::Integer,
            Value::Real(_) => ColumnType::Real,
            Value::Text(_) => ColumnType::Text,
        }
    }

    /// Convert into `target`, returning `None` when the conversion would lose
    /// information. Null converts to null under every type.
    pub fn coerce(&self, target: ColumnType) -> Option<Value> {
        match (self, target) {
            (Value::Null, _) => Some(Value::Null),
            (_, ColumnType::Null) => None,
            (v, t) if v.column_type() == t => Some(v.clone()),

            (v, ColumnType::Text) => Some(Value::Text(v.to_text())),

            (Value::Boolean(b), ColumnType::Integer) => Some(Value::Integer(i64::from(*b))),
            (Value::Boolean(b), ColumnType::Real) => Some(Value::Real(if *b { 1.0 } else { 0.0 })),
            (Value::Integer(i), ColumnType::Real) => Some(Value::Real(*i as f64)),

            (Value::Integer(i), ColumnType::Boolean) => match *i {
                0 => Some(Value::Boolean(false)),
                1 => Some(Value::Boolean(true)),
                _ => None,
            },
            (Value::Real(r), ColumnType::Integer) => {
                if r.fract() == 0.0 && r.is_finite() && r.abs() < 9.0e15 {
                    Some(Value::Integer(*r as i64))
                } else {
                    None
                }
            }
            (Value::Real(r), ColumnType::Boolean) => Value::Real(*r)
                .coerce(ColumnType::Integer)
                .and_then(|v| v.coerce(ColumnType::Boolean)),

            (Value::Text(s), ColumnType::Boolean) => match s.trim().to_lowercase().as_str() {
                "true" | "1" => Some(Value::Boolean(true)),
                "false" | "0" => Some(Value::Boolean(false)),
                _ => None,
            },
            (Value::Text(s), ColumnType::Integer) => s.trim().parse::<i64>().ok().map(Value::Integer),
            (Value::Text(s), ColumnType::Real) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|r| r.is_finite())
                .map(Value::Real),

            _ => None,
        }
    }

    fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Real(r) => r.to_string(),
            Value::Text(s) => s.clone(),
        }
    }

    /// Read a raw SQLite cell under a declared column type.
    ///
    /// Booleans are stored as 0/1 integers, so the declared type is needed to
    /// recover them.
    pub fn from_sql_typed(raw: Value, declared: ColumnType) -> Value {
        match declared {
            ColumnType::Boolean | ColumnType::Integer | ColumnType::Real | ColumnType::Text => {
                raw.coerce(declared).unwrap_or(raw)
            }
            ColumnType::Null => raw,
        }
    }

    /// Build a value from a JSON scalar. Arrays and objects are rejected.
    pub fn from_json(json: &serde_json::Value) -> crate::Result<Value> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Real(f))
                } else {
                    Err(crate::Error::InvalidRecord(format!("Number out of range: {}", n)))
                }
            }
            serde_json::Value::String(s) => Ok(Value::Text(s.clone())),
            other => Err(crate::Error::InvalidRecord(format!(
                "Nested values are not supported: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            other => write!(f, "{}", other.to_text()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::from(rusqlite::types::Null),
            Value::Boolean(b) => ToSqlOutput::from(i64::from(*b)),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Real(r) => ToSqlOutput::from(*r),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(Value::Null),
            ValueRef::Integer(i) => Ok(Value::Integer(i)),
            ValueRef::Real(r) => Ok(Value::Real(r)),
            ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                .map(|s| Value::Text(s.to_string()))
                .map_err(|e| FromSqlError::Other(Box::new(e))),
            ValueRef::Blob(_) => Err(FromSqlError::InvalidType),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_type_roundtrip() {
        for ty in ColumnType::all() {
            let parsed: ColumnType = ty.as_str().parse().unwrap();
            assert_eq!(*ty, parsed);
        }
    }

    #[test]
    fn test_column_type_aliases() {
        assert_eq!(ColumnType::from_str("int").unwrap(), ColumnType::Integer);
        assert_eq!(ColumnType::from_str("float").unwrap(), ColumnType::Real);
        assert_eq!(ColumnType::from_str("string").unwrap(), ColumnType::Text);
        assert!(ColumnType::from_str("uuid").is_err());
    }

    #[test]
    fn test_widening_table() {
        use ColumnType::*;
        assert_eq!(Integer.widen(Real), Real);
        assert_eq!(Real.widen(Integer), Real);
        assert_eq!(Boolean.widen(Integer), Integer);
        assert_eq!(Boolean.widen(Real), Real);
        assert_eq!(Integer.widen(Text), Text);
        assert_eq!(Text.widen(Boolean), Text);
        assert_eq!(Null.widen(Boolean), Boolean);
        assert_eq!(Real.widen(Null), Real);
    }

    #[test]
    fn test_coerce_widening_always_succeeds() {
        assert_eq!(Value::Integer(3).coerce(ColumnType::Real), Some(Value::Real(3.0)));
        assert_eq!(Value::Boolean(true).coerce(ColumnType::Integer), Some(Value::Integer(1)));
        assert_eq!(Value::Boolean(false).coerce(ColumnType::Text), Some(Value::from("false")));
        assert_eq!(Value::Real(1500.5).coerce(ColumnType::Text), Some(Value::from("1500.5")));
        assert_eq!(Value::Null.coerce(ColumnType::Integer), Some(Value::Null));
    }

    #[test]
    fn test_coerce_narrowing_is_lossless_only() {
        assert_eq!(Value::from("2019").coerce(ColumnType::Integer), Some(Value::Integer(2019)));
        assert_eq!(Value::Real(3.0).coerce(ColumnType::Integer), Some(Value::Integer(3)));
        assert_eq!(Value::Real(3.5).coerce(ColumnType::Integer), None);
        assert_eq!(Value::from("abc").coerce(ColumnType::Real), None);
        assert_eq!(Value::Integer(7).coerce(ColumnType::Boolean), None);
    }

    #[test]
    fn test_text_to_real_rejects_non_finite() {
        for text in ["NaN", "nan", "inf", "-infinity", "1e400"] {
            assert_eq!(Value::from(text).coerce(ColumnType::Real), None, "{}", text);
        }
        assert_eq!(Value::from(" 2.5 ").coerce(ColumnType::Real), Some(Value::Real(2.5)));
    }

    #[test]
    fn test_from_json() {
        assert_eq!(Value::from_json(&serde_json::json!(12)).unwrap(), Value::Integer(12));
        assert_eq!(Value::from_json(&serde_json::json!(1.5)).unwrap(), Value::Real(1.5));
        assert_eq!(Value::from_json(&serde_json::json!(null)).unwrap(), Value::Null);
        assert!(Value::from_json(&serde_json::json!([1, 2])).is_err());
    }
}
