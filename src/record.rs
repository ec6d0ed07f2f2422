//! Records - one logical row as an ordered column → value mapping

use crate::value::Value;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// One logical row.
///
/// Column order follows insertion order. Inserting a column that is already
/// present replaces its value in place.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    /// Set a column, returning the previous value if there was one
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let column = column.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((column, value));
                None
            }
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Like [`get`](Self::get) but ignoring ASCII case. When several
    /// spellings are present the last one wins.
    pub fn get_ignore_case(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .rev()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        let idx = self.fields.iter().position(|(name, _)| name == column)?;
        Some(self.fields.remove(idx).1)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Keep only `columns`, in the requested order. Columns the record does
    /// not carry come back as null.
    pub fn project(&self, columns: &[String]) -> Record {
        let fields = columns
            .iter()
            .map(|c| (c.clone(), self.get(c).cloned().unwrap_or(Value::Null)))
            .collect();
        Record { fields }
    }

    /// Overlay every column of `other` on top of this record
    pub fn merge_from(&mut self, other: &Record) {
        for (column, value) in other.iter() {
            self.insert(column, value.clone());
        }
    }

    /// Build a record from a JSON object, keeping the object's key order
    pub fn from_json_object(map: &serde_json::Map<String, serde_json::Value>) -> crate::Result<Self> {
        let mut record = Record::new();
        for (column, json) in map {
            record.insert(column.clone(), Value::from_json(json)?);
        }
        Ok(record)
    }

    /// Build a record from any JSON value that must be an object
    pub fn from_json(json: &serde_json::Value) -> crate::Result<Self> {
        match json {
            serde_json::Value::Object(map) => Self::from_json_object(map),
            other => Err(crate::Error::InvalidRecord(format!(
                "Expected a JSON object per row, got: {}",
                other
            ))),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (column, value) in &self.fields {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_replaces_in_place() {
        let mut record = Record::new().with("id", 1).with("income", 1000);
        let previous = record.insert("id", 2);

        assert_eq!(previous, Some(Value::Integer(1)));
        assert_eq!(record.columns().collect::<Vec<_>>(), vec!["id", "income"]);
        assert_eq!(record.get("id"), Some(&Value::Integer(2)));
    }

    #[test]
    fn test_project_fills_missing_with_null() {
        let record = Record::new().with("id", 1).with("income", 1000);
        let projected = record.project(&["income".to_string(), "schooling".to_string()]);

        assert_eq!(projected.columns().collect::<Vec<_>>(), vec!["income", "schooling"]);
        assert_eq!(projected.get("schooling"), Some(&Value::Null));
    }

    #[test]
    fn test_from_json_rejects_non_objects() {
        let row = serde_json::json!({"id": 3, "schooling": "secondary", "weight": 1.5});
        let record = Record::from_json(&row).unwrap();
        assert_eq!(record.get("schooling"), Some(&Value::from("secondary")));
        assert_eq!(record.get("weight"), Some(&Value::Real(1.5)));

        assert!(Record::from_json(&serde_json::json!([1, 2, 3])).is_err());
    }

    #[test]
    fn test_serializes_in_column_order() {
        let record = Record::new().with("b", 2).with("a", "x").with("c", Value::Null);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"b":2,"a":"x","c":null}"#);
    }
}
