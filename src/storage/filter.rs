//! Read filters - equality predicates and primary-key sets

use super::registry::TableSchema;
use super::schema::quote;
use crate::value::Value;
use crate::{Error, Result};

/// Conjunction of equality predicates, optionally restricted to a key set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    predicates: Vec<(String, Value)>,
    keys: Option<Vec<Vec<Value>>>,
}

/// A filter resolved against a concrete schema
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Compiled {
    /// No restriction
    All,
    /// Provably matches no row
    Nothing,
    /// Equality clauses with their positional parameters, plus the coerced
    /// key tuples to match (empty when the filter has no key set)
    Where {
        clauses: Vec<String>,
        params: Vec<Value>,
        keys: Vec<Vec<Value>>,
    },
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `column = value`; a null value means `column IS NULL`
    pub fn equals(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicates.push((column.into(), value.into()));
        self
    }

    /// Restrict to rows whose primary-key tuple is one of `keys`
    pub fn with_keys(mut self, keys: Vec<Vec<Value>>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty() && self.keys.is_none()
    }

    /// Resolve predicates against `schema`.
    ///
    /// Unknown columns read as null: a null predicate on them is dropped and
    /// any other value matches nothing. Values are coerced to the declared
    /// column type; a value that cannot be coerced matches nothing. Key
    /// tuples are returned as values rather than SQL, since a key set can be
    /// far larger than what one statement may hold.
    pub(crate) fn compile(&self, schema: &TableSchema) -> Result<Compiled> {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        for (column, value) in &self.predicates {
            let Some(declared) = schema.column(column) else {
                if value.is_null() {
                    continue;
                }
                return Ok(Compiled::Nothing);
            };

            if value.is_null() {
                clauses.push(format!("{} IS NULL", quote(&declared.name)));
                continue;
            }
            match value.coerce(declared.column_type) {
                Some(typed) => {
                    clauses.push(format!("{} = ?", quote(&declared.name)));
                    params.push(typed);
                }
                None => return Ok(Compiled::Nothing),
            }
        }

        let mut tuples: Vec<Vec<Value>> = Vec::new();
        if let Some(keys) = &self.keys {
            'tuples: for key in keys {
                if key.len() != schema.primary_key.len() {
                    return Err(Error::InvalidRecord(format!(
                        "Key {:?} has {} parts, {} expects ({})",
                        key,
                        key.len(),
                        schema.name,
                        schema.primary_key.join(", ")
                    )));
                }

                let mut typed = Vec::with_capacity(key.len());
                for (column, value) in schema.primary_key.iter().zip(key) {
                    let declared = schema
                        .column(column)
                        .map(|c| c.column_type)
                        .unwrap_or(value.column_type());
                    match value.coerce(declared) {
                        Some(v) if !v.is_null() => typed.push(v),
                        _ => continue 'tuples,
                    }
                }
                tuples.push(typed);
            }

            if tuples.is_empty() {
                return Ok(Compiled::Nothing);
            }
        }

        if clauses.is_empty() && tuples.is_empty() {
            Ok(Compiled::All)
        } else {
            Ok(Compiled::Where {
                clauses,
                params,
                keys: tuples,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::registry::Column;
    use crate::value::ColumnType;

    fn schema() -> TableSchema {
        TableSchema {
            name: "pns".to_string(),
            primary_key: vec!["origem".to_string(), "id".to_string()],
            columns: vec![
                Column { name: "origem".to_string(), column_type: ColumnType::Text, is_key: true },
                Column { name: "id".to_string(), column_type: ColumnType::Integer, is_key: true },
                Column { name: "idade".to_string(), column_type: ColumnType::Integer, is_key: false },
            ],
        }
    }

    #[test]
    fn test_empty_filter_matches_all() {
        assert_eq!(Filter::new().compile(&schema()).unwrap(), Compiled::All);
    }

    #[test]
    fn test_values_are_coerced_to_declared_type() {
        let compiled = Filter::new().equals("origem", 2019).equals("idade", "30").compile(&schema()).unwrap();
        assert_eq!(
            compiled,
            Compiled::Where {
                clauses: vec!["\"origem\" = ?".to_string(), "\"idade\" = ?".to_string()],
                params: vec![Value::from("2019"), Value::Integer(30)],
                keys: vec![],
            }
        );
    }

    #[test]
    fn test_unknown_columns_read_as_null() {
        let s = schema();
        assert_eq!(Filter::new().equals("missing", Value::Null).compile(&s).unwrap(), Compiled::All);
        assert_eq!(Filter::new().equals("missing", 1).compile(&s).unwrap(), Compiled::Nothing);
        assert_eq!(Filter::new().equals("idade", "abc").compile(&s).unwrap(), Compiled::Nothing);
    }

    #[test]
    fn test_key_set() {
        let s = schema();
        let compiled = Filter::new()
            .with_keys(vec![
                vec![Value::from("2013"), Value::Integer(1)],
                vec![Value::from("2019"), Value::from("not a number")],
            ])
            .compile(&s)
            .unwrap();
        assert_eq!(
            compiled,
            Compiled::Where {
                clauses: vec![],
                params: vec![],
                keys: vec![vec![Value::from("2013"), Value::Integer(1)]],
            }
        );

        assert_eq!(Filter::new().with_keys(vec![]).compile(&s).unwrap(), Compiled::Nothing);
        assert!(Filter::new().with_keys(vec![vec![Value::Integer(1)]]).compile(&s).is_err());
    }

    #[test]
    fn test_predicates_use_registered_spelling() {
        let compiled = Filter::new().equals("IDADE", 30).compile(&schema()).unwrap();
        assert_eq!(
            compiled,
            Compiled::Where {
                clauses: vec!["\"idade\" = ?".to_string()],
                params: vec![Value::Integer(30)],
                keys: vec![],
            }
        );
    }
}
