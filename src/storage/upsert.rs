//! Upsert Engine - insert-or-merge of record batches keyed by primary key
//!
//! Updates are merges: only the columns a record supplies are written, every
//! other stored column is left alone. A batch that names the same key twice
//! is collapsed in input order before touching storage, so the later record
//! wins column by column.

use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension, params_from_iter};
use serde::Serialize;

use super::registry::TableSchema;
use super::schema::{self, quote};
use crate::record::Record;
use crate::value::Value;
use crate::{Error, Result};

/// Outcome of applying one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertResult {
    /// Rows that did not exist before the batch
    pub inserted: usize,
    /// Rows that already existed and were merged (including no-op merges)
    pub updated: usize,
}

impl std::ops::AddAssign for UpsertResult {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
    }
}

impl std::fmt::Display for UpsertResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} inserted, {} updated", self.inserted, self.updated)
    }
}

/// Reject the batch if any record lacks a non-null value for a key column
pub fn validate_keys(table: &str, primary_key: &[String], records: &[Record]) -> Result<()> {
    for (index, record) in records.iter().enumerate() {
        for column in primary_key {
            match record.get_ignore_case(column) {
                Some(value) if !value.is_null() => {}
                _ => {
                    return Err(Error::MissingKey {
                        table: table.to_string(),
                        column: column.clone(),
                        index,
                    });
                }
            }
        }
    }
    Ok(())
}

/// Hashable form of a primary-key component
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyPart {
    Bool(bool),
    Int(i64),
    Real(u64),
    Text(String),
}

impl KeyPart {
    fn of(value: &Value) -> Option<KeyPart> {
        match value {
            Value::Null => None,
            Value::Boolean(b) => Some(KeyPart::Bool(*b)),
            Value::Integer(i) => Some(KeyPart::Int(*i)),
            // SQLite compares 0.0 and -0.0 as equal
            Value::Real(r) if *r == 0.0 => Some(KeyPart::Real(0.0f64.to_bits())),
            Value::Real(r) => Some(KeyPart::Real(r.to_bits())),
            Value::Text(s) => Some(KeyPart::Text(s.clone())),
        }
    }
}

/// Upsert Engine bound to a connection or open transaction and a reconciled schema
pub struct UpsertEngine<'c> {
    conn: &'c Connection,
    schema: &'c TableSchema,
}

impl<'c> UpsertEngine<'c> {
    pub fn new(conn: &'c Connection, schema: &'c TableSchema) -> Self {
        Self { conn, schema }
    }

    /// Apply a batch. The schema must already cover every column in it.
    pub fn apply(&self, records: &[Record]) -> Result<UpsertResult> {
        validate_keys(&self.schema.name, &self.schema.primary_key, records)?;

        let rows = self.collapse(records)?;
        let mut result = UpsertResult::default();

        for row in &rows {
            match self.lookup(row)? {
                None => {
                    self.insert(row)?;
                    result.inserted += 1;
                }
                Some((rowid, existing)) => {
                    if self.merge(rowid, row, &existing)? {
                        tracing::debug!("Merged changes into {} row {}", self.schema.name, rowid);
                    }
                    result.updated += 1;
                }
            }
        }

        Ok(result)
    }

    /// Coerce every value to its declared type, then merge records sharing a
    /// key. Output keeps the position of each key's first occurrence.
    fn collapse(&self, records: &[Record]) -> Result<Vec<Record>> {
        let mut rows: Vec<Record> = Vec::with_capacity(records.len());
        let mut positions: HashMap<Vec<KeyPart>, usize> = HashMap::new();

        for record in records {
            let typed = self.coerce(record)?;
            let key = self
                .schema
                .primary_key
                .iter()
                .filter_map(|k| typed.get(k).and_then(KeyPart::of))
                .collect::<Vec<_>>();

            match positions.get(&key) {
                Some(&idx) => rows[idx].merge_from(&typed),
                None => {
                    positions.insert(key, rows.len());
                    rows.push(typed);
                }
            }
        }

        Ok(rows)
    }

    /// Coerce values to their declared types and rename columns to the
    /// registered spelling
    fn coerce(&self, record: &Record) -> Result<Record> {
        let mut typed = Record::new();
        for (column, value) in record.iter() {
            let registered = self.schema.column(column).ok_or_else(|| {
                Error::Metadata(format!(
                    "Column {} is not registered on {}",
                    column, self.schema.name
                ))
            })?;
            let declared = registered.column_type;
            let converted = value.coerce(declared).ok_or_else(|| Error::SchemaConflict {
                table: self.schema.name.clone(),
                column: column.to_string(),
                reason: format!("value {} cannot be stored as {}", value, declared),
            })?;
            typed.insert(registered.name.as_str(), converted);
        }
        Ok(typed)
    }

    fn key_clause(&self) -> String {
        self.schema
            .primary_key
            .iter()
            .map(|k| format!("{} = ?", quote(k)))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn key_values<'r>(&self, row: &'r Record) -> Vec<&'r Value> {
        self.schema
            .primary_key
            .iter()
            .filter_map(|k| row.get(k))
            .collect()
    }

    fn data_columns<'r>(&self, row: &'r Record) -> Vec<(&'r str, &'r Value)> {
        row.iter().filter(|(c, _)| !self.schema.is_key(c)).collect()
    }

    /// Find the stored row for `row`'s key, returning its rowid and the
    /// current values of the columns `row` supplies
    fn lookup(&self, row: &Record) -> Result<Option<(i64, Record)>> {
        let columns = self.data_columns(row);
        let mut select = vec!["rowid".to_string()];
        select.extend(columns.iter().map(|(c, _)| quote(c)));

        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            select.join(", "),
            quote(&self.schema.name),
            self.key_clause()
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let found = stmt
            .query_row(params_from_iter(self.key_values(row)), |r| {
                let rowid: i64 = r.get(0)?;
                let mut existing = Record::new();
                for (i, (column, _)) in columns.iter().enumerate() {
                    existing.insert(*column, r.get::<_, Value>(i + 1)?);
                }
                Ok((rowid, existing))
            })
            .optional()?;

        Ok(found.map(|(rowid, raw)| {
            let typed = raw
                .iter()
                .map(|(column, value)| {
                    let declared = self
                        .schema
                        .column(column)
                        .map(|c| c.column_type)
                        .unwrap_or(value.column_type());
                    (column.to_string(), Value::from_sql_typed(value.clone(), declared))
                })
                .collect();
            (rowid, typed)
        }))
    }

    fn insert(&self, row: &Record) -> Result<()> {
        let columns: Vec<String> = row.columns().map(quote).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(&self.schema.name),
            columns.join(", "),
            placeholders
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        stmt.execute(params_from_iter(row.iter().map(|(_, v)| v)))?;
        Ok(())
    }

    /// Write the supplied columns that differ from what is stored.
    /// Returns whether anything changed.
    fn merge(&self, rowid: i64, row: &Record, existing: &Record) -> Result<bool> {
        let changed: Vec<(&str, &Value)> = self
            .data_columns(row)
            .into_iter()
            .filter(|(column, value)| existing.get(column) != Some(*value))
            .collect();

        if changed.is_empty() {
            return Ok(false);
        }

        let mut assignments: Vec<String> = changed
            .iter()
            .map(|(column, _)| format!("{} = ?", quote(column)))
            .collect();
        assignments.push(format!("{} = {}", quote(schema::UPDATED_AT_COLUMN), schema::NOW_EXPR));

        let sql = format!(
            "UPDATE {} SET {} WHERE rowid = ?",
            quote(&self.schema.name),
            assignments.join(", ")
        );

        let mut params: Vec<Value> = changed.iter().map(|(_, v)| (*v).clone()).collect();
        params.push(Value::Integer(rowid));

        let mut stmt = self.conn.prepare_cached(&sql)?;
        stmt.execute(params_from_iter(params.iter()))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::registry::{SchemaRegistry, TypePolicy, observe_columns};

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        for stmt in schema::all_schema_statements() {
            conn.execute(stmt, []).unwrap();
        }
        conn
    }

    fn apply(conn: &Connection, records: &[Record]) -> Result<UpsertResult> {
        let registry = SchemaRegistry::new(conn, TypePolicy::Widen);
        let schema =
            registry.ensure_table("renda", &["id".to_string()], &observe_columns(records))?;
        UpsertEngine::new(conn, &schema).apply(records)
    }

    fn stored(conn: &Connection, id: i64, column: &str) -> Value {
        conn.query_row(
            &format!("SELECT {} FROM renda WHERE id = ?1", quote(column)),
            [id],
            |r| r.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_insert_then_update_counts() {
        let conn = conn();
        let first = vec![
            Record::new().with("id", 1).with("income", 1000),
            Record::new().with("id", 2).with("income", 2000),
        ];
        assert_eq!(apply(&conn, &first).unwrap(), UpsertResult { inserted: 2, updated: 0 });

        let second = vec![
            Record::new().with("id", 1).with("income", 1500),
            Record::new().with("id", 3).with("schooling", "secondary"),
        ];
        assert_eq!(apply(&conn, &second).unwrap(), UpsertResult { inserted: 1, updated: 1 });
        assert_eq!(stored(&conn, 1, "income"), Value::Integer(1500));
        assert_eq!(stored(&conn, 2, "income"), Value::Integer(2000));
        assert_eq!(stored(&conn, 3, "income"), Value::Null);
    }

    #[test]
    fn test_partial_update_keeps_other_columns() {
        let conn = conn();
        apply(&conn, &[Record::new().with("id", 1).with("x", 1).with("y", "kept")]).unwrap();
        apply(&conn, &[Record::new().with("id", 1).with("x", 2)]).unwrap();

        assert_eq!(stored(&conn, 1, "x"), Value::Integer(2));
        assert_eq!(stored(&conn, 1, "y"), Value::from("kept"));
    }

    #[test]
    fn test_duplicate_key_in_batch_last_wins() {
        let conn = conn();
        let batch = vec![
            Record::new().with("id", 1).with("v", "first").with("w", 5),
            Record::new().with("id", 1).with("v", "second"),
        ];
        let result = apply(&conn, &batch).unwrap();

        assert_eq!(result, UpsertResult { inserted: 1, updated: 0 });
        assert_eq!(stored(&conn, 1, "v"), Value::from("second"));
        assert_eq!(stored(&conn, 1, "w"), Value::Integer(5));
    }

    #[test]
    fn test_missing_key_rejects_batch() {
        let conn = conn();
        let batch = vec![
            Record::new().with("id", 1).with("v", 1),
            Record::new().with("v", 2),
        ];
        let err = validate_keys("renda", &["id".to_string()], &batch).unwrap_err();
        assert!(matches!(err, Error::MissingKey { index: 1, .. }));

        let null_key = vec![Record::new().with("id", Value::Null)];
        assert!(apply(&conn, &null_key).is_err());
    }

    #[test]
    fn test_noop_update_does_not_touch_timestamp() {
        let conn = conn();
        let batch = vec![Record::new().with("id", 1).with("v", 1)];
        apply(&conn, &batch).unwrap();
        conn.execute("UPDATE renda SET _updated_at = 'frozen'", []).unwrap();

        assert_eq!(apply(&conn, &batch).unwrap(), UpsertResult { inserted: 0, updated: 1 });
        assert_eq!(stored(&conn, 1, "_updated_at"), Value::from("frozen"));

        apply(&conn, &[Record::new().with("id", 1).with("v", 2)]).unwrap();
        assert_ne!(stored(&conn, 1, "_updated_at"), Value::from("frozen"));
    }

    #[test]
    fn test_column_case_variants_write_registered_column() {
        let conn = conn();
        apply(&conn, &[Record::new().with("id", 1).with("income", 10)]).unwrap();
        let result = apply(&conn, &[Record::new().with("ID", 2).with("Income", 20)]).unwrap();

        assert_eq!(result, UpsertResult { inserted: 1, updated: 0 });
        assert_eq!(stored(&conn, 2, "income"), Value::Integer(20));
    }

    #[test]
    fn test_signed_zero_keys_collapse() {
        let conn = conn();
        let batch = vec![
            Record::new().with("id", 0.0).with("v", "positive"),
            Record::new().with("id", -0.0).with("v", "negative"),
        ];
        assert_eq!(apply(&conn, &batch).unwrap(), UpsertResult { inserted: 1, updated: 0 });

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM renda", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
