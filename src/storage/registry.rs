//! Schema Registry - per-table column catalog with type widening
//!
//! The registry owns the metadata tables. It is always handed the
//! connection (or open transaction) of the caller, so schema changes commit or
//! roll back together with the rows that depend on them.

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use super::schema::{self, quote, same_identifier};
use crate::record::Record;
use crate::value::{ColumnType, Value};
use crate::{Error, Result};

/// How non-key columns react to a batch that disagrees with their type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypePolicy {
    /// Widen the declared type and rewrite stored values (default)
    #[default]
    Widen,
    /// Reject any change beyond refining a null-only column
    Strict,
}

impl std::str::FromStr for TypePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "widen" => Ok(TypePolicy::Widen),
            "strict" | "reject" => Ok(TypePolicy::Strict),
            _ => Err(Error::Config(format!(
                "Unknown type policy: {}. Use 'widen' or 'strict'.",
                s
            ))),
        }
    }
}

impl std::fmt::Display for TypePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypePolicy::Widen => write!(f, "widen"),
            TypePolicy::Strict => write!(f, "strict"),
        }
    }
}

/// A column known to a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub is_key: bool,
}

/// Effective schema of one cached table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub name: String,
    /// Primary-key columns in declaration order; immutable after creation
    pub primary_key: Vec<String>,
    /// All columns in the order they were first seen, keys first
    pub columns: Vec<Column>,
}

impl TableSchema {
    /// Look up a column, ignoring ASCII case
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| same_identifier(&c.name, name))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn is_key(&self, name: &str) -> bool {
        self.primary_key.iter().any(|k| same_identifier(k, name))
    }

    /// Whether `primary_key` names the same columns, in order, as this table's key
    pub fn has_primary_key(&self, primary_key: &[String]) -> bool {
        self.primary_key.len() == primary_key.len()
            && self
                .primary_key
                .iter()
                .zip(primary_key)
                .all(|(a, b)| same_identifier(a, b))
    }
}

/// Fold the columns observed in a batch into (name, type) pairs.
///
/// Columns keep their first-seen order and spelling; names differing only in
/// case are one column. A column seen with several types is reported with the
/// widened type.
pub fn observe_columns(records: &[Record]) -> Vec<(String, ColumnType)> {
    let mut observed: Vec<(String, ColumnType)> = Vec::new();
    for record in records {
        for (column, value) in record.iter() {
            let ty = value.column_type();
            match observed.iter_mut().find(|(name, _)| same_identifier(name, column)) {
                Some((_, existing)) => *existing = existing.widen(ty),
                None => observed.push((column.to_string(), ty)),
            }
        }
    }
    observed
}

/// Schema Registry bound to a connection or open transaction
pub struct SchemaRegistry<'c> {
    conn: &'c Connection,
    policy: TypePolicy,
}

impl<'c> SchemaRegistry<'c> {
    pub fn new(conn: &'c Connection, policy: TypePolicy) -> Self {
        Self { conn, policy }
    }

    /// Load a table's schema from metadata, `None` if it was never written
    pub fn load(&self, table: &str) -> Result<Option<TableSchema>> {
        let found: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT name, primary_key FROM _cache_tables WHERE name = ?1",
                [table],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((name, pk_json)) = found else {
            return Ok(None);
        };

        let primary_key: Vec<String> = serde_json::from_str(&pk_json).map_err(|e| {
            Error::Metadata(format!("Corrupt primary key for table {}: {}", table, e))
        })?;

        let mut stmt = self.conn.prepare_cached(
            "SELECT name, column_type, is_key FROM _cache_columns WHERE table_name = ?1 ORDER BY position",
        )?;
        let raw = stmt
            .query_map([&name], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let columns = raw
            .into_iter()
            .map(|(name, ty, is_key)| -> Result<Column> {
                Ok(Column {
                    name,
                    column_type: ty.parse()?,
                    is_key,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(TableSchema {
            name,
            primary_key,
            columns,
        }))
    }

    /// Names of every registered table
    pub fn list_tables(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM _cache_tables ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    /// Make sure `table` exists with `primary_key`, then reconcile `observed`.
    ///
    /// Creates the table on first use. An existing table whose primary key
    /// differs from `primary_key` is a `SchemaConflict`.
    pub fn ensure_table(
        &self,
        table: &str,
        primary_key: &[String],
        observed: &[(String, ColumnType)],
    ) -> Result<TableSchema> {
        schema::validate_identifier(table)?;
        validate_primary_key(table, primary_key)?;
        for (column, _) in observed {
            schema::validate_identifier(column)?;
        }

        let current = match self.load(table)? {
            Some(existing) => {
                if !existing.has_primary_key(primary_key) {
                    return Err(Error::SchemaConflict {
                        table: table.to_string(),
                        column: primary_key.join(", "),
                        reason: format!(
                            "primary key is ({}) and cannot be redefined",
                            existing.primary_key.join(", ")
                        ),
                    });
                }
                existing
            }
            None => self.create_table(table, primary_key, observed)?,
        };

        self.ensure_columns(&current, observed)
    }

    fn create_table(
        &self,
        table: &str,
        primary_key: &[String],
        observed: &[(String, ColumnType)],
    ) -> Result<TableSchema> {
        let pk_json = serde_json::to_string(primary_key)
            .map_err(|e| Error::Metadata(format!("Cannot encode primary key: {}", e)))?;

        self.conn.execute(
            "INSERT INTO _cache_tables (name, primary_key) VALUES (?1, ?2)",
            params![table, pk_json],
        )?;

        let mut columns = Vec::with_capacity(primary_key.len());
        for (position, key) in primary_key.iter().enumerate() {
            let column_type = observed
                .iter()
                .find(|(name, _)| same_identifier(name, key))
                .map(|(_, ty)| *ty)
                .filter(|ty| *ty != ColumnType::Null)
                .unwrap_or(ColumnType::Text);

            self.insert_column_metadata(table, key, column_type, position, true)?;
            columns.push(Column {
                name: key.clone(),
                column_type,
                is_key: true,
            });
        }

        self.conn
            .execute(&schema::create_data_table_sql(table, primary_key), [])?;
        tracing::info!("Created table {} with primary key ({})", table, primary_key.join(", "));

        Ok(TableSchema {
            name: table.to_string(),
            primary_key: primary_key.to_vec(),
            columns,
        })
    }

    /// Reconcile the observed columns of a batch against `current`.
    ///
    /// Unknown columns are added (existing rows read them as null). Known
    /// columns are widened per the type policy. Every check runs before the
    /// first write, and all writes go through the caller's connection.
    pub fn ensure_columns(
        &self,
        current: &TableSchema,
        observed: &[(String, ColumnType)],
    ) -> Result<TableSchema> {
        let mut additions: Vec<(String, ColumnType)> = Vec::new();
        let mut changes: Vec<(String, ColumnType, ColumnType)> = Vec::new();

        for (name, observed_type) in observed {
            let Some(column) = current.column(name) else {
                if let Some((_, ty)) = additions.iter_mut().find(|(n, _)| same_identifier(n, name)) {
                    *ty = ty.widen(*observed_type);
                } else {
                    additions.push((name.clone(), *observed_type));
                }
                continue;
            };

            let widened = column.column_type.widen(*observed_type);
            if widened == column.column_type {
                continue;
            }
            if column.column_type != ColumnType::Null {
                if column.is_key {
                    return Err(Error::SchemaConflict {
                        table: current.name.clone(),
                        column: name.clone(),
                        reason: format!(
                            "primary-key column is {} and cannot change to {}",
                            column.column_type, widened
                        ),
                    });
                }
                if self.policy == TypePolicy::Strict {
                    return Err(Error::SchemaConflict {
                        table: current.name.clone(),
                        column: name.clone(),
                        reason: format!(
                            "column is {} and received {} values (strict type policy)",
                            column.column_type, observed_type
                        ),
                    });
                }
            }
            changes.push((column.name.clone(), column.column_type, widened));
        }

        let mut updated = current.clone();

        for (name, ty) in additions {
            let position = updated.columns.len();
            self.insert_column_metadata(&updated.name, &name, ty, position, false)?;
            self.conn.execute(&schema::add_column_sql(&updated.name, &name), [])?;
            tracing::info!("Added column {} ({}) to {}", name, ty, updated.name);
            updated.columns.push(Column {
                name,
                column_type: ty,
                is_key: false,
            });
        }

        for (name, from, to) in changes {
            self.conn.execute(
                "UPDATE _cache_columns SET column_type = ?1 WHERE table_name = ?2 AND name = ?3",
                params![to.as_str(), updated.name, name],
            )?;
            let rewritten = self.rewrite_column(&updated.name, &name, from, to)?;
            tracing::info!(
                "Widened {}.{} from {} to {} ({} stored values rewritten)",
                updated.name,
                name,
                from,
                to,
                rewritten
            );
            if let Some(column) = updated.columns.iter_mut().find(|c| same_identifier(&c.name, &name)) {
                column.column_type = to;
            }
        }

        Ok(updated)
    }

    fn insert_column_metadata(
        &self,
        table: &str,
        column: &str,
        ty: ColumnType,
        position: usize,
        is_key: bool,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO _cache_columns (table_name, name, column_type, position, is_key) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![table, column, ty.as_str(), position as i64, is_key],
        )?;
        Ok(())
    }

    /// Convert every stored value of a column to its new declared type
    fn rewrite_column(&self, table: &str, column: &str, from: ColumnType, to: ColumnType) -> Result<usize> {
        if from == ColumnType::Null {
            return Ok(0);
        }

        let select = format!(
            "SELECT rowid, {col} FROM {table} WHERE {col} IS NOT NULL",
            col = quote(column),
            table = quote(table)
        );
        let stored = {
            let mut stmt = self.conn.prepare(&select)?;
            stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Value>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };

        let update = format!(
            "UPDATE {} SET {} = ?1 WHERE rowid = ?2",
            quote(table),
            quote(column)
        );
        let mut stmt = self.conn.prepare(&update)?;
        let mut rewritten = 0;
        for (rowid, raw) in stored {
            let typed = Value::from_sql_typed(raw, from);
            let converted = typed.coerce(to).ok_or_else(|| Error::SchemaConflict {
                table: table.to_string(),
                column: column.to_string(),
                reason: format!("stored value {} cannot be widened to {}", typed, to),
            })?;
            stmt.execute(params![converted, rowid])?;
            rewritten += 1;
        }
        Ok(rewritten)
    }
}

fn validate_primary_key(table: &str, primary_key: &[String]) -> Result<()> {
    if primary_key.is_empty() {
        return Err(Error::SchemaConflict {
            table: table.to_string(),
            column: String::new(),
            reason: "a primary key needs at least one column".to_string(),
        });
    }
    for (i, key) in primary_key.iter().enumerate() {
        schema::validate_identifier(key)?;
        if primary_key[..i].iter().any(|k| same_identifier(k, key)) {
            return Err(Error::SchemaConflict {
                table: table.to_string(),
                column: key.clone(),
                reason: "column listed twice in primary key".to_string(),
            });
        }
    }
    Ok(())
}
