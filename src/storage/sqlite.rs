//! SQLite-backed Cache Store

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params_from_iter};
use serde::Serialize;

use super::filter::{Compiled, Filter};
use super::registry::{SchemaRegistry, TableSchema, TypePolicy, observe_columns};
use super::schema::{self, quote};
use super::upsert::{self, UpsertEngine, UpsertResult};
use crate::config::CacheConfig;
use crate::record::Record;
use crate::value::Value;
use crate::{Error, Result};

/// Construction-time settings for a [`CacheStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub type_policy: TypePolicy,
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            type_policy: TypePolicy::Widen,
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

impl StoreOptions {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            type_policy: config.cache.type_policy,
            busy_timeout: Duration::from_millis(config.cache.busy_timeout_ms),
        }
    }
}

/// Embedded, file-resident cache of warehouse tables
pub struct CacheStore {
    conn: Connection,
    options: StoreOptions,
}

impl CacheStore {
    /// Open a database file (creates it and its directory if missing)
    pub fn open(path: &Path, options: StoreOptions) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(options.busy_timeout)?;
        // WAL keeps readers on the last committed snapshot while a batch is in flight
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!("Opened cache {} (journal_mode={})", path.display(), mode);

        let store = Self { conn, options };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory(options: StoreOptions) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn, options };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Open the store described by a loaded configuration
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        Self::open(Path::new(&config.cache.path), StoreOptions::from_config(config))
    }

    /// Initialize the metadata schema
    fn initialize_schema(&self) -> Result<()> {
        for stmt in schema::all_schema_statements() {
            self.conn.execute(stmt, [])?;
        }
        Ok(())
    }

    fn registry(&self) -> SchemaRegistry<'_> {
        SchemaRegistry::new(&self.conn, self.options.type_policy)
    }

    // ========== Write Operations ==========

    /// Reconcile the schema and upsert `records` as one atomic unit.
    ///
    /// Schema changes are written inside the same transaction as the rows that
    /// need them; any error rolls back both.
    pub fn write_batch(
        &mut self,
        table: &str,
        primary_key: &[&str],
        records: &[Record],
    ) -> Result<UpsertResult> {
        if records.is_empty() {
            tracing::warn!("Empty batch for {}, nothing to write", table);
            return Ok(UpsertResult::default());
        }

        let primary_key: Vec<String> = primary_key.iter().map(|k| k.to_string()).collect();
        upsert::validate_keys(table, &primary_key, records)?;

        let policy = self.options.type_policy;
        let tx = self.conn.transaction()?;
        let result = {
            let registry = SchemaRegistry::new(&tx, policy);
            let schema = registry.ensure_table(table, &primary_key, &observe_columns(records))?;
            UpsertEngine::new(&tx, &schema).apply(records)?
        };
        tx.commit()?;

        tracing::info!("Wrote {} records to {}: {}", records.len(), table, result);
        Ok(result)
    }

    // ========== Read Operations ==========

    /// Read rows matching `filter`, ordered by primary key.
    ///
    /// A table that was never written reads as empty.
    pub fn read(&self, table: &str, filter: &Filter) -> Result<Vec<Record>> {
        self.select(table, filter, None)
    }

    /// Like [`read`](Self::read) but fails with `TableNotFound` for unknown tables
    pub fn read_existing(&self, table: &str, filter: &Filter) -> Result<Vec<Record>> {
        if !self.table_exists(table)? {
            return Err(Error::TableNotFound(table.to_string()));
        }
        self.read(table, filter)
    }

    /// Read rows matching `filter`, projected to `columns` when given.
    ///
    /// Projected columns unknown to the schema come back as null. A key set
    /// is staged in a temporary table for the duration of the read, so its
    /// size is not bounded by SQLite's statement limits.
    pub fn select(
        &self,
        table: &str,
        filter: &Filter,
        columns: Option<&[String]>,
    ) -> Result<Vec<Record>> {
        schema::validate_identifier(table)?;
        let Some(schema) = self.registry().load(table)? else {
            tracing::debug!("Read of unknown table {}", table);
            return Ok(Vec::new());
        };

        let output: Vec<String> = match columns {
            Some(cols) => cols.to_vec(),
            None => schema.column_names(),
        };
        let physical: Vec<&str> = output
            .iter()
            .filter(|c| schema.column(c).is_some())
            .map(String::as_str)
            .collect();

        let (mut clauses, params, keys) = match filter.compile(&schema)? {
            Compiled::Nothing => return Ok(Vec::new()),
            Compiled::All => (Vec::new(), Vec::new(), Vec::new()),
            Compiled::Where { clauses, params, keys } => (clauses, params, keys),
        };

        // Rolled back on drop, which also discards the staged keys
        let staging = if keys.is_empty() {
            None
        } else {
            let tx = self.conn.unchecked_transaction()?;
            clauses.push(stage_keys(&tx, &schema, &keys)?);
            Some(tx)
        };
        let condition = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let select_list = if physical.is_empty() {
            "1".to_string()
        } else {
            physical.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
        };
        let order = schema
            .primary_key
            .iter()
            .map(|k| quote(k))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM {}{} ORDER BY {}",
            select_list,
            quote(table),
            condition,
            order
        );

        let rows = {
            let mut stmt = self.conn.prepare(&sql)?;
            stmt.query_map(params_from_iter(params.iter()), |row| {
                let mut raw = Vec::with_capacity(physical.len());
                for i in 0..physical.len() {
                    raw.push(row.get::<_, Value>(i)?);
                }
                Ok(raw)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        drop(staging);

        Ok(rows
            .into_iter()
            .map(|raw| assemble(&schema, &output, &physical, raw))
            .collect())
    }

    /// Distinct non-null values of `column`, in ascending order
    pub fn distinct_values(&self, table: &str, column: &str) -> Result<Vec<Value>> {
        schema::validate_identifier(table)?;
        let Some(schema) = self.registry().load(table)? else {
            return Ok(Vec::new());
        };
        let Some(declared) = schema.column(column).map(|c| c.column_type) else {
            return Ok(Vec::new());
        };

        let sql = format!(
            "SELECT DISTINCT {col} FROM {table} WHERE {col} IS NOT NULL ORDER BY {col}",
            col = quote(column),
            table = quote(table)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let values = stmt
            .query_map([], |row| row.get::<_, Value>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(values
            .into_iter()
            .map(|v| Value::from_sql_typed(v, declared))
            .collect())
    }

    // ========== Metadata Operations ==========

    /// Whether `table` has ever been written
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM _cache_tables WHERE name = ?1", [table], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// Current effective schema of `table`
    pub fn schema(&self, table: &str) -> Result<Option<TableSchema>> {
        self.registry().load(table)
    }

    pub fn list_tables(&self) -> Result<Vec<String>> {
        self.registry().list_tables()
    }

    /// Control timestamps of the row with primary-key tuple `key`
    pub fn row_audit(&self, table: &str, key: &[Value]) -> Result<Option<RowAudit>> {
        let Some(schema) = self.registry().load(table)? else {
            return Ok(None);
        };
        if key.len() != schema.primary_key.len() {
            return Err(Error::InvalidRecord(format!(
                "Key {:?} has {} parts, {} expects ({})",
                key,
                key.len(),
                schema.name,
                schema.primary_key.join(", ")
            )));
        }
        if key.iter().any(Value::is_null) {
            return Ok(None);
        }

        let filter = schema
            .primary_key
            .iter()
            .zip(key)
            .fold(Filter::new(), |f, (column, value)| f.equals(column.clone(), value.clone()));
        let (clauses, params) = match filter.compile(&schema)? {
            Compiled::Where { clauses, params, .. } => (clauses, params),
            Compiled::All | Compiled::Nothing => return Ok(None),
        };

        let sql = format!(
            "SELECT {}, {} FROM {} WHERE {}",
            quote(schema::CREATED_AT_COLUMN),
            quote(schema::UPDATED_AT_COLUMN),
            quote(table),
            clauses.join(" AND ")
        );
        self.conn
            .query_row(&sql, params_from_iter(params.iter()), |row| {
                Ok(RowAudit {
                    created_at: row.get(0)?,
                    updated_at: row.get(1)?,
                })
            })
            .optional()
            .map_err(Into::into)
    }

    /// Count rows in a table (0 for unknown tables)
    pub fn count_rows(&self, table: &str) -> Result<usize> {
        if !self.table_exists(table)? {
            return Ok(0);
        }
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Get cache statistics
    pub fn stats(&self) -> Result<CacheStats> {
        let mut tables = Vec::new();
        for name in self.list_tables()? {
            let columns = self.schema(&name)?.map(|s| s.columns.len()).unwrap_or(0);
            tables.push(TableStats {
                rows: self.count_rows(&name)?,
                columns,
                name,
            });
        }
        Ok(CacheStats { tables })
    }
}

/// Load key tuples into a per-arity temporary table and return the
/// membership condition over the primary key.
///
/// Temporary tables live in the connection's private `temp` schema, so
/// staging does not take the write lock on the cache file.
fn stage_keys(conn: &Connection, schema: &TableSchema, keys: &[Vec<Value>]) -> Result<String> {
    let arity = schema.primary_key.len();
    let staging = quote(&format!("_cache_keys_{}", arity));
    let slots: Vec<String> = (0..arity).map(|i| format!("k{}", i)).collect();

    conn.execute(
        &format!("CREATE TEMP TABLE IF NOT EXISTS {} ({})", staging, slots.join(", ")),
        [],
    )?;
    conn.execute(&format!("DELETE FROM temp.{}", staging), [])?;

    let placeholders = vec!["?"; arity].join(", ");
    let mut insert =
        conn.prepare_cached(&format!("INSERT INTO temp.{} VALUES ({})", staging, placeholders))?;
    for key in keys {
        insert.execute(params_from_iter(key.iter()))?;
    }
    tracing::debug!("Staged {} key tuples for {}", keys.len(), schema.name);

    let columns = schema
        .primary_key
        .iter()
        .map(|k| quote(k))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!(
        "({}) IN (SELECT {} FROM temp.{})",
        columns,
        slots.join(", "),
        staging
    ))
}

/// Build the output record for one result row
fn assemble(schema: &TableSchema, output: &[String], physical: &[&str], raw: Vec<Value>) -> Record {
    let mut fetched = physical.iter().zip(raw);
    let mut record = Record::new();
    for column in output {
        let value = match schema.column(column) {
            Some(declared) => fetched
                .next()
                .map(|(_, v)| Value::from_sql_typed(v, declared.column_type))
                .unwrap_or(Value::Null),
            None => Value::Null,
        };
        record.insert(column.clone(), value);
    }
    record
}

/// Insert/update timestamps kept for every cached row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowAudit {
    pub created_at: String,
    pub updated_at: String,
}

/// Per-table statistics
#[derive(Debug, Clone, Serialize)]
pub struct TableStats {
    pub name: String,
    pub rows: usize,
    pub columns: usize,
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub tables: Vec<TableStats>,
}

impl CacheStats {
    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(|t| t.rows).sum()
    }
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Cache Statistics:")?;
        writeln!(f, "  Tables: {}", self.tables.len())?;
        for table in &self.tables {
            writeln!(f, "  {}: {} rows, {} columns", table.name, table.rows, table.columns)?;
        }
        write!(f, "  Total rows: {}", self.total_rows())
    }
}
