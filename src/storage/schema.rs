//! Database schema definitions
//!
//! Metadata lives in two fixed tables that are readable without touching any
//! data table. Each logical table gets one physical table holding its rows.
//!
//! SQLite resolves identifiers case-insensitively, so table and column names
//! are compared with ASCII case folding (`COLLATE NOCASE` in metadata).

use crate::{Error, Result};

/// Metadata table recording every cached table and its primary key
pub const TABLES_TABLE: &str = "_cache_tables";

/// Metadata table recording each table's columns and declared types
pub const COLUMNS_TABLE: &str = "_cache_columns";

/// Set once when a row is first inserted
pub const CREATED_AT_COLUMN: &str = "_created_at";

/// Refreshed whenever an update changes a stored value
pub const UPDATED_AT_COLUMN: &str = "_updated_at";

/// SQLite expression for the control timestamps (millisecond resolution)
pub const NOW_EXPR: &str = "strftime('%Y-%m-%d %H:%M:%f', 'now')";

const MAX_IDENTIFIER_LEN: usize = 128;

/// SQL to create the tables metadata table
pub const CREATE_TABLES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS _cache_tables (
    name TEXT PRIMARY KEY COLLATE NOCASE,
    primary_key TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
)
"#;

/// SQL to create the columns metadata table
pub const CREATE_COLUMNS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS _cache_columns (
    table_name TEXT NOT NULL COLLATE NOCASE,
    name TEXT NOT NULL COLLATE NOCASE,
    column_type TEXT NOT NULL,
    position INTEGER NOT NULL,
    is_key INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (table_name, name)
)
"#;

/// All metadata schema creation statements
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![CREATE_TABLES_TABLE, CREATE_COLUMNS_TABLE]
}

/// Check that a table or column name is safe to use as an identifier
pub fn validate_identifier(name: &str) -> Result<()> {
    let invalid = |reason: &str| Err(Error::InvalidIdentifier(format!("{:?}: {}", name, reason)));

    if name.is_empty() {
        return invalid("empty name");
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return invalid("longer than 128 characters");
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return invalid("starts with a digit");
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return invalid("only ASCII letters, digits and '_' are allowed");
    }

    let lower = name.to_ascii_lowercase();
    if lower.starts_with("sqlite_") || lower.starts_with("_cache") {
        return invalid("reserved prefix");
    }
    if lower == CREATED_AT_COLUMN || lower == UPDATED_AT_COLUMN {
        return invalid("reserved control column");
    }
    Ok(())
}

/// Whether two identifiers name the same table or column
pub fn same_identifier(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Double-quote an identifier that already passed [`validate_identifier`]
pub fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQL to create the physical table backing a logical table.
///
/// Data columns carry no declared SQL type so values keep the storage class
/// they were written with; the declared type lives in the metadata tables.
pub fn create_data_table_sql(table: &str, primary_key: &[String]) -> String {
    let mut columns: Vec<String> = primary_key
        .iter()
        .map(|c| format!("{} NOT NULL", quote(c)))
        .collect();
    columns.push(format!(
        "{} TEXT NOT NULL DEFAULT ({})",
        quote(CREATED_AT_COLUMN),
        NOW_EXPR
    ));
    columns.push(format!(
        "{} TEXT NOT NULL DEFAULT ({})",
        quote(UPDATED_AT_COLUMN),
        NOW_EXPR
    ));

    let key_list = primary_key.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ");
    format!(
        "CREATE TABLE {} ({}, PRIMARY KEY ({}))",
        quote(table),
        columns.join(", "),
        key_list
    )
}

/// SQL to add a nullable data column
pub fn add_column_sql(table: &str, column: &str) -> String {
    format!("ALTER TABLE {} ADD COLUMN {}", quote(table), quote(column))
}
