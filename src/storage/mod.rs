//! Storage Layer - SQLite-backed cache of warehouse tables
//!
//! Each logical table is one SQLite table plus its rows in the metadata tables:
//! - _cache_tables(name, primary_key, created_at)
//! - _cache_columns(table_name, name, column_type, position, is_key)

pub mod filter;
pub mod registry;
pub mod schema;
pub mod sqlite;
pub mod upsert;

pub use filter::Filter;
pub use registry::{Column, SchemaRegistry, TableSchema, TypePolicy};
pub use sqlite::{CacheStats, CacheStore, RowAudit, StoreOptions, TableStats};
pub use upsert::UpsertResult;
