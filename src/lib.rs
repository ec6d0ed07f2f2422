//! # microdata-cache - Local cache for warehouse survey microdata
//!
//! Persists tabular query results pulled from a remote analytical warehouse
//! into an embedded SQLite database, so downstream steps can run repeatedly
//! and offline.
//!
//! microdata-cache provides:
//! - A Schema Registry that absorbs schema drift with an explicit widening rule
//! - An Upsert Engine with merge semantics and idempotent batch application
//! - A Cache Store that applies each batch atomically
//! - A Read Facade with year partitioning, key sets and column projection

pub mod value;
pub mod record;
pub mod storage;
pub mod facade;
pub mod mapping;
pub mod config;
pub mod ui;

// Re-exports for convenient access
pub use value::{ColumnType, Value};
pub use record::Record;
pub use storage::{CacheStore, Filter, StoreOptions, TableSchema, TypePolicy, UpsertResult};
pub use facade::{ReadFacade, ReadRequest};
pub use mapping::VariableMap;
pub use config::CacheConfig;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for cache operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Schema conflict on {table}.{column}: {reason}")]
    SchemaConflict {
        table: String,
        column: String,
        reason: String,
    },

    #[error("Record {index} for {table} has no value for key column {column}")]
    MissingKey {
        table: String,
        column: String,
        index: usize,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Config error: {0}")]
    Config(String),
}
