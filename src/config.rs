//! Configuration file support
//!
//! Handles `mdcache.toml` plus environment variable overrides.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::record::Record;
use crate::storage::TypePolicy;
use crate::value::{ColumnType, Value};
use crate::{Error, Result};

/// Default configuration filename
pub const CONFIG_FILENAME: &str = "mdcache.toml";

/// Environment variable for the warehouse billing project
pub const ENV_BILLING_PROJECT_ID: &str = "BILLING_PROJECT_ID";

/// Environment variable for the log level
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";

/// Environment variable for the cache database path
pub const ENV_CACHE_PATH: &str = "MDCACHE_PATH";

/// Cache database section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSection {
    /// Path to the SQLite file
    #[serde(default = "default_cache_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// What to do with values that disagree with a column's declared type
    #[serde(default)]
    pub type_policy: TypePolicy,
}

fn default_cache_path() -> String {
    "data/pns_cache.sqlite".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            type_policy: TypePolicy::default(),
        }
    }
}

/// Remote warehouse the cached tables come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehouseSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_project_id: Option<String>,

    #[serde(default = "default_dataset")]
    pub dataset: String,

    /// Source table of each survey year within `dataset`
    #[serde(default = "default_tables")]
    pub tables: BTreeMap<String, String>,

    /// Row filters applied per survey year, over semantic variable names
    #[serde(default = "default_filters")]
    pub filters: BTreeMap<String, YearFilter>,
}

fn default_dataset() -> String {
    "basedosdados.br_ms_pns".to_string()
}

fn default_tables() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("2013".to_string(), "microdados_2013".to_string()),
        ("2019".to_string(), "microdados_2019".to_string()),
    ])
}

/// Women aged 25 and over, in both survey years
fn default_filters() -> BTreeMap<String, YearFilter> {
    let women_25_plus = YearFilter {
        equals: BTreeMap::from([("sexo".to_string(), "2".to_string())]),
        min: BTreeMap::from([("idade".to_string(), 25)]),
    };
    BTreeMap::from([
        ("2013".to_string(), women_25_plus.clone()),
        ("2019".to_string(), women_25_plus),
    ])
}

impl Default for WarehouseSection {
    fn default() -> Self {
        Self {
            billing_project_id: None,
            dataset: default_dataset(),
            tables: default_tables(),
            filters: default_filters(),
        }
    }
}

impl WarehouseSection {
    /// Source table of `year`
    pub fn table_for(&self, year: &str) -> Option<&str> {
        self.tables.get(year).map(String::as_str)
    }

    /// Fully qualified source table of `year` (`dataset.table`)
    pub fn source_for(&self, year: &str) -> Option<String> {
        self.table_for(year).map(|t| format!("{}.{}", self.dataset, t))
    }

    pub fn filter_for(&self, year: &str) -> Option<&YearFilter> {
        self.filters.get(year)
    }
}

/// Row filter for one survey year.
///
/// ```toml
/// [warehouse.filters.2019]
/// equals = { sexo = "2" }
/// min = { idade = 25 }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearFilter {
    /// Columns that must hold exactly this text
    #[serde(default)]
    pub equals: BTreeMap<String, String>,

    /// Columns that must be numeric and at least this value
    #[serde(default)]
    pub min: BTreeMap<String, i64>,
}

impl YearFilter {
    /// Whether `record` passes every condition. Missing or null values fail.
    pub fn matches(&self, record: &Record) -> bool {
        let equals = self.equals.iter().all(|(column, expected)| {
            record
                .get(column)
                .and_then(|v| v.coerce(ColumnType::Text))
                .is_some_and(|v| !v.is_null() && v.to_string() == *expected)
        });
        let min = self.min.iter().all(|(column, bound)| {
            match record.get(column).and_then(|v| v.coerce(ColumnType::Real)) {
                Some(Value::Real(r)) => r >= *bound as f64,
                _ => false,
            }
        });
        equals && min
    }
}

/// Read-side conventions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadSection {
    /// Reserved column holding the survey year of each row
    #[serde(default = "default_year_column")]
    pub year_column: String,

    #[serde(default = "default_table")]
    pub default_table: String,
}

fn default_year_column() -> String {
    "origem".to_string()
}

fn default_table() -> String {
    "pns_respostas".to_string()
}

impl Default for ReadSection {
    fn default() -> Self {
        Self {
            year_column: default_year_column(),
            default_table: default_table(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Main configuration structure
///
/// Represents the `mdcache.toml` file format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    #[serde(default)]
    pub cache: CacheSection,

    #[serde(default)]
    pub warehouse: WarehouseSection,

    #[serde(default)]
    pub read: ReadSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Convert configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(project) = lookup(ENV_BILLING_PROJECT_ID).filter(|v| !v.is_empty()) {
            self.warehouse.billing_project_id = Some(project);
        }

        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.is_empty()) {
            self.logging.level = level.to_lowercase();
        }

        if let Some(path) = lookup(ENV_CACHE_PATH).filter(|v| !v.is_empty()) {
            self.cache.path = path;
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        PathBuf::from(&self.cache.path)
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from(CONFIG_FILENAME)
}

/// Load the configuration file, or `None` when it does not exist.
///
/// Environment overrides are not applied here.
pub fn load_config(path: Option<&Path>) -> Result<Option<CacheConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    CacheConfig::parse(&contents).map(Some)
}

pub fn write_config(path: &Path, config: &CacheConfig, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(Error::Config(format!(
            "config already exists at {} (use --force to overwrite)",
            path.display()
        )));
    }

    std::fs::write(path, config.to_toml()?)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
