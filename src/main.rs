//! mdcache CLI - local cache for warehouse survey microdata

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use microdata_cache::config::{self, CacheConfig};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "mdcache")]
#[command(version)]
#[command(about = "Local cache for warehouse survey microdata")]
#[command(long_about = r#"
mdcache keeps tables exported from the analytical warehouse in a local SQLite
file, so transformation steps can run repeatedly and offline:
  • Idempotent batch upserts keyed by primary key
  • Schema drift absorbed by adding and widening columns
  • Reads filtered by survey year, key set or column subset

Example usage:
  mdcache init
  mdcache ingest --table pns_respostas --year 2019 --semantic --file pns_2019.jsonl
  mdcache read --table pns_respostas --year 2019 --columns sexo,idade
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InputFormat {
    /// A single JSON array of objects
    Json,
    /// One JSON object per line
    Jsonl,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and create the cache directory
    Init {
        /// Overwrite an existing configuration file
        #[arg(short, long)]
        force: bool,
    },

    /// Load exported warehouse rows into a cached table
    Ingest {
        /// Target table (defaults to read.default_table)
        #[arg(short, long)]
        table: Option<String>,

        /// Primary-key column; repeat for composite keys
        #[arg(short, long = "key")]
        keys: Vec<String>,

        /// JSON or JSON-lines file with one object per row
        #[arg(short, long)]
        file: PathBuf,

        /// Input format (guessed from the file extension when omitted)
        #[arg(long, value_enum)]
        format: Option<InputFormat>,

        /// Survey year the rows belong to
        #[arg(short, long)]
        year: Option<String>,

        /// Rename physical warehouse codes to semantic variable names
        #[arg(long, requires = "year")]
        semantic: bool,

        /// Keep only rows passing warehouse.filters for the year
        #[arg(long, requires = "semantic")]
        apply_filters: bool,

        /// TOML variable map replacing the built-in one
        #[arg(long, requires = "semantic")]
        map: Option<PathBuf>,

        /// Records per transaction
        #[arg(long, default_value = "1000")]
        batch_size: usize,
    },

    /// Print cached rows
    Read {
        /// Table to read (defaults to read.default_table)
        #[arg(short, long)]
        table: Option<String>,

        /// Only rows of this survey year
        #[arg(short, long)]
        year: Option<String>,

        /// Equality predicate `column=value`; repeatable
        #[arg(short, long = "where")]
        predicates: Vec<String>,

        /// Comma-separated columns to return
        #[arg(long, value_delimiter = ',')]
        columns: Option<Vec<String>>,

        /// Fail when the table was never written
        #[arg(long)]
        strict: bool,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show the columns and declared types of a table
    Schema {
        /// Table to describe (defaults to read.default_table)
        #[arg(short, long)]
        table: Option<String>,
    },

    /// Show row and column counts per cached table
    Stats,

    /// List semantic variables
    Variables {
        /// Only variables collected in this survey year
        #[arg(short, long)]
        year: Option<String>,

        /// TOML variable map replacing the built-in one
        #[arg(long)]
        map: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let mut cfg = config::load_config(Some(&config_path))?.unwrap_or_default();
    cfg.apply_env_overrides();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_new(&cfg.logging.level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let result = run(cli.command, &config_path, &cfg);
    if let Err(ref e) = result {
        microdata_cache::ui::error(&format!("{:#}", e));
    }
    result
}

fn run(command: Commands, config_path: &std::path::Path, cfg: &CacheConfig) -> anyhow::Result<()> {
    let table_or_default = |table: Option<String>| table.unwrap_or_else(|| cfg.read.default_table.clone());

    match command {
        Commands::Init { force } => commands::run_init(config_path, cfg, force),

        Commands::Ingest {
            table,
            keys,
            file,
            format,
            year,
            semantic,
            apply_filters,
            map,
            batch_size,
        } => commands::run_ingest(
            cfg,
            commands::IngestArgs {
                table: table_or_default(table),
                keys,
                file,
                format,
                year,
                semantic,
                apply_filters,
                map,
                batch_size,
            },
        ),

        Commands::Read {
            table,
            year,
            predicates,
            columns,
            strict,
            json,
        } => commands::run_read(
            cfg,
            commands::ReadArgs {
                table: table_or_default(table),
                year,
                predicates,
                columns,
                strict,
                json,
            },
        ),

        Commands::Schema { table } => commands::run_schema(cfg, &table_or_default(table)),

        Commands::Stats => commands::run_stats(cfg),

        Commands::Variables { year, map } => commands::run_variables(year.as_deref(), map.as_deref()),
    }
}
