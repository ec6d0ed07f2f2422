use crate::InputFormat;
use anyhow::Context;
use microdata_cache::config::{self, CacheConfig};
use microdata_cache::ui::{self, Icons, IngestProgress};
use microdata_cache::{
    CacheStore, Filter, ReadFacade, ReadRequest, Record, UpsertResult, Value, VariableMap,
};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub struct IngestArgs {
    pub table: String,
    pub keys: Vec<String>,
    pub file: PathBuf,
    pub format: Option<InputFormat>,
    pub year: Option<String>,
    pub semantic: bool,
    pub apply_filters: bool,
    pub map: Option<PathBuf>,
    pub batch_size: usize,
}

pub struct ReadArgs {
    pub table: String,
    pub year: Option<String>,
    pub predicates: Vec<String>,
    pub columns: Option<Vec<String>>,
    pub strict: bool,
    pub json: bool,
}

pub fn run_init(config_path: &Path, cfg: &CacheConfig, force: bool) -> anyhow::Result<()> {
    config::write_config(config_path, cfg, force)?;
    config::ensure_db_dir(&cfg.cache_path())?;

    ui::success(&format!("Wrote {}", config_path.display()));
    ui::status(Icons::DATABASE, "Cache", &cfg.cache.path);
    if cfg.warehouse.billing_project_id.is_none() {
        ui::warn("warehouse.billing_project_id is not set (env BILLING_PROJECT_ID)");
    }
    Ok(())
}

pub fn run_ingest(cfg: &CacheConfig, args: IngestArgs) -> anyhow::Result<()> {
    if args.batch_size == 0 {
        anyhow::bail!("--batch-size must be at least 1");
    }

    let format = args.format.unwrap_or_else(|| guess_format(&args.file));
    let mut records = read_records(&args.file, format)?;

    let mut keys = args.keys;
    if args.semantic {
        let map = load_variable_map(args.map.as_deref())?.with_year_column(cfg.read.year_column.clone());
        // --semantic requires --year
        let year = args.year.as_deref().unwrap_or_default();
        records = records.iter().map(|r| map.to_semantic(r, year)).collect();
        if args.apply_filters {
            let before = records.len();
            if let Some(filter) = cfg.warehouse.filter_for(year) {
                records.retain(|r| filter.matches(r));
            }
            tracing::info!("Year filter kept {} of {} rows", records.len(), before);
        }
        if keys.is_empty() {
            keys = vec![cfg.read.year_column.clone(), "identificador_unidade".to_string()];
        }
    } else if let Some(year) = &args.year {
        for record in &mut records {
            if !record.contains(&cfg.read.year_column) {
                record.insert(cfg.read.year_column.clone(), year.as_str());
            }
        }
    }
    if keys.is_empty() {
        anyhow::bail!("at least one --key column is required");
    }

    ui::header(&format!("Ingesting {} into {}", args.file.display(), args.table));
    ui::status(Icons::DATABASE, "Cache", &cfg.cache.path);
    if let Some(source) = args.year.as_deref().and_then(|y| cfg.warehouse.source_for(y)) {
        ui::status(Icons::TABLE, "Source", &source);
    }
    ui::status(Icons::FILE, "Records", &records.len().to_string());

    let mut store = CacheStore::from_config(cfg)?;
    let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    let progress = IngestProgress::new(records.len());
    let start = Instant::now();
    let mut total = UpsertResult::default();

    for (i, batch) in records.chunks(args.batch_size).enumerate() {
        progress.set_message(&format!("batch {}", i + 1));
        let result = store
            .write_batch(&args.table, &key_refs, batch)
            .inspect_err(|_| progress.abandon())
            .with_context(|| format!("batch {} of {} failed", i + 1, args.file.display()))?;
        progress.inc_batch(batch.len());
        total += result;
    }

    progress.finish_with_summary(start.elapsed(), records.len(), &total);
    ui::batch_summary(&args.table, &total);
    Ok(())
}

pub fn run_read(cfg: &CacheConfig, args: ReadArgs) -> anyhow::Result<()> {
    let store = CacheStore::from_config(cfg)?;
    let facade = ReadFacade::new(&store, cfg.read.year_column.clone());

    let mut filter = Filter::new();
    for predicate in &args.predicates {
        let (column, value) = parse_predicate(predicate)?;
        filter = filter.equals(column, value);
    }

    let mut request = ReadRequest::new(args.table.clone()).filter(filter);
    if let Some(year) = args.year {
        request = request.year(year);
    }
    if let Some(columns) = args.columns.clone() {
        request = request.columns(columns);
    }
    if args.strict {
        request = request.require_existing();
    }

    let rows = facade.fetch(&request)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        ui::warn(&format!("No rows in {}", args.table));
        return Ok(());
    }
    let columns = match args.columns {
        Some(columns) => columns,
        None => facade
            .schema(&args.table)?
            .map(|s| s.column_names())
            .unwrap_or_default(),
    };
    println!("{}", ui::records_table(&columns, &rows));
    ui::summary_row("Rows", &rows.len().to_string());
    Ok(())
}

pub fn run_schema(cfg: &CacheConfig, table: &str) -> anyhow::Result<()> {
    let store = CacheStore::from_config(cfg)?;
    let Some(schema) = store.schema(table)? else {
        anyhow::bail!("table {} has never been written", table);
    };

    ui::section(&format!(" {} {} ", Icons::TABLE, schema.name));
    ui::status(
        Icons::KEY,
        "Primary key",
        &schema
            .primary_key
            .join(", ")
            .style(ui::theme().key.clone())
            .to_string(),
    );
    println!("{}", ui::schema_table(&schema));
    Ok(())
}

pub fn run_stats(cfg: &CacheConfig) -> anyhow::Result<()> {
    let store = CacheStore::from_config(cfg)?;
    let stats = store.stats()?;

    ui::section(&format!(" {} Cache Statistics ", Icons::STATS));
    ui::status(Icons::DATABASE, "Cache", &cfg.cache.path);
    if stats.tables.is_empty() {
        println!("  {}", ui::muted("no tables cached yet"));
        return Ok(());
    }
    println!("{}", ui::stats_table(&stats));
    ui::summary_row("Total rows", &stats.total_rows().to_string());
    Ok(())
}

pub fn run_variables(year: Option<&str>, map: Option<&Path>) -> anyhow::Result<()> {
    let map = load_variable_map(map)?;
    let years = map.years();

    ui::section(" Variables ");
    for name in map.available(year) {
        let codes: Vec<String> = years
            .iter()
            .filter(|y| year.is_none_or(|wanted| wanted == **y))
            .map(|y| match (map.physical_code(name, y), map.column_type(name, y)) {
                (Some(code), Some(t)) => format!("{}={} ({})", y, code, t),
                _ => format!("{}=-", y),
            })
            .collect();
        println!("  {:<28} {}", name, ui::dim(&codes.join("  ")));
    }
    Ok(())
}

fn load_variable_map(path: Option<&Path>) -> anyhow::Result<VariableMap> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading variable map {}", path.display()))?;
            Ok(VariableMap::from_toml_str(&content)?)
        }
        None => Ok(VariableMap::builtin()),
    }
}

fn guess_format(path: &Path) -> InputFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some("jsonl") | Some("ndjson") => InputFormat::Jsonl,
        _ => InputFormat::Json,
    }
}

fn read_records(path: &Path, format: InputFormat) -> anyhow::Result<Vec<Record>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;

    match format {
        InputFormat::Json => {
            let json: serde_json::Value = serde_json::from_str(&content)?;
            let Some(rows) = json.as_array() else {
                anyhow::bail!("{} must hold a JSON array of objects", path.display());
            };
            rows.iter()
                .enumerate()
                .map(|(i, row)| Record::from_json(row).with_context(|| format!("row {}", i)))
                .collect()
        }
        InputFormat::Jsonl => content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                let json: serde_json::Value = serde_json::from_str(line)
                    .with_context(|| format!("line {}", i + 1))?;
                Record::from_json(&json).with_context(|| format!("line {}", i + 1))
            })
            .collect(),
    }
}

/// Parse `column=value`; the value is read as a JSON scalar when possible
fn parse_predicate(text: &str) -> anyhow::Result<(String, Value)> {
    let Some((column, raw)) = text.split_once('=') else {
        anyhow::bail!("predicate {:?} must look like column=value", text);
    };
    let value = serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|json| Value::from_json(&json).ok())
        .unwrap_or_else(|| Value::from(raw));
    Ok((column.trim().to_string(), value))
}
