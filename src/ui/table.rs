use tabled::{builder::Builder, settings::Style, Table, Tabled};

use crate::record::Record;
use crate::storage::{CacheStats, TableSchema};

#[derive(Tabled)]
struct ColumnRow {
    #[tabled(rename = "Column")]
    name: String,
    #[tabled(rename = "Type")]
    column_type: String,
    #[tabled(rename = "Key")]
    key: String,
}

#[derive(Tabled)]
struct StatsRow {
    #[tabled(rename = "Table")]
    name: String,
    #[tabled(rename = "Rows")]
    rows: usize,
    #[tabled(rename = "Columns")]
    columns: usize,
}

/// Render records with a header of `columns`; cells missing from a record are blank
pub fn records_table(columns: &[String], records: &[Record]) -> String {
    let mut builder = Builder::default();
    builder.push_record(columns.iter().cloned());
    for record in records {
        builder.push_record(columns.iter().map(|c| match record.get(c) {
            Some(v) if !v.is_null() => v.to_string(),
            _ => String::new(),
        }));
    }
    builder.build().with(Style::rounded()).to_string()
}

pub fn schema_table(schema: &TableSchema) -> String {
    let rows: Vec<ColumnRow> = schema
        .columns
        .iter()
        .map(|c| ColumnRow {
            name: c.name.clone(),
            column_type: c.column_type.to_string(),
            key: if c.is_key { "yes".to_string() } else { String::new() },
        })
        .collect();
    Table::new(&rows).with(Style::rounded()).to_string()
}

pub fn stats_table(stats: &CacheStats) -> String {
    let rows: Vec<StatsRow> = stats
        .tables
        .iter()
        .map(|t| StatsRow {
            name: t.name.clone(),
            rows: t.rows,
            columns: t.columns,
        })
        .collect();
    Table::new(&rows).with(Style::rounded()).to_string()
}
