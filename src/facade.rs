//! Read Facade - cached rows for transformation and service consumers
//!
//! Survey years share one table and are told apart by a reserved year column,
//! so consumers never deal with per-year table names.

use crate::record::Record;
use crate::storage::{CacheStore, Filter, TableSchema};
use crate::value::Value;
use crate::{Error, Result};

/// A read against one cached table
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    pub table: String,
    pub year: Option<String>,
    pub keys: Option<Vec<Vec<Value>>>,
    pub columns: Option<Vec<String>>,
    pub filter: Filter,
    pub require_existing: bool,
}

impl ReadRequest {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            year: None,
            keys: None,
            columns: None,
            filter: Filter::new(),
            require_existing: false,
        }
    }

    /// Only rows of survey `year`
    pub fn year(mut self, year: impl Into<String>) -> Self {
        self.year = Some(year.into());
        self
    }

    /// Only rows whose primary-key tuple is in `keys`
    pub fn keys(mut self, keys: Vec<Vec<Value>>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Fail with `TableNotFound` instead of returning no rows
    pub fn require_existing(mut self) -> Self {
        self.require_existing = true;
        self
    }
}

/// Pass-through over [`CacheStore`] reads
pub struct ReadFacade<'s> {
    store: &'s CacheStore,
    year_column: String,
}

impl<'s> ReadFacade<'s> {
    pub fn new(store: &'s CacheStore, year_column: impl Into<String>) -> Self {
        Self {
            store,
            year_column: year_column.into(),
        }
    }

    pub fn year_column(&self) -> &str {
        &self.year_column
    }

    pub fn fetch(&self, request: &ReadRequest) -> Result<Vec<Record>> {
        if request.require_existing && !self.store.table_exists(&request.table)? {
            return Err(Error::TableNotFound(request.table.clone()));
        }

        let mut filter = request.filter.clone();
        if let Some(year) = &request.year {
            filter = filter.equals(self.year_column.clone(), year.as_str());
        }
        if let Some(keys) = &request.keys {
            filter = filter.with_keys(keys.clone());
        }

        let rows = self
            .store
            .select(&request.table, &filter, request.columns.as_deref())?;
        tracing::debug!("Fetched {} rows from {}", rows.len(), request.table);
        Ok(rows)
    }

    /// Survey years present in `table`, ascending
    pub fn years(&self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .store
            .distinct_values(table, &self.year_column)?
            .into_iter()
            .map(|v| v.to_string())
            .collect())
    }

    pub fn schema(&self, table: &str) -> Result<Option<TableSchema>> {
        self.store.schema(table)
    }

    pub fn tables(&self) -> Result<Vec<String>> {
        self.store.list_tables()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreOptions;

    fn populated() -> CacheStore {
        let mut store = CacheStore::open_in_memory(StoreOptions::default()).unwrap();
        store
            .write_batch(
                "pns_respostas",
                &["origem", "identificador_unidade"],
                &[
                    Record::new()
                        .with("origem", "2013")
                        .with("identificador_unidade", "A")
                        .with("idade", 30)
                        .with("sexo", "1"),
                    Record::new()
                        .with("origem", "2019")
                        .with("identificador_unidade", "A")
                        .with("idade", 36)
                        .with("sexo", "1"),
                    Record::new()
                        .with("origem", "2019")
                        .with("identificador_unidade", "B")
                        .with("idade", 52)
                        .with("sexo", "2"),
                ],
            )
            .unwrap();
        store
    }

    #[test]
    fn test_fetch_by_year_with_projection() {
        let store = populated();
        let facade = ReadFacade::new(&store, "origem");

        let rows = facade
            .fetch(
                &ReadRequest::new("pns_respostas")
                    .year("2019")
                    .columns(["identificador_unidade", "idade"]),
            )
            .unwrap();
        assert_eq!(
            rows,
            vec![
                Record::new().with("identificador_unidade", "A").with("idade", 36),
                Record::new().with("identificador_unidade", "B").with("idade", 52),
            ]
        );
    }

    #[test]
    fn test_fetch_by_keys_and_filter() {
        let store = populated();
        let facade = ReadFacade::new(&store, "origem");

        let rows = facade
            .fetch(
                &ReadRequest::new("pns_respostas")
                    .keys(vec![
                        vec![Value::from("2013"), Value::from("A")],
                        vec![Value::from("2019"), Value::from("B")],
                    ])
                    .filter(Filter::new().equals("sexo", "2")),
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("idade"), Some(&Value::Integer(52)));
    }

    #[test]
    fn test_missing_table() {
        let store = populated();
        let facade = ReadFacade::new(&store, "origem");

        assert!(facade.fetch(&ReadRequest::new("other")).unwrap().is_empty());
        assert!(matches!(
            facade.fetch(&ReadRequest::new("other").require_existing()),
            Err(Error::TableNotFound(_))
        ));
    }

    #[test]
    fn test_years_and_tables() {
        let store = populated();
        let facade = ReadFacade::new(&store, "origem");

        assert_eq!(facade.years("pns_respostas").unwrap(), vec!["2013", "2019"]);
        assert!(facade.years("other").unwrap().is_empty());
        assert_eq!(facade.tables().unwrap(), vec!["pns_respostas"]);
        assert!(facade.schema("pns_respostas").unwrap().is_some());
    }
}
