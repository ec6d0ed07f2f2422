//! On-disk cache behavior: durability, atomicity and reader isolation

use microdata_cache::storage::{CacheStore, Filter, StoreOptions, TypePolicy, UpsertResult};
use microdata_cache::{CacheConfig, Error, ReadFacade, ReadRequest, Record, Value};
use tempfile::tempdir;

fn respondents(year: &str, rows: &[(&str, i64)]) -> Vec<Record> {
    rows.iter()
        .map(|(unit, age)| {
            Record::new()
                .with("origem", year)
                .with("identificador_unidade", *unit)
                .with("idade", *age)
        })
        .collect()
}

const KEY: &[&str] = &["origem", "identificador_unidade"];

#[test]
fn test_rows_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data").join("pns_cache.sqlite");

    {
        let mut store = CacheStore::open(&path, StoreOptions::default()).unwrap();
        let result = store
            .write_batch("pns_respostas", KEY, &respondents("2019", &[("A", 30), ("B", 41)]))
            .unwrap();
        assert_eq!(result, UpsertResult { inserted: 2, updated: 0 });
    }

    let mut store = CacheStore::open(&path, StoreOptions::default()).unwrap();
    assert!(store.table_exists("pns_respostas").unwrap());
    assert_eq!(store.count_rows("pns_respostas").unwrap(), 2);

    let again = store
        .write_batch("pns_respostas", KEY, &respondents("2019", &[("A", 30), ("B", 41)]))
        .unwrap();
    assert_eq!(again, UpsertResult { inserted: 0, updated: 2 });
}

#[test]
fn test_schema_drift_across_runs() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.sqlite");

    let mut store = CacheStore::open(&path, StoreOptions::default()).unwrap();
    store
        .write_batch("pns_respostas", KEY, &respondents("2013", &[("A", 30)]))
        .unwrap();
    drop(store);

    let mut store = CacheStore::open(&path, StoreOptions::default()).unwrap();
    store
        .write_batch(
            "pns_respostas",
            KEY,
            &[Record::new()
                .with("origem", "2019")
                .with("identificador_unidade", "A")
                .with("idade", 36)
                .with("filhos_vivos", 2)],
        )
        .unwrap();

    let rows = store.read("pns_respostas", &Filter::new()).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("filhos_vivos"), Some(&Value::Null));
    assert_eq!(rows[1].get("filhos_vivos"), Some(&Value::Integer(2)));
}

#[test]
fn test_failed_batch_leaves_file_unchanged() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.sqlite");

    let mut store = CacheStore::open(&path, StoreOptions::default()).unwrap();
    store
        .write_batch("pns_respostas", KEY, &respondents("2019", &[("A", 30)]))
        .unwrap();

    let mut bad = respondents("2019", &[("A", 99), ("C", 50)]);
    bad[1].remove("identificador_unidade");
    let err = store.write_batch("pns_respostas", KEY, &bad).unwrap_err();
    assert!(matches!(err, Error::MissingKey { index: 1, .. }));
    drop(store);

    let store = CacheStore::open(&path, StoreOptions::default()).unwrap();
    let rows = store.read("pns_respostas", &Filter::new()).unwrap();
    assert_eq!(rows, respondents("2019", &[("A", 30)]));
}

#[test]
fn test_strict_policy_rejects_type_change() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.sqlite");
    let options = StoreOptions {
        type_policy: TypePolicy::Strict,
        ..StoreOptions::default()
    };

    let mut store = CacheStore::open(&path, options).unwrap();
    store
        .write_batch("pns_respostas", KEY, &respondents("2019", &[("A", 30)]))
        .unwrap();

    let err = store
        .write_batch(
            "pns_respostas",
            KEY,
            &[Record::new()
                .with("origem", "2019")
                .with("identificador_unidade", "B")
                .with("idade", "unknown")],
        )
        .unwrap_err();
    assert!(matches!(err, Error::SchemaConflict { .. }));
    assert_eq!(store.count_rows("pns_respostas").unwrap(), 1);
}

#[test]
fn test_reader_sees_committed_state_only() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cache.sqlite");

    let mut writer = CacheStore::open(&path, StoreOptions::default()).unwrap();
    writer
        .write_batch("pns_respostas", KEY, &respondents("2019", &[("A", 30)]))
        .unwrap();
    let reader = CacheStore::open(&path, StoreOptions::default()).unwrap();

    // Hold an uncommitted write open on a separate connection
    let mut raw = rusqlite::Connection::open(&path).unwrap();
    let tx = raw.transaction().unwrap();
    tx.execute(
        "INSERT INTO pns_respostas (origem, identificador_unidade, idade) VALUES ('2019', 'Z', 1)",
        [],
    )
    .unwrap();

    assert_eq!(reader.count_rows("pns_respostas").unwrap(), 1);
    tx.commit().unwrap();
    assert_eq!(reader.count_rows("pns_respostas").unwrap(), 2);
}

#[test]
fn test_facade_from_config() {
    let dir = tempdir().unwrap();
    let mut config = CacheConfig::new();
    config.cache.path = dir.path().join("pns.sqlite").to_string_lossy().to_string();

    let mut store = CacheStore::from_config(&config).unwrap();
    store
        .write_batch("pns_respostas", KEY, &respondents("2013", &[("A", 30)]))
        .unwrap();
    store
        .write_batch("pns_respostas", KEY, &respondents("2019", &[("A", 36), ("B", 52)]))
        .unwrap();

    let facade = ReadFacade::new(&store, config.read.year_column.clone());
    assert_eq!(facade.years("pns_respostas").unwrap(), vec!["2013", "2019"]);

    let rows = facade
        .fetch(
            &ReadRequest::new("pns_respostas")
                .year("2019")
                .keys(vec![vec![Value::from("2019"), Value::from("B")]])
                .columns(["idade"]),
        )
        .unwrap();
    assert_eq!(rows, vec![Record::new().with("idade", 52)]);
}
