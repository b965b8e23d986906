//! Virtual tables persisted to disk and rebuilt on reload

use jsonhouse_registry::{
    store_virtual_table, FileJsonStore, InMemoryTableRegistry, JsonStore, StaticTableSource,
    TableRegistry,
};
use jsonhouse_schema::{Column, Provenance, Table, TableConfig, Type, COMMON_TABLE_NAME};
use std::sync::Arc;
use tempfile::TempDir;

const COMMON_TABLE: &str = "CREATE TABLE jsonhouse_common_table (
    \"@timestamp\" DateTime64(3) DEFAULT now64(),
    \"attributes_values\" Map(String, String),
    \"attributes_metadata\" Map(String, String),
    \"__jsonhouse_index_name\" Nullable(String),
    \"cpu\" Nullable(Float64),
    \"host\" Nullable(String) COMMENT 'jsonhouseMetadataV1:fieldName=host.name'
) ENGINE = MergeTree ORDER BY (\"@timestamp\")";

fn virtual_table(name: &str, columns: &[&str]) -> Table {
    Table::new(name, TableConfig::default())
        .with_columns(
            columns
                .iter()
                .map(|c| Column::new(*c, Type::nullable_scalar("String"), Provenance::Discovered)),
        )
        .into_virtual()
}

#[test]
fn test_virtual_tables_survive_restart() {
    let dir = TempDir::new().unwrap();
    {
        let store = FileJsonStore::open(dir.path()).unwrap();
        store_virtual_table(&store, &virtual_table("metrics", &["cpu", "host", "attributes_values"])).unwrap();
        store_virtual_table(&store, &virtual_table("traces", &["span"])).unwrap();
    }

    let source = Arc::new(StaticTableSource::new());
    source.add_statement(COMMON_TABLE);
    let store = Arc::new(FileJsonStore::open(dir.path()).unwrap());
    let registry = InMemoryTableRegistry::new(source, store);
    registry.reload_all().unwrap();

    assert!(!registry.find_table(COMMON_TABLE_NAME).unwrap().is_virtual);

    let metrics = registry.find_table("metrics").unwrap();
    assert!(metrics.is_virtual);
    let names: Vec<String> = metrics.columns().keys().cloned().collect();
    assert_eq!(names, vec!["@timestamp", "cpu", "host"]);
    // types come from the common table, not from the manifest
    assert_eq!(metrics.column("cpu").unwrap().ty.to_string(), "Nullable(Float64)");
    assert_eq!(
        metrics.column("host").unwrap().original_field_name().as_deref(),
        Some("host.name")
    );

    // `span` is unknown to the common table and dropped
    let traces = registry.find_table("traces").unwrap();
    assert_eq!(traces.column_count(), 1);
    assert!(traces.has_column("@timestamp"));
}

#[test]
fn test_unreadable_manifest_skipped() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("broken.json"), b"{\"version\": \"1\"}").unwrap();
    std::fs::write(
        dir.path().join("future.json"),
        b"{\"version\": \"9\", \"storedAt\": \"x\", \"columns\": []}",
    )
    .unwrap();

    let source = Arc::new(StaticTableSource::new());
    source.add_statement(COMMON_TABLE);
    let store = Arc::new(FileJsonStore::open(dir.path()).unwrap());
    assert_eq!(store.list().unwrap().len(), 2);

    let registry = InMemoryTableRegistry::new(source, store);
    registry.reload_all().unwrap();
    assert!(registry.find_table("broken").is_none());
    assert!(registry.find_table("future").is_none());
    assert_eq!(registry.definitions().len(), 1);
}

#[test]
fn test_without_common_table_no_virtual_tables_load() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileJsonStore::open(dir.path()).unwrap());
    store_virtual_table(store.as_ref(), &virtual_table("metrics", &["cpu"])).unwrap();

    let registry = InMemoryTableRegistry::new(Arc::new(StaticTableSource::new()), store);
    registry.reload_all().unwrap();
    assert!(registry.find_table("metrics").is_none());
}

#[test]
fn test_glob_lookup_prefers_smallest_name() {
    let source = Arc::new(StaticTableSource::new());
    source.add_statement("CREATE TABLE logs_b (a String)");
    source.add_statement("CREATE TABLE logs_a (a String)");
    source.add_statement("CREATE TABLE metrics (a String)");
    let dir = TempDir::new().unwrap();
    let registry = InMemoryTableRegistry::new(source, Arc::new(FileJsonStore::open(dir.path()).unwrap()));
    registry.reload_all().unwrap();

    assert_eq!(registry.find_table("logs_*").unwrap().name, "logs_a");
    assert_eq!(registry.find_table("logs_b").unwrap().name, "logs_b");
    assert!(registry.find_table("traces*").is_none());
}
