//! Shared state under concurrent ingest calls

use jsonhouse_ingest::{Document, IngestConfig, IngestProcessor, Promoter, PromotionThresholds, RecordingExecutor};
use jsonhouse_registry::{InMemoryTableRegistry, MemoryJsonStore, StaticTableSource, TableRegistry};
use jsonhouse_schema::{Column, Provenance, Table, TableConfig, Type};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

const THREADS: usize = 8;

fn column(name: String) -> Column {
    Column::new(name, Type::nullable_scalar("Int64"), Provenance::Promoted)
}

fn doc(value: serde_json::Value) -> Document {
    value.as_object().cloned().unwrap()
}

fn processor_with(statements: &[&str]) -> (IngestProcessor, Arc<RecordingExecutor>) {
    let source = Arc::new(StaticTableSource::new());
    for statement in statements {
        source.add_statement(*statement);
    }
    let store = Arc::new(MemoryJsonStore::new());
    let registry = Arc::new(InMemoryTableRegistry::new(source, store.clone()));
    registry.reload_all().unwrap();
    let executor = Arc::new(RecordingExecutor::new());
    let processor = IngestProcessor::new(IngestConfig::default(), registry, executor.clone(), store);
    (processor, executor)
}

#[test]
fn test_concurrent_add_columns_lose_nothing() {
    let table = Table::new("t", TableConfig::default());
    let shared_added = AtomicUsize::new(0);
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        // pairs are added together, so a reader never sees half of one
        s.spawn(|| {
            while !done.load(Ordering::Acquire) {
                let columns = table.columns();
                for name in columns.keys().filter(|n| n.ends_with("_a")) {
                    let pair = format!("{}_b", name.trim_end_matches("_a"));
                    assert!(columns.contains_key(&pair), "saw {} without {}", name, pair);
                }
            }
        });

        let writers: Vec<_> = (0..THREADS)
            .map(|t| {
                let (table, shared_added) = (&table, &shared_added);
                s.spawn(move || {
                    for i in 0..25 {
                        table.add_columns(vec![column(format!("w{}_{}_a", t, i)), column(format!("w{}_{}_b", t, i))]);
                        let added = table.add_columns(vec![column("shared".to_string())]);
                        shared_added.fetch_add(added.len(), Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        done.store(true, Ordering::Release);
    });

    assert_eq!(table.column_count(), THREADS * 25 * 2 + 1);
    assert_eq!(shared_added.load(Ordering::Relaxed), 1);
}

#[test]
fn test_concurrent_add_table_if_absent_has_one_winner() {
    let registry = InMemoryTableRegistry::new(Arc::new(StaticTableSource::new()), Arc::new(MemoryJsonStore::new()));
    let wins = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                let table = Arc::new(Table::new("logs", TableConfig::default()));
                if registry.add_table_if_absent(table) {
                    wins.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });

    assert_eq!(wins.load(Ordering::Relaxed), 1);
    assert_eq!(registry.definitions().len(), 1);
}

#[test]
fn test_concurrent_promotion_counts_every_call() {
    let promoter = Promoter::new(PromotionThresholds::default());
    let table = Table::new("t", TableConfig::default()).with_columns(
        (0..200).map(|i| Column::new(format!("c{}", i), Type::scalar("String"), Provenance::Discovered)),
    );
    let keys = vec!["a".to_string()];
    let promoted = AtomicUsize::new(0);

    // 200 calls span two windows of 100; each promotes on calls 10..=100
    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..50 {
                    let indices = promoter.should_promote(&table, &keys);
                    promoted.fetch_add(indices.len(), Ordering::Relaxed);
                }
            });
        }
    });

    assert_eq!(promoted.load(Ordering::Relaxed), 2 * 91);
}

#[test]
fn test_concurrent_batches_alter_a_new_field_once() {
    let (processor, executor) = processor_with(&[
        "CREATE TABLE logs (\"@timestamp\" DateTime64(3), msg Nullable(String)) ENGINE = MergeTree",
    ]);

    thread::scope(|s| {
        for i in 0..THREADS {
            let processor = &processor;
            s.spawn(move || {
                processor.ingest("logs", vec![doc(json!({"x": i}))]).unwrap();
            });
        }
    });

    let statements = executor.statements();
    let adds = statements
        .iter()
        .filter(|sql| sql.contains("ADD COLUMN IF NOT EXISTS \"x\""))
        .count();
    let comments = statements
        .iter()
        .filter(|sql| sql.contains("COMMENT COLUMN \"x\""))
        .count();
    let inserts = statements.iter().filter(|sql| sql.starts_with("INSERT INTO")).count();
    assert_eq!(adds, 1);
    assert_eq!(comments, 1);
    assert_eq!(inserts, THREADS);
}

#[test]
fn test_concurrent_first_sighting_creates_once() {
    let (processor, executor) = processor_with(&[]);

    thread::scope(|s| {
        for i in 0..THREADS {
            let processor = &processor;
            s.spawn(move || {
                processor.ingest("events", vec![doc(json!({"n": i}))]).unwrap();
            });
        }
    });

    let statements = executor.statements();
    let creates = statements
        .iter()
        .filter(|sql| sql.starts_with("CREATE TABLE"))
        .count();
    assert_eq!(creates, 1);
    assert_eq!(processor.registry().definitions().len(), 1);
}
