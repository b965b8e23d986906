//! Concurrent in-memory table registry

use crate::manifest::load_virtual_tables;
use crate::source::{StaticTableSource, TableSource};
use crate::store::{JsonStore, MemoryJsonStore};
use crate::{RegistryError, TableRegistry};
use dashmap::DashMap;
use jsonhouse_schema::{Table, COMMON_TABLE_NAME};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub struct InMemoryTableRegistry {
    tables: DashMap<String, Arc<Table>>,
    source: Arc<dyn TableSource>,
    manifests: Arc<dyn JsonStore>,
    last_reload: Mutex<Option<Instant>>,
}

impl InMemoryTableRegistry {
    pub fn new(source: Arc<dyn TableSource>, manifests: Arc<dyn JsonStore>) -> Self {
        Self {
            tables: DashMap::new(),
            source,
            manifests,
            last_reload: Mutex::new(None),
        }
    }

    pub fn manifests(&self) -> Arc<dyn JsonStore> {
        Arc::clone(&self.manifests)
    }

    /// Time since the last successful reload, if there was one.
    pub fn since_last_reload(&self) -> Option<Duration> {
        let last = *self.last_reload.lock();
        last.map(|at| at.elapsed())
    }
}

impl Default for InMemoryTableRegistry {
    fn default() -> Self {
        Self::new(
            Arc::new(StaticTableSource::new()),
            Arc::new(MemoryJsonStore::new()),
        )
    }
}

impl TableRegistry for InMemoryTableRegistry {
    fn find_table(&self, pattern: &str) -> Option<Arc<Table>> {
        if let Some(table) = self.tables.get(pattern) {
            return Some(Arc::clone(table.value()));
        }
        if !pattern.contains('*') {
            return None;
        }

        let mut matches: Vec<(String, Arc<Table>)> = self
            .tables
            .iter()
            .filter(|entry| glob_matches(pattern, entry.key()))
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));

        if matches.len() > 1 {
            debug!(
                pattern = %pattern,
                candidates = matches.len(),
                chosen = %matches[0].0,
                "ambiguous table pattern, using first name in order"
            );
        }
        matches.into_iter().next().map(|(_, table)| table)
    }

    fn add_table_if_absent(&self, table: Arc<Table>) -> bool {
        match self.tables.entry(table.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(table);
                true
            }
        }
    }

    fn reload_all(&self) -> Result<(), RegistryError> {
        let started = Instant::now();

        // 1. Physical tables
        let mut fresh: HashMap<String, Arc<Table>> = self
            .source
            .list_tables()?
            .into_iter()
            .map(|t| (t.name.clone(), Arc::new(t)))
            .collect();

        // 2. Virtual tables, typed by the common table
        let mut virtual_count = 0;
        if let Some(common) = fresh.get(COMMON_TABLE_NAME).cloned() {
            for table in load_virtual_tables(self.manifests.as_ref(), &common)? {
                virtual_count += 1;
                fresh.entry(table.name.clone()).or_insert_with(|| Arc::new(table));
            }
        }

        // 3. Swap definitions
        self.tables.retain(|name, _| fresh.contains_key(name));
        let total = fresh.len();
        for (name, table) in fresh {
            self.tables.insert(name, table);
        }

        *self.last_reload.lock() = Some(Instant::now());
        info!(
            tables = total,
            virtual_tables = virtual_count,
            duration_ms = started.elapsed().as_millis() as u64,
            "table registry reloaded"
        );
        Ok(())
    }

    fn definitions(&self) -> BTreeMap<String, Arc<Table>> {
        self.tables
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }
}

/// `*` matches any run of characters; everything else is literal.
pub fn glob_matches(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let (mut pi, mut ni) = (0, 0);
    let mut star: Option<usize> = None;
    let mut resume = 0;

    while ni < n.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            resume = ni;
            pi += 1;
        } else if pi < p.len() && p[pi] == n[ni] {
            pi += 1;
            ni += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            resume += 1;
            ni = resume;
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::store_virtual_table;
    use jsonhouse_schema::{Column, Provenance, TableConfig, Type, TIMESTAMP_FIELD};

    fn table(name: &str) -> Arc<Table> {
        Arc::new(Table::new(name, TableConfig::default()))
    }

    #[test]
    fn test_glob_matches() {
        assert!(glob_matches("logs-*", "logs-2024"));
        assert!(glob_matches("*", "anything"));
        assert!(glob_matches("a*b*c", "aXXbYYc"));
        assert!(!glob_matches("logs-*", "metrics-2024"));
        assert!(!glob_matches("a*c", "abcd"));
        assert!(glob_matches("exact", "exact"));
    }

    #[test]
    fn test_find_table_tie_break_is_deterministic() {
        let registry = InMemoryTableRegistry::default();
        registry.add_table_if_absent(table("logs-b"));
        registry.add_table_if_absent(table("logs-a"));
        registry.add_table_if_absent(table("logs-c"));

        for _ in 0..10 {
            assert_eq!(registry.find_table("logs-*").unwrap().name, "logs-a");
        }
        assert!(registry.find_table("metrics-*").is_none());
        assert_eq!(registry.find_table("logs-c").unwrap().name, "logs-c");
    }

    #[test]
    fn test_exact_match_wins_over_glob() {
        let registry = InMemoryTableRegistry::default();
        registry.add_table_if_absent(table("logs*"));
        registry.add_table_if_absent(table("logs-a"));
        assert_eq!(registry.find_table("logs*").unwrap().name, "logs*");
    }

    #[test]
    fn test_add_table_if_absent() {
        let registry = InMemoryTableRegistry::default();
        assert!(registry.add_table_if_absent(table("t")));
        assert!(!registry.add_table_if_absent(table("t")));
        assert_eq!(registry.definitions().len(), 1);
    }

    #[test]
    fn test_reload_replaces_definitions_and_rebuilds_virtual_tables() {
        let source = Arc::new(StaticTableSource::new());
        source.add_statement(format!(
            "CREATE TABLE {} (\"@timestamp\" DateTime64(3), \"host\" Nullable(String)) ENGINE = MergeTree",
            jsonhouse_schema::table::quote_identifier(COMMON_TABLE_NAME)
        ));
        let manifests = Arc::new(MemoryJsonStore::new());
        let logical = Table::new("web", TableConfig::default()).with_columns(vec![Column::new(
            "host",
            Type::nullable_scalar("String"),
            Provenance::Promoted,
        )]);
        store_virtual_table(manifests.as_ref(), &logical).unwrap();

        let registry = InMemoryTableRegistry::new(source, manifests);
        registry.add_table_if_absent(table("stale"));
        assert!(registry.since_last_reload().is_none());

        registry.reload_all().unwrap();

        let defs = registry.definitions();
        assert!(!defs.contains_key("stale"));
        assert!(defs.contains_key(COMMON_TABLE_NAME));
        let web = registry.find_table("web").unwrap();
        assert!(web.is_virtual);
        assert!(web.has_column(TIMESTAMP_FIELD));
        assert!(web.has_column("host"));
        assert!(registry.since_last_reload().is_some());
    }
}
