//! Inventory sources consumed by the resolver and the ingest processor.
//!
//! [`TableDiscovery`] lists ClickHouse tables (physical and virtual),
//! [`ElasticIndexResolver`] lists Elasticsearch indices, aliases and data
//! streams. Both are async traits so network-backed implementations live in
//! `gantry-connectors`; the in-process implementations here serve tests,
//! dry runs and deployments without an Elasticsearch cluster.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::common_table::{self, VirtualTable};
use crate::resolver::GlobMatcher;
use crate::{Error, Result};
use gantry_storage::VirtualTableStorage;

/// One column as reported by the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredTable {
    pub name: String,
    pub columns: BTreeMap<String, DiscoveredColumn>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub create_table_query: String,
    /// Logical index stored in the common table
    #[serde(default)]
    pub is_virtual: bool,
}

impl DiscoveredTable {
    pub fn physical(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn virtual_table(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_virtual: true,
            create_table_query: "n/a".to_string(),
            ..Default::default()
        }
    }

    pub fn with_column(mut self, name: &str, column_type: &str) -> Self {
        self.columns.insert(
            name.to_string(),
            DiscoveredColumn {
                name: name.to_string(),
                column_type: column_type.to_string(),
                comment: String::new(),
            },
        );
        self
    }
}

pub type TableDefinitions = Arc<BTreeMap<String, DiscoveredTable>>;

#[async_trait]
pub trait TableDiscovery: Send + Sync {
    /// Re-read table definitions from the source. On error the previous
    /// snapshot stays in place.
    async fn reload_table_definitions(&self) -> Result<()>;

    /// Current snapshot.
    fn table_definitions(&self) -> TableDefinitions;

    fn last_reload_time(&self) -> Option<DateTime<Utc>>;

    fn last_access_time(&self) -> Option<DateTime<Utc>>;

    /// Receiver bumped whenever an out-of-band reload is requested.
    fn subscribe_force_reload(&self) -> Option<watch::Receiver<u64>> {
        None
    }

    fn backend_name(&self) -> &'static str;
}

/// Snapshot holder shared by discovery implementations.
pub struct DefinitionsCache {
    tables: RwLock<TableDefinitions>,
    last_reload_unix: AtomicI64,
    last_access_unix: AtomicI64,
    force_reload_tx: watch::Sender<u64>,
}

impl Default for DefinitionsCache {
    fn default() -> Self {
        let (force_reload_tx, _) = watch::channel(0);
        Self {
            tables: RwLock::new(Arc::new(BTreeMap::new())),
            last_reload_unix: AtomicI64::new(0),
            last_access_unix: AtomicI64::new(0),
            force_reload_tx,
        }
    }
}

impl DefinitionsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> TableDefinitions {
        self.last_access_unix
            .store(Utc::now().timestamp(), Ordering::Relaxed);
        self.tables.read().clone()
    }

    /// Replace the snapshot and log what appeared or vanished.
    pub fn store(&self, tables: BTreeMap<String, DiscoveredTable>) {
        let mut guard = self.tables.write();
        let new_tables: Vec<&String> = tables.keys().filter(|k| !guard.contains_key(*k)).collect();
        if !new_tables.is_empty() {
            tracing::info!("discovered new tables: {:?}", new_tables);
        }
        for (name, table) in guard.iter() {
            if !table.is_virtual && !tables.contains_key(name) {
                tracing::info!("table {} is no longer found in the database, ignoring", name);
            }
        }
        *guard = Arc::new(tables);
        drop(guard);
        self.mark_reloaded();
    }

    pub fn mark_reloaded(&self) {
        self.last_reload_unix
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_reload_time(&self) -> Option<DateTime<Utc>> {
        unix_to_time(self.last_reload_unix.load(Ordering::Relaxed))
    }

    pub fn last_access_time(&self) -> Option<DateTime<Utc>> {
        unix_to_time(self.last_access_unix.load(Ordering::Relaxed))
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.force_reload_tx.subscribe()
    }

    /// Ask subscribed refreshers to reload now.
    pub fn request_reload(&self) {
        self.force_reload_tx.send_modify(|n| *n += 1);
    }
}

fn unix_to_time(secs: i64) -> Option<DateTime<Utc>> {
    if secs == 0 {
        return None;
    }
    Utc.timestamp_opt(secs, 0).single()
}

/// Add virtual tables persisted in `storage` to `tables`.
///
/// Columns of a virtual table take their type and comment from the common
/// table; nothing is added when the common table has not been discovered.
pub async fn read_virtual_tables(
    storage: &dyn VirtualTableStorage,
    tables: &mut BTreeMap<String, DiscoveredTable>,
) {
    let Some(common) = tables.get(common_table::TABLE_NAME).cloned() else {
        tracing::warn!("common table not found");
        return;
    };

    let keys = match storage.list().await {
        Ok(keys) => keys,
        Err(e) => {
            tracing::error!("could not list virtual tables: {}", e);
            return;
        }
    };

    for key in keys {
        let document = match storage.get(&key).await {
            Ok(Some(document)) => document,
            Ok(None) => {
                tracing::warn!("virtual table {} not found", key);
                continue;
            }
            Err(e) => {
                tracing::error!("could not read virtual table {}: {}", key, e);
                continue;
            }
        };
        let stored: VirtualTable = match serde_json::from_str(&document) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!("could not parse virtual table {}: {}", key, e);
                continue;
            }
        };
        if stored.version != common_table::VIRTUAL_TABLE_VERSION {
            tracing::warn!(
                "skipping virtual table {}, version mismatch, actual '{}', expecting '{}'",
                key,
                stored.version,
                common_table::VIRTUAL_TABLE_VERSION
            );
            continue;
        }

        let mut table = DiscoveredTable::virtual_table(&key);
        table.comment = format!("Virtual table. Version: {}", stored.stored_at);
        for column in &stored.columns {
            match common.columns.get(&column.name) {
                Some(c) => {
                    table.columns.insert(column.name.clone(), c.clone());
                }
                None => tracing::warn!(
                    "column {} not found in common table but exists in virtual table {}",
                    column.name,
                    key
                ),
            }
        }
        tables.insert(key, table);
    }
}

/// Table discovery over a fixed, caller-maintained table list.
///
/// Virtual tables found in the optional storage are merged in on every reload.
pub struct StaticTableDiscovery {
    tables: RwLock<BTreeMap<String, DiscoveredTable>>,
    storage: Option<Arc<dyn VirtualTableStorage>>,
    failure: RwLock<Option<String>>,
    cache: DefinitionsCache,
}

impl StaticTableDiscovery {
    pub fn new(tables: impl IntoIterator<Item = DiscoveredTable>) -> Self {
        let tables: BTreeMap<String, DiscoveredTable> =
            tables.into_iter().map(|t| (t.name.clone(), t)).collect();
        let cache = DefinitionsCache::new();
        cache.store(tables.clone());
        Self {
            tables: RwLock::new(tables),
            storage: None,
            failure: RwLock::new(None),
            cache,
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn VirtualTableStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Takes effect on the next reload.
    pub fn add_table(&self, table: DiscoveredTable) {
        self.tables.write().insert(table.name.clone(), table);
    }

    pub fn remove_table(&self, name: &str) {
        self.tables.write().remove(name);
    }

    /// Make subsequent reloads fail with `message` (`None` to recover).
    pub fn set_failure(&self, message: Option<&str>) {
        *self.failure.write() = message.map(String::from);
    }

    pub fn request_reload(&self) {
        self.cache.request_reload();
    }
}

#[async_trait]
impl TableDiscovery for StaticTableDiscovery {
    async fn reload_table_definitions(&self) -> Result<()> {
        if let Some(message) = self.failure.read().clone() {
            return Err(Error::Discovery(message));
        }
        let mut tables = self.tables.read().clone();
        if let Some(storage) = &self.storage {
            read_virtual_tables(storage.as_ref(), &mut tables).await;
        }
        self.cache.store(tables);
        Ok(())
    }

    fn table_definitions(&self) -> TableDefinitions {
        self.cache.load()
    }

    fn last_reload_time(&self) -> Option<DateTime<Utc>> {
        self.cache.last_reload_time()
    }

    fn last_access_time(&self) -> Option<DateTime<Utc>> {
        self.cache.last_access_time()
    }

    fn subscribe_force_reload(&self) -> Option<watch::Receiver<u64>> {
        Some(self.cache.subscribe())
    }

    fn backend_name(&self) -> &'static str {
        "static"
    }
}

/// Result of an Elasticsearch `_resolve/index` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedIndices {
    #[serde(default)]
    pub indices: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub data_streams: Vec<String>,
}

impl ResolvedIndices {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty() && self.aliases.is_empty() && self.data_streams.is_empty()
    }

    /// Every resolvable name: indices, aliases and data streams.
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.indices
            .iter()
            .chain(self.aliases.iter())
            .chain(self.data_streams.iter())
    }
}

#[async_trait]
pub trait ElasticIndexResolver: Send + Sync {
    /// `Ok(None)` when nothing matches the pattern.
    async fn resolve(&self, pattern: &str) -> Result<Option<ResolvedIndices>>;

    fn backend_name(&self) -> &'static str;
}

/// Elasticsearch inventory held in memory.
///
/// The default value resolves nothing, which is what a deployment without an
/// Elasticsearch cluster needs.
#[derive(Default)]
pub struct FixedElasticIndexes {
    inner: RwLock<ResolvedIndices>,
    failure: RwLock<Option<String>>,
}

impl FixedElasticIndexes {
    pub fn new(indices: &[&str]) -> Self {
        Self {
            inner: RwLock::new(ResolvedIndices {
                indices: indices.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }),
            failure: RwLock::new(None),
        }
    }

    pub fn set(&self, resolved: ResolvedIndices) {
        *self.inner.write() = resolved;
    }

    pub fn set_failure(&self, message: Option<&str>) {
        *self.failure.write() = message.map(String::from);
    }
}

fn filter_names(names: &[String], matcher: &GlobMatcher) -> Vec<String> {
    names.iter().filter(|n| matcher.matches(n)).cloned().collect()
}

#[async_trait]
impl ElasticIndexResolver for FixedElasticIndexes {
    async fn resolve(&self, pattern: &str) -> Result<Option<ResolvedIndices>> {
        if let Some(message) = self.failure.read().clone() {
            return Err(Error::Backend(message));
        }
        let matcher = GlobMatcher::new(pattern);
        let inner = self.inner.read();
        let resolved = ResolvedIndices {
            indices: filter_names(&inner.indices, &matcher),
            aliases: filter_names(&inner.aliases, &matcher),
            data_streams: filter_names(&inner.data_streams, &matcher),
        };
        if resolved.is_empty() {
            Ok(None)
        } else {
            Ok(Some(resolved))
        }
    }

    fn backend_name(&self) -> &'static str {
        "fixed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common_table::{VirtualTableColumn, INDEX_NAME_COLUMN};
    use gantry_storage::MemoryStorage;

    #[tokio::test]
    async fn test_static_discovery_reload_picks_up_changes() {
        let discovery = StaticTableDiscovery::new(vec![DiscoveredTable::physical("logs")]);
        assert!(discovery.table_definitions().contains_key("logs"));

        discovery.add_table(DiscoveredTable::physical("metrics"));
        assert!(!discovery.table_definitions().contains_key("metrics"));

        discovery.reload_table_definitions().await.unwrap();
        assert!(discovery.table_definitions().contains_key("metrics"));
        assert!(discovery.last_reload_time().is_some());
        assert!(discovery.last_access_time().is_some());
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_snapshot() {
        let discovery = StaticTableDiscovery::new(vec![DiscoveredTable::physical("logs")]);
        discovery.set_failure(Some("connection refused"));
        discovery.remove_table("logs");

        let err = discovery.reload_table_definitions().await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
        assert!(discovery.table_definitions().contains_key("logs"));
    }

    #[tokio::test]
    async fn test_force_reload_notifies_subscribers() {
        let discovery = StaticTableDiscovery::new(vec![]);
        let mut rx = discovery.subscribe_force_reload().unwrap();
        discovery.request_reload();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
    }

    #[tokio::test]
    async fn test_virtual_tables_take_columns_from_common_table() {
        let storage = Arc::new(MemoryStorage::new());
        let snapshot = VirtualTable {
            version: common_table::VIRTUAL_TABLE_VERSION.to_string(),
            stored_at: "2026-01-01T00:00:00Z".to_string(),
            columns: vec![
                VirtualTableColumn::named("@timestamp"),
                VirtualTableColumn::named("foo"),
                VirtualTableColumn::named("missing"),
            ],
        };
        storage
            .put("audit", &serde_json::to_string(&snapshot).unwrap())
            .await
            .unwrap();

        let common = DiscoveredTable::physical(common_table::TABLE_NAME)
            .with_column("@timestamp", "DateTime64(3)")
            .with_column(INDEX_NAME_COLUMN, "String")
            .with_column("foo", "Nullable(String)");
        let discovery = StaticTableDiscovery::new(vec![common]).with_storage(storage);
        discovery.reload_table_definitions().await.unwrap();

        let tables = discovery.table_definitions();
        let audit = tables.get("audit").unwrap();
        assert!(audit.is_virtual);
        assert_eq!(
            audit.columns.keys().collect::<Vec<_>>(),
            vec!["@timestamp", "foo"]
        );
        assert_eq!(audit.columns["foo"].column_type, "Nullable(String)");
    }

    #[tokio::test]
    async fn test_virtual_tables_skip_unknown_version() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .put("old", r#"{"version":"0","stored_at":"","columns":[]}"#)
            .await
            .unwrap();
        let discovery =
            StaticTableDiscovery::new(vec![DiscoveredTable::physical(common_table::TABLE_NAME)])
                .with_storage(storage);
        discovery.reload_table_definitions().await.unwrap();
        assert!(!discovery.table_definitions().contains_key("old"));
    }

    #[tokio::test]
    async fn test_fixed_elastic_resolves_by_pattern() {
        let elastic = FixedElasticIndexes::new(&["logs-a", "logs-b", "metrics"]);
        let resolved = elastic.resolve("logs-*").await.unwrap().unwrap();
        assert_eq!(resolved.indices, vec!["logs-a", "logs-b"]);
        assert!(elastic.resolve("nothing*").await.unwrap().is_none());

        elastic.set_failure(Some("unreachable"));
        assert!(elastic.resolve("*").await.is_err());
    }
}
