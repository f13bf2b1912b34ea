//! Table discovery from ClickHouse system tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

use crate::clickhouse::ClickhouseClient;
use crate::error::Result;
use gantry::discovery::{
    read_virtual_tables, DefinitionsCache, DiscoveredColumn, DiscoveredTable, TableDefinitions,
    TableDiscovery,
};
use gantry::ingest::ddl::quote_string;
use gantry_storage::VirtualTableStorage;

#[derive(Debug, Deserialize)]
struct ColumnRow {
    table: String,
    name: String,
    #[serde(rename = "type")]
    column_type: String,
    #[serde(default)]
    comment: String,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    name: String,
    #[serde(default)]
    comment: String,
    #[serde(default)]
    create_table_query: String,
}

fn assemble_tables(
    columns: Vec<ColumnRow>,
    tables: Vec<TableRow>,
) -> BTreeMap<String, DiscoveredTable> {
    let mut discovered: BTreeMap<String, DiscoveredTable> = BTreeMap::new();
    for row in columns {
        let table = discovered
            .entry(row.table.clone())
            .or_insert_with(|| DiscoveredTable::physical(row.table.clone()));
        table.columns.insert(
            row.name.clone(),
            DiscoveredColumn {
                name: row.name,
                column_type: row.column_type,
                comment: row.comment,
            },
        );
    }
    for row in tables {
        if let Some(table) = discovered.get_mut(&row.name) {
            table.comment = row.comment;
            table.create_table_query = row.create_table_query;
        }
    }
    discovered
}

/// Discovers the tables of one ClickHouse database.
pub struct ClickhouseTableDiscovery {
    client: Arc<ClickhouseClient>,
    storage: Option<Arc<dyn VirtualTableStorage>>,
    cache: DefinitionsCache,
}

impl ClickhouseTableDiscovery {
    pub fn new(client: Arc<ClickhouseClient>) -> Self {
        Self {
            client,
            storage: None,
            cache: DefinitionsCache::new(),
        }
    }

    /// Also report the virtual tables kept in `storage`.
    pub fn with_storage(mut self, storage: Arc<dyn VirtualTableStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn request_reload(&self) {
        self.cache.request_reload();
    }

    async fn read_tables(&self) -> Result<BTreeMap<String, DiscoveredTable>> {
        let database = quote_string(self.client.database());
        let columns: Vec<ColumnRow> = self
            .client
            .query_rows(&format!(
                "SELECT table, name, type, comment FROM system.columns WHERE database = {}",
                database
            ))
            .await?;
        let tables: Vec<TableRow> = self
            .client
            .query_rows(&format!(
                "SELECT name, comment, create_table_query FROM system.tables WHERE database = {}",
                database
            ))
            .await?;
        Ok(assemble_tables(columns, tables))
    }
}

#[async_trait]
impl TableDiscovery for ClickhouseTableDiscovery {
    async fn reload_table_definitions(&self) -> gantry::Result<()> {
        let started = Instant::now();
        let mut tables = self
            .read_tables()
            .await
            .map_err(|e| gantry::Error::Discovery(e.to_string()))?;
        if let Some(storage) = &self.storage {
            read_virtual_tables(storage.as_ref(), &mut tables).await;
        }
        tracing::debug!(
            "discovered {} tables in {:?}",
            tables.len(),
            started.elapsed()
        );
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
        "clickhouse"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clickhouse::parse_json_each_row;
    use gantry::config::ClickhouseConfig;

    #[test]
    fn test_assemble_tables() {
        let columns: Vec<ColumnRow> = parse_json_each_row(concat!(
            r#"{"table":"logs","name":"message","type":"Nullable(String)","comment":"quesmaMetadataV1:fieldName=message"}"#,
            "\n",
            r#"{"table":"logs","name":"@timestamp","type":"DateTime64(3)","comment":""}"#,
            "\n",
            r#"{"table":"metrics","name":"value","type":"Float64"}"#,
        ))
        .unwrap();
        let tables: Vec<TableRow> = parse_json_each_row(concat!(
            r#"{"name":"logs","comment":"created by gantry","create_table_query":"CREATE TABLE default.logs ..."}"#,
            "\n",
            r#"{"name":"empty_view","comment":"","create_table_query":""}"#,
        ))
        .unwrap();

        let discovered = assemble_tables(columns, tables);
        assert_eq!(discovered.keys().collect::<Vec<_>>(), vec!["logs", "metrics"]);

        let logs = &discovered["logs"];
        assert!(!logs.is_virtual);
        assert_eq!(logs.comment, "created by gantry");
        assert_eq!(logs.columns.len(), 2);
        assert_eq!(
            logs.columns["message"].comment,
            "quesmaMetadataV1:fieldName=message"
        );
        assert_eq!(discovered["metrics"].columns["value"].column_type, "Float64");
        assert!(discovered["metrics"].create_table_query.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_database_keeps_empty_snapshot() {
        let client = ClickhouseClient::new(&ClickhouseConfig {
            url: "http://127.0.0.1:1".into(),
            ..Default::default()
        })
        .unwrap();
        let discovery = ClickhouseTableDiscovery::new(Arc::new(client));

        let err = discovery.reload_table_definitions().await.unwrap_err();
        assert!(matches!(err, gantry::Error::Discovery(_)));
        assert!(discovery.table_definitions().is_empty());
        assert!(discovery.last_reload_time().is_none());
    }
}
