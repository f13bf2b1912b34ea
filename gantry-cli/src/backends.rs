//! Wiring of the gantry services for one CLI invocation.

use anyhow::{Context, Result};
use std::sync::Arc;

use gantry::discovery::{
    DiscoveredTable, ElasticIndexResolver, FixedElasticIndexes, StaticTableDiscovery,
    TableDiscovery,
};
use gantry::ingest::{BackendExecutor, RecordingExecutor};
use gantry::schema::StaticSchemaRegistry;
use gantry::{GatewayConfig, IngestBackends, IngestProcessor, TableResolver};
use gantry_connectors::{ClickhouseClient, ClickhouseTableDiscovery, ElasticClient};
use gantry_storage::{LocalStorage, MemoryStorage, VirtualTableStorage};

pub struct Services {
    pub config: Arc<GatewayConfig>,
    pub discovery: Arc<dyn TableDiscovery>,
    pub executor: Arc<dyn BackendExecutor>,
    pub storage: Arc<dyn VirtualTableStorage>,
    pub resolver: Arc<TableResolver>,
    /// Set when statements are recorded instead of executed
    pub recorder: Option<Arc<RecordingExecutor>>,
}

impl Services {
    fn new(
        config: GatewayConfig,
        discovery: Arc<dyn TableDiscovery>,
        elastic: Arc<dyn ElasticIndexResolver>,
        executor: Arc<dyn BackendExecutor>,
        storage: Arc<dyn VirtualTableStorage>,
    ) -> Self {
        let config = Arc::new(config);
        let resolver = Arc::new(TableResolver::new(&config, discovery.clone(), elastic));
        Self {
            config,
            discovery,
            executor,
            storage,
            resolver,
            recorder: None,
        }
    }

    pub fn ingest_processor(&self) -> IngestProcessor {
        IngestProcessor::new(
            self.config.clone(),
            self.resolver.clone(),
            IngestBackends {
                discovery: self.discovery.clone(),
                executor: self.executor.clone(),
                registry: Arc::new(StaticSchemaRegistry::from_config(&self.config)),
                storage: self.storage.clone(),
            },
        )
    }
}

/// In-memory backends: the given tables and indices, statements recorded.
pub fn offline(config: GatewayConfig, tables: &[String], elastic_indexes: &[String]) -> Services {
    let discovery = Arc::new(StaticTableDiscovery::new(
        tables.iter().map(DiscoveredTable::physical),
    ));
    let names: Vec<&str> = elastic_indexes.iter().map(String::as_str).collect();
    let elastic = Arc::new(FixedElasticIndexes::new(&names));
    let recorder = Arc::new(RecordingExecutor::new());

    let mut services = Services::new(
        config,
        discovery,
        elastic,
        recorder.clone(),
        Arc::new(MemoryStorage::new()),
    );
    services.recorder = Some(recorder);
    services
}

/// Backends from the configuration: ClickHouse over HTTP, Elasticsearch when
/// a URL is set, virtual tables on local disk.
pub fn connected(config: GatewayConfig) -> Result<Services> {
    let storage: Arc<dyn VirtualTableStorage> =
        Arc::new(LocalStorage::new(&config.storage.virtual_tables_dir));
    let clickhouse = Arc::new(
        ClickhouseClient::new(&config.clickhouse).context("invalid ClickHouse configuration")?,
    );
    let discovery =
        Arc::new(ClickhouseTableDiscovery::new(clickhouse.clone()).with_storage(storage.clone()));

    let elastic: Arc<dyn ElasticIndexResolver> =
        match ElasticClient::from_config(&config.elasticsearch)
            .context("invalid Elasticsearch configuration")?
        {
            Some(client) => Arc::new(client),
            None => {
                tracing::info!("no Elasticsearch configured, its inventory stays empty");
                Arc::new(FixedElasticIndexes::default())
            }
        };

    Ok(Services::new(config, discovery, elastic, clickhouse, storage))
}
