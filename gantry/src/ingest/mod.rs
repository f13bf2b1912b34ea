//! Ingest processor
//!
//! Turns batches of JSON documents into ClickHouse statements:
//!
//! ```text
//! documents ──► rewrite arrays ──► flatten ──► encode names ──► transformer
//!                                                                  │
//!        ┌───────────── unknown table: CREATE from first document ◄┘
//!        ▼
//!   validate ──► lower (ALTER for promoted fields, attribute maps) ──► execute
//! ```
//!
//! Routing comes from the [`TableResolver`] ingest pipeline. Indexes stored in
//! the common table are processed twice: once against their own virtual
//! schema (statements discarded, snapshot persisted) and once against the
//! shared table.

pub mod attributes;
pub mod columns;
pub mod ddl;
pub mod evolution;
pub mod executor;
pub mod index_name;
pub mod lowerer;
pub mod transform;
pub mod validator;

pub use ddl::{AlterStatement, CreateTableStatement, InsertStatement, Statement};
pub use evolution::{EvolutionPolicy, FieldStatistics};
pub use executor::{
    insert_settings, BackendExecutor, QuerySettings, RecordedStatement, RecordingExecutor,
    StatementRunner,
};
pub use index_name::validate_index_name;
pub use lowerer::SqlLowerer;
pub use transform::{
    ColumnNameFormatter, DefaultColumnNameFormatter, Document, IngestTransformer, PassThrough,
    TransformerChain,
};

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::common_table::{self, store_virtual_table, AddIndexNameTransformer};
use crate::config::GatewayConfig;
use crate::discovery::{DiscoveredTable, TableDefinitions, TableDiscovery};
use crate::resolver::{ConnectorDecision, Pipeline, TableResolver};
use crate::schema::{
    FieldSource, SchemaRegistry, Table, TableConfig, TableMap, ATTRIBUTES_VALUES_COLUMN,
};
use crate::{Error, Result};
use gantry_storage::VirtualTableStorage;

/// Collaborators of an [`IngestProcessor`].
pub struct IngestBackends {
    pub discovery: Arc<dyn TableDiscovery>,
    pub executor: Arc<dyn BackendExecutor>,
    pub registry: Arc<dyn SchemaRegistry>,
    pub storage: Arc<dyn VirtualTableStorage>,
}

pub struct IngestProcessor {
    config: Arc<GatewayConfig>,
    tables: TableMap,
    resolver: Arc<TableResolver>,
    discovery: Arc<dyn TableDiscovery>,
    registry: Arc<dyn SchemaRegistry>,
    storage: Arc<dyn VirtualTableStorage>,
    lowerer: SqlLowerer,
    runner: StatementRunner,
    default_transformer: Arc<dyn IngestTransformer>,
}

impl IngestProcessor {
    pub fn new(
        config: Arc<GatewayConfig>,
        resolver: Arc<TableResolver>,
        backends: IngestBackends,
    ) -> Self {
        let statistics = FieldStatistics::new(EvolutionPolicy::from_config(&config.ingest));
        let processor = Self {
            tables: TableMap::new(),
            resolver,
            lowerer: SqlLowerer::new(statistics, backends.storage.clone()),
            runner: StatementRunner::new(backends.executor, config.ingest.sql_tracing),
            discovery: backends.discovery,
            registry: backends.registry,
            storage: backends.storage,
            default_transformer: Arc::new(PassThrough),
            config,
        };
        let registered = processor.sync_tables_from(&processor.discovery.table_definitions());
        tracing::debug!("ingest processor started with {} known tables", registered);
        processor
    }

    /// Transformer applied by [`IngestProcessor::ingest`].
    pub fn with_transformer(mut self, transformer: Arc<dyn IngestTransformer>) -> Self {
        self.default_transformer = transformer;
        self
    }

    pub fn tables(&self) -> &TableMap {
        &self.tables
    }

    pub fn statistics(&self) -> &FieldStatistics {
        self.lowerer.statistics()
    }

    /// Register tables found by discovery that are not known yet.
    pub fn sync_tables_from(&self, definitions: &TableDefinitions) -> usize {
        let mut registered = 0;
        for discovered in definitions.values() {
            let table = Table::from_discovered(discovered, self.discovered_config(discovered));
            if self.tables.insert_if_absent(table).1 {
                registered += 1;
            }
        }
        registered
    }

    /// Reload discovery and register any new tables.
    pub async fn reload_tables(&self) -> Result<usize> {
        self.discovery.reload_table_definitions().await?;
        Ok(self.sync_tables_from(&self.discovery.table_definitions()))
    }

    fn discovered_config(&self, discovered: &DiscoveredTable) -> TableConfig {
        let cluster = self.config.ingest.cluster_name.clone();
        if discovered.is_virtual || discovered.columns.contains_key(ATTRIBUTES_VALUES_COLUMN) {
            TableConfig::only_schema_fields(cluster)
        } else {
            TableConfig {
                cluster_name: cluster,
                ..TableConfig::no_attributes()
            }
        }
    }

    /// Registered table, falling back to the discovery snapshot.
    pub fn find_table(&self, name: &str) -> Option<Arc<Table>> {
        if let Some(table) = self.tables.get(name) {
            return Some(table);
        }
        let definitions = self.discovery.table_definitions();
        let discovered = definitions.get(name)?;
        let table = Table::from_discovered(discovered, self.discovered_config(discovered));
        Some(self.tables.insert_if_absent(table).0)
    }

    /// Register a table unless one with that name is known.
    pub fn register_table(&self, table: Table) -> Arc<Table> {
        self.tables.insert_if_absent(table).0
    }

    /// The shared table, registered from its definition when first needed.
    pub fn ensure_common_table(&self) -> Arc<Table> {
        match self.find_table(common_table::TABLE_NAME) {
            Some(table) => table,
            None => self.register_table(common_table::table_definition(
                self.config.ingest.cluster_name.clone(),
            )),
        }
    }

    /// Ingest documents into an index with the default transformer and
    /// column name formatter.
    pub async fn ingest(&self, index_name: &str, documents: Vec<Document>) -> Result<()> {
        validate_index_name(index_name)?;
        let formatter = DefaultColumnNameFormatter::new(&self.config.ingest.nested_separator);
        self.process_insert_query(
            index_name,
            documents,
            self.default_transformer.clone(),
            &formatter,
        )
        .await
    }

    /// Route documents of `table_name` through the ingest pipeline and
    /// execute the resulting statements.
    pub async fn process_insert_query(
        &self,
        table_name: &str,
        documents: Vec<Document>,
        transformer: Arc<dyn IngestTransformer>,
        formatter: &dyn ColumnNameFormatter,
    ) -> Result<()> {
        let decision = self.resolver.resolve(Pipeline::Ingest, table_name);
        if let Some(err) = decision.err {
            return Err(err.into());
        }
        if decision.is_empty {
            return Err(Error::TableNotFound(table_name.to_string()));
        }
        if decision.is_closed {
            return Err(Error::TableClosed(table_name.to_string()));
        }

        metrics::counter!("gantry_ingest_documents_total").increment(documents.len() as u64);

        for connector in &decision.use_connectors {
            match connector {
                ConnectorDecision::Elastic { .. } => {
                    tracing::debug!("skipping elasticsearch connector for [{}]", table_name);
                }
                ConnectorDecision::Clickhouse {
                    is_common_table: true,
                    ..
                } => {
                    let virtual_pass = self
                        .process_insert_query_internal(
                            table_name,
                            documents.clone(),
                            transformer.as_ref(),
                            formatter,
                            true,
                        )
                        .await;
                    if let Err(e) = virtual_pass {
                        tracing::error!(
                            "error processing insert query - virtual table schema update: {}",
                            e
                        );
                    }

                    self.ensure_common_table();
                    let chain = TransformerChain::new()
                        .then(Arc::new(AddIndexNameTransformer::new(table_name)))
                        .then(transformer.clone());
                    self.process_insert_query_internal(
                        common_table::TABLE_NAME,
                        documents.clone(),
                        &chain,
                        formatter,
                        false,
                    )
                    .await
                    .inspect_err(|e| {
                        metrics::counter!("gantry_ingest_errors_total").increment(1);
                        tracing::error!("error processing insert query to a common table: {}", e);
                    })?;
                }
                ConnectorDecision::Clickhouse {
                    table_name: clickhouse_table,
                    ..
                } => {
                    self.process_insert_query_internal(
                        clickhouse_table,
                        documents.clone(),
                        transformer.as_ref(),
                        formatter,
                        false,
                    )
                    .await
                    .inspect_err(|e| {
                        metrics::counter!("gantry_ingest_errors_total").increment(1);
                        tracing::error!("error processing insert query: {}", e);
                    })?;
                }
            }
        }
        Ok(())
    }

    async fn process_insert_query_internal(
        &self,
        table_name: &str,
        documents: Vec<Document>,
        transformer: &dyn IngestTransformer,
        formatter: &dyn ColumnNameFormatter,
        definition_only: bool,
    ) -> Result<()> {
        let Some((table, statements)) = self
            .build_statements(table_name, documents, transformer, formatter, definition_only)
            .await?
        else {
            return Ok(());
        };

        for statement in statements.iter().filter(|s| s.is_ddl()) {
            if definition_only {
                tracing::debug!("VIRTUAL DDL EXECUTION: {}", statement);
            } else {
                tracing::info!("DDL EXECUTION: {}", statement);
            }
        }
        if definition_only {
            return Ok(());
        }

        let async_insert = self
            .config
            .index(table_name)
            .and_then(|index| index.async_insert)
            .unwrap_or(self.config.ingest.async_insert);
        if let Err(e) = self
            .runner
            .run(&statements, &insert_settings(async_insert))
            .await
        {
            let added: Vec<String> = statements
                .iter()
                .filter_map(|s| match s {
                    Statement::Alter(AlterStatement::AddColumn { column, .. }) => {
                        Some(column.clone())
                    }
                    _ => None,
                })
                .collect();
            let removed = table.remove_columns(&added);
            if removed > 0 {
                tracing::warn!(
                    "rolled back {} promoted columns of {} after a failed batch",
                    removed,
                    table.name
                );
            }
            return Err(e);
        }
        table.mark_created();
        Ok(())
    }

    /// Statements for one batch against `table_name`, `None` for an empty batch.
    async fn build_statements(
        &self,
        table_name: &str,
        documents: Vec<Document>,
        transformer: &dyn IngestTransformer,
        formatter: &dyn ColumnNameFormatter,
        definition_only: bool,
    ) -> Result<Option<(Arc<Table>, Vec<Statement>)>> {
        if documents.is_empty() {
            return Ok(None);
        }

        let documents: Vec<Document> = documents
            .into_iter()
            .map(transform::rewrite_array_of_objects)
            .map(|document| {
                if self.config.ingest.flatten_nested {
                    transform::flatten(document, formatter)
                } else {
                    document
                }
            })
            .collect();

        let encodings = transform::populate_field_encodings(&documents, table_name);
        self.registry.update_field_encodings(&encodings);

        let mut transformed = Vec::with_capacity(documents.len());
        for document in documents {
            let encoded = transform::encode_field_names(document);
            transformed.push(transformer.transform(encoded)?);
        }

        let (table, create) = match self.find_table(table_name) {
            Some(table) => {
                let create = (!table.is_created() && !table.virtual_table)
                    .then(|| CreateTableStatement::for_table(&table));
                (table, create)
            }
            None => {
                self.create_table(table_name, &transformed[0], formatter, definition_only)
                    .await
            }
        };

        let mut valid = Vec::with_capacity(transformed.len());
        let mut invalid = Vec::with_capacity(transformed.len());
        for document in transformed {
            let (fits, rejected) = validator::split_invalid(&table, document);
            if !rejected.is_empty() {
                tracing::debug!(
                    "{} fields of a document do not match the columns of {}",
                    rejected.len(),
                    table.name
                );
            }
            valid.push(fits);
            invalid.push(rejected);
        }

        let statements = self
            .lowerer
            .lower_to_ddl(&table, create, valid, &invalid, &encodings)
            .await?;
        Ok(Some((table, statements)))
    }

    /// Register a table shaped after `first` and build its CREATE statement.
    async fn create_table(
        &self,
        table_name: &str,
        first: &Document,
        formatter: &dyn ColumnNameFormatter,
        definition_only: bool,
    ) -> (Arc<Table>, Option<CreateTableStatement>) {
        let mut config = TableConfig::only_schema_fields(self.config.ingest.cluster_name.clone());
        config.timestamp_defaults_now = self.config.ingest.timestamp_defaults_now;
        config.partition_strategy = match self.config.index(table_name) {
            Some(index) => index.partitioning_strategy,
            None => self.config.ingest.default_partitioning_strategy,
        };

        let from_json = columns::json_to_columns(first, &config);
        let origins: BTreeMap<String, FieldSource> = from_json
            .iter()
            .map(|entry| (entry.column_name.clone(), FieldSource::Ingest))
            .collect();
        self.registry.update_fields_origins(table_name, origins);

        let encodings = self.registry.field_encodings();
        let schema = self.registry.find_schema(table_name);
        let from_schema =
            columns::schema_to_columns(schema.as_ref(), formatter, table_name, &encodings);
        let mut table_columns =
            columns::columns_to_properties(from_json, from_schema, &encodings, table_name);
        let framework = columns::framework_columns(&config, &table_columns);
        table_columns.extend(framework);

        let indexes: Vec<String> = first.keys().filter_map(|k| ddl::index_statement(k)).collect();
        let table = Table::new(table_name, config, table_columns)
            .as_virtual(definition_only)
            .with_indexes(indexes);

        let (table, inserted) = self.tables.insert_if_absent(table);
        if !inserted {
            let create = (!table.is_created() && !table.virtual_table)
                .then(|| CreateTableStatement::for_table(&table));
            return (table, create);
        }

        tracing::info!(
            "registered new {}table {} with {} columns",
            if definition_only { "virtual " } else { "" },
            table_name,
            table.column_count()
        );
        if table.virtual_table {
            if let Err(e) = store_virtual_table(&table, self.storage.as_ref()).await {
                tracing::error!("error storing virtual table {}: {}", table_name, e);
            }
            return (table, None);
        }
        let create = CreateTableStatement::for_table(&table);
        (table, Some(create))
    }
}
