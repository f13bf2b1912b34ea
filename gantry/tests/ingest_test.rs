//! Ingest through `IngestProcessor` against a recording executor.

use std::collections::BTreeSet;
use std::sync::Arc;

use gantry::config::IndexConfig;
use gantry::discovery::{DiscoveredTable, FixedElasticIndexes, StaticTableDiscovery, TableDiscovery};
use gantry::ingest::{Document, RecordingExecutor};
use gantry::schema::StaticSchemaRegistry;
use gantry::{GatewayConfig, IngestBackends, IngestProcessor, TableResolver};
use gantry_storage::MemoryStorage;
use proptest::prelude::*;
use serde_json::{json, Value};

// ── Helpers ────────────────────────────────────────────────────────────────

fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

fn processor(
    config: GatewayConfig,
    tables: Vec<DiscoveredTable>,
) -> (IngestProcessor, Arc<RecordingExecutor>) {
    let config = Arc::new(config);
    let discovery: Arc<dyn TableDiscovery> = Arc::new(StaticTableDiscovery::new(tables));
    let resolver = Arc::new(TableResolver::new(
        &config,
        discovery.clone(),
        Arc::new(FixedElasticIndexes::default()),
    ));
    let executor = Arc::new(RecordingExecutor::new());
    let processor = IngestProcessor::new(
        config.clone(),
        resolver,
        IngestBackends {
            discovery,
            executor: executor.clone(),
            registry: Arc::new(StaticSchemaRegistry::from_config(&config)),
            storage: Arc::new(MemoryStorage::new()),
        },
    );
    (processor, executor)
}

fn config_for(index: &str) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config
        .indexes
        .insert(index.to_string(), IndexConfig::with_targets(&["clickhouse"]));
    config
}

fn column_names(processor: &IngestProcessor, table: &str) -> BTreeSet<String> {
    processor
        .tables()
        .get(table)
        .map(|t| t.columns().keys().cloned().collect())
        .unwrap_or_default()
}

// ── Table creation ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_create_table_from_first_document() {
    let (processor, executor) = processor(config_for("events"), vec![]);
    processor
        .ingest("events", vec![doc(json!({"a": "b"}))])
        .await
        .unwrap();

    let sql = executor.sql();
    assert_eq!(sql.len(), 2, "{:?}", sql);
    let create = &sql[0];
    assert!(create.starts_with(r#"CREATE TABLE IF NOT EXISTS "events""#));
    assert!(create.contains(r#""a" Nullable(String)"#), "{}", create);
    assert!(
        create.contains(r#""@timestamp" DateTime64(3) DEFAULT now64()"#),
        "{}",
        create
    );
    assert_eq!(
        sql[1],
        r#"INSERT INTO "events" FORMAT JSONEachRow {"a":"b"}"#
    );
}

#[tokio::test]
async fn test_timestamp_without_default() {
    let mut config = config_for("events");
    config.ingest.timestamp_defaults_now = false;
    let (processor, executor) = processor(config, vec![]);
    processor
        .ingest("events", vec![doc(json!({"a": "b"}))])
        .await
        .unwrap();

    let create = &executor.sql()[0];
    assert!(create.contains(r#""@timestamp" DateTime64(3)"#));
    assert!(!create.contains("now64()"));
}

#[tokio::test]
async fn test_reingest_known_fields_emits_no_alters() {
    let (processor, executor) = processor(config_for("events"), vec![]);
    processor
        .ingest("events", vec![doc(json!({"a": "b", "n": 1}))])
        .await
        .unwrap();
    executor.clear();

    processor
        .ingest("events", vec![doc(json!({"a": "c", "n": 2}))])
        .await
        .unwrap();
    let sql = executor.sql();
    assert_eq!(sql.len(), 1);
    assert!(sql[0].starts_with("INSERT INTO"));
}

#[tokio::test]
async fn test_batch_is_one_insert() {
    let (processor, executor) = processor(config_for("events"), vec![]);
    processor
        .ingest(
            "events",
            vec![doc(json!({"a": "1"})), doc(json!({"a": "2"})), doc(json!({"a": "3"}))],
        )
        .await
        .unwrap();
    let inserts: Vec<String> = executor
        .sql()
        .into_iter()
        .filter(|s| s.starts_with("INSERT"))
        .collect();
    assert_eq!(
        inserts,
        vec![
            r#"INSERT INTO "events" FORMAT JSONEachRow {"a":"1"}, {"a":"2"}, {"a":"3"}"#.to_string()
        ]
    );
}

#[tokio::test]
async fn test_nested_objects_are_flattened() {
    let (processor, executor) = processor(config_for("events"), vec![]);
    processor
        .ingest("events", vec![doc(json!({"host": {"name": "web-1", "ip": "10.0.0.1"}}))])
        .await
        .unwrap();

    let columns = column_names(&processor, "events");
    assert!(columns.contains("host_name"));
    assert!(columns.contains("host_ip"));
    assert!(executor
        .sql()
        .last()
        .unwrap()
        .contains(r#""host_name":"web-1""#));
}

// ── Validation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_mismatched_value_rerouted_to_attributes() {
    let (processor, executor) = processor(config_for("events"), vec![]);
    processor
        .ingest("events", vec![doc(json!({"n": 1}))])
        .await
        .unwrap();
    executor.clear();

    processor
        .ingest("events", vec![doc(json!({"n": "not a number", "a": "x"}))])
        .await
        .unwrap();

    let sql = executor.sql();
    let insert = sql.last().unwrap();
    assert!(
        insert.contains(r#""attributes_values":{"n":"not a number"}"#),
        "{}",
        insert
    );
    assert!(!insert.contains(r#""n":"not a number","#));
    // the column keeps its type
    let table = processor.tables().get("events").unwrap();
    assert_eq!(
        table.column("n").unwrap().column_type.to_string(),
        "Nullable(Int64)"
    );
}

// ── Discovered tables ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_table_discovered_later_is_used() {
    let config = Arc::new(config_for("events"));
    let discovery = Arc::new(StaticTableDiscovery::new(vec![]));
    let resolver = Arc::new(TableResolver::new(
        &config,
        discovery.clone(),
        Arc::new(FixedElasticIndexes::default()),
    ));
    let executor = Arc::new(RecordingExecutor::new());
    let processor = IngestProcessor::new(
        config.clone(),
        resolver,
        IngestBackends {
            discovery: discovery.clone(),
            executor: executor.clone(),
            registry: Arc::new(StaticSchemaRegistry::from_config(&config)),
            storage: Arc::new(MemoryStorage::new()),
        },
    );

    discovery.add_table(
        DiscoveredTable::physical("events")
            .with_column("a", "Nullable(String)")
            .with_column("attributes_values", "Map(String, String)")
            .with_column("attributes_metadata", "Map(String, String)"),
    );
    assert_eq!(processor.reload_tables().await.unwrap(), 1);

    processor
        .ingest("events", vec![doc(json!({"a": "b"}))])
        .await
        .unwrap();
    assert_eq!(
        executor.sql(),
        vec![r#"INSERT INTO "events" FORMAT JSONEachRow {"a":"b"}"#.to_string()]
    );
}

// ── Properties ─────────────────────────────────────────────────────────────

fn field_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i32>().prop_map(|n| json!(n)),
        "[a-z]{0,6}".prop_map(|s| json!(s)),
        any::<bool>().prop_map(|b| json!(b)),
        Just(Value::Null),
    ]
}

fn document() -> impl Strategy<Value = Document> {
    prop::collection::btree_map("[a-e]", field_value(), 1..4)
        .prop_map(|fields| fields.into_iter().collect::<Document>())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_columns_only_grow(batches in prop::collection::vec(document(), 1..8)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (processor, _) = processor(config_for("events"), vec![]);
            let mut previous = BTreeSet::new();
            for batch in batches {
                processor.ingest("events", vec![batch]).await.unwrap();
                let current = column_names(&processor, "events");
                assert!(current.is_superset(&previous));
                previous = current;
            }
        });
    }
}
