//! Column promotion on wide tables: fields become columns only once they
//! show up often enough.

use std::sync::Arc;

use gantry::config::IndexConfig;
use gantry::discovery::{DiscoveredTable, FixedElasticIndexes, StaticTableDiscovery, TableDiscovery};
use gantry::ingest::{Document, RecordingExecutor};
use gantry::schema::StaticSchemaRegistry;
use gantry::{GatewayConfig, IngestBackends, IngestProcessor, TableResolver};
use gantry_storage::MemoryStorage;
use serde_json::{json, Value};

fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

/// A table past the always-add limit but below the upper limit.
fn wide_table(name: &str, columns: usize) -> DiscoveredTable {
    let mut table = DiscoveredTable::physical(name)
        .with_column("attributes_values", "Map(String, String)")
        .with_column("attributes_metadata", "Map(String, String)");
    for i in 0..columns {
        table = table.with_column(&format!("c{:03}", i), "Nullable(String)");
    }
    table
}

fn processor(
    config: GatewayConfig,
    table: DiscoveredTable,
) -> (IngestProcessor, Arc<RecordingExecutor>) {
    let config = Arc::new(config);
    let discovery: Arc<dyn TableDiscovery> = Arc::new(StaticTableDiscovery::new(vec![table]));
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

#[tokio::test]
async fn test_field_promoted_after_reaching_frequency() {
    let config = config_for("wide");
    let frequency = config.ingest.field_frequency;
    let (processor, executor) = processor(config, wide_table("wide", 120));

    for i in 1..frequency {
        processor
            .ingest("wide", vec![doc(json!({"c000": "a", "x": format!("v{}", i)}))])
            .await
            .unwrap();
        let sql = executor.sql();
        assert_eq!(sql.len(), 1, "occurrence {} should not alter: {:?}", i, sql);
        assert!(
            sql[0].contains(&format!(r#""attributes_values":{{"x":"v{}"}}"#, i)),
            "{}",
            sql[0]
        );
        executor.clear();
    }
    assert!(!processor.tables().get("wide").unwrap().has_column("x"));

    processor
        .ingest("wide", vec![doc(json!({"c000": "a", "x": "last"}))])
        .await
        .unwrap();
    let sql = executor.sql();
    assert_eq!(
        sql[0],
        r#"ALTER TABLE "wide" ADD COLUMN IF NOT EXISTS "x" Nullable(String)"#
    );
    assert!(sql[1].starts_with(r#"ALTER TABLE "wide" COMMENT COLUMN "x""#));
    assert_eq!(
        sql[2],
        r#"INSERT INTO "wide" FORMAT JSONEachRow {"c000":"a","x":"last"}"#
    );
    assert!(processor.tables().get("wide").unwrap().has_column("x"));
}

#[tokio::test]
async fn test_rare_fields_stay_in_attributes() {
    let (processor, executor) = processor(config_for("wide"), wide_table("wide", 120));
    for i in 0..20 {
        processor
            .ingest("wide", vec![doc(json!({format!("rare_{}", i): i}))])
            .await
            .unwrap();
    }
    assert!(executor.sql().iter().all(|s| s.starts_with("INSERT")));
    assert_eq!(processor.statistics().field_count("wide", "rare_0"), 1);
}

#[tokio::test]
async fn test_tables_past_upper_limit_never_alter() {
    let mut config = config_for("huge");
    config.ingest.alter_column_upper_limit = 150;
    let (processor, executor) = processor(config, wide_table("huge", 200));
    for _ in 0..30 {
        processor
            .ingest("huge", vec![doc(json!({"x": "v"}))])
            .await
            .unwrap();
    }
    assert!(executor.sql().iter().all(|s| s.starts_with("INSERT")));
    assert_eq!(processor.statistics().field_count("huge", "x"), 0);
}

#[tokio::test]
async fn test_small_tables_promote_immediately() {
    let (processor, executor) = processor(config_for("narrow"), wide_table("narrow", 3));
    processor
        .ingest("narrow", vec![doc(json!({"x": 1.5}))])
        .await
        .unwrap();
    assert_eq!(
        executor.sql()[0],
        r#"ALTER TABLE "narrow" ADD COLUMN IF NOT EXISTS "x" Nullable(Float64)"#
    );
}
