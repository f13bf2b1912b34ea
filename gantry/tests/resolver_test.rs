//! End-to-end routing through `TableResolver`: pattern splitting, the rule
//! ladders, merging and inventory refresh.

use std::sync::Arc;

use gantry::config::IndexConfig;
use gantry::discovery::{DiscoveredTable, FixedElasticIndexes, StaticTableDiscovery};
use gantry::{ConnectorDecision, GatewayConfig, Pipeline, TableResolver};
use proptest::prelude::*;

// ── Helpers ────────────────────────────────────────────────────────────────

fn resolver_with(
    config: GatewayConfig,
    tables: Vec<DiscoveredTable>,
    elastic: &[&str],
) -> TableResolver {
    TableResolver::new(
        &config,
        Arc::new(StaticTableDiscovery::new(tables)),
        Arc::new(FixedElasticIndexes::new(elastic)),
    )
}

fn clickhouse_index(config: &mut GatewayConfig, name: &str) {
    config
        .indexes
        .insert(name.to_string(), IndexConfig::with_targets(&["clickhouse"]));
}

// ── Dual-written indexes ───────────────────────────────────────────────────

#[tokio::test]
async fn test_dual_written_index_matches_wildcard_like_concrete_name() {
    let mut config = GatewayConfig::default();
    config.indexes.insert(
        "logs".to_string(),
        IndexConfig::with_targets(&["clickhouse", "elasticsearch"]),
    );
    let resolver = resolver_with(config, vec![DiscoveredTable::physical("logs")], &["logs"]);
    resolver.refresh().await;

    let concrete = resolver.resolve(Pipeline::Query, "logs");
    let wildcard = resolver.resolve(Pipeline::Query, "log*");
    assert!(wildcard.err.is_none(), "{:?}", wildcard.err);
    assert_eq!(
        wildcard.use_connectors,
        vec![ConnectorDecision::clickhouse("logs", "logs")]
    );
    assert_eq!(wildcard.use_connectors, concrete.use_connectors);
}

// ── Empty inventories ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_wildcard_with_no_indexes_is_empty() {
    let resolver = resolver_with(GatewayConfig::default(), vec![], &[]);
    resolver.refresh().await;

    let decision = resolver.resolve(Pipeline::Query, "*");
    assert!(decision.is_empty);
    assert!(decision.err.is_none());
    assert!(decision.use_connectors.is_empty());
}

// ── Mixed backends ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_pattern_spanning_both_backends_is_an_error() {
    let mut config = GatewayConfig::default();
    clickhouse_index(&mut config, "b1");
    let resolver = resolver_with(config, vec![DiscoveredTable::physical("b1")], &["a1"]);
    resolver.refresh().await;

    assert_eq!(
        resolver.resolve(Pipeline::Query, "a*").use_connectors,
        vec![ConnectorDecision::elastic()]
    );
    assert_eq!(
        resolver.resolve(Pipeline::Query, "b*").use_connectors,
        vec![ConnectorDecision::clickhouse("b1", "b1")]
    );

    let decision = resolver.resolve(Pipeline::Query, "a*,b*");
    assert!(decision.err.is_some(), "expected an error, got {}", decision);
}

#[tokio::test]
async fn test_ingest_rejects_patterns() {
    let resolver = resolver_with(GatewayConfig::default(), vec![], &[]);
    let decision = resolver.resolve(Pipeline::Ingest, "logs-*");
    assert!(decision.err.is_some());
}

// ── Configured indexes ─────────────────────────────────────────────────────

#[test]
fn test_closed_index() {
    let mut config = GatewayConfig::default();
    config.indexes.insert("old".into(), IndexConfig::disabled());
    let resolver = resolver_with(config, vec![], &[]);

    for pipeline in Pipeline::ALL {
        assert!(resolver.resolve(pipeline, "old").is_closed);
    }
}

#[test]
fn test_common_table_indexes_merge_into_one_connector() {
    let mut config = GatewayConfig::default();
    config.indexes.insert("audit".into(), IndexConfig::common_table());
    config.indexes.insert("access".into(), IndexConfig::common_table());
    let resolver = resolver_with(
        config,
        vec![
            DiscoveredTable::virtual_table("audit"),
            DiscoveredTable::virtual_table("access"),
        ],
        &[],
    );

    let ingest = resolver.resolve(Pipeline::Ingest, "audit");
    assert_eq!(
        ingest.use_connectors,
        vec![ConnectorDecision::common_table(vec!["audit".into()])]
    );

    let query = resolver.resolve(Pipeline::Query, "audit,access");
    assert!(query.err.is_none(), "{}", query);
    match query.clickhouse() {
        Some(ConnectorDecision::Clickhouse {
            indexes,
            is_common_table,
            ..
        }) => {
            assert!(*is_common_table);
            let mut sorted = indexes.clone();
            sorted.sort();
            assert_eq!(sorted, vec!["access".to_string(), "audit".to_string()]);
        }
        other => panic!("expected a common table connector, got {:?}", other),
    }
}

#[test]
fn test_internal_indexes_never_reach_clickhouse() {
    let mut config = GatewayConfig::default();
    config.resolver.default_query_target = vec!["clickhouse".into()];
    let resolver = resolver_with(config, vec![], &[]);

    let decision = resolver.resolve(Pipeline::Query, ".kibana");
    assert_eq!(
        decision.use_connectors,
        vec![ConnectorDecision::Elastic {
            management_call: true
        }]
    );
}

// ── Refresh ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_refresh_changes_decisions() {
    let mut config = GatewayConfig::default();
    clickhouse_index(&mut config, "logs");
    let discovery = Arc::new(StaticTableDiscovery::new(vec![]));
    let resolver = TableResolver::new(
        &config,
        discovery.clone(),
        Arc::new(FixedElasticIndexes::default()),
    );

    assert!(resolver.resolve(Pipeline::Query, "lo*").is_empty);

    discovery.add_table(DiscoveredTable::physical("logs"));
    resolver.refresh().await;
    assert_eq!(
        resolver.resolve(Pipeline::Query, "lo*").use_connectors,
        vec![ConnectorDecision::clickhouse("logs", "logs")]
    );
    assert!(resolver
        .recent_decisions()
        .iter()
        .any(|d| d.pattern == "lo*"));
}

// ── Determinism ────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn prop_resolution_is_deterministic(
        pattern in "[a-c]{1,3}\\*?(,[a-c]{1,3}\\*?)?",
        clickhouse_query in any::<bool>(),
    ) {
        let mut config = GatewayConfig::default();
        clickhouse_index(&mut config, "ab");
        if clickhouse_query {
            config.resolver.default_query_target = vec!["clickhouse".into()];
        }
        let tables = vec![DiscoveredTable::physical("ab"), DiscoveredTable::physical("ca")];

        let first = resolver_with(config.clone(), tables.clone(), &["bb", "cc"]);
        let second = resolver_with(config, tables, &["bb", "cc"]);
        for pipeline in Pipeline::ALL {
            let a = first.resolve(pipeline, &pattern);
            let b = second.resolve(pipeline, &pattern);
            // cached and fresh answers agree
            prop_assert_eq!(&a, &first.resolve(pipeline, &pattern));
            prop_assert_eq!(a.use_connectors, b.use_connectors);
            prop_assert_eq!(a.is_empty, b.is_empty);
            prop_assert_eq!(a.is_closed, b.is_closed);
            prop_assert_eq!(a.err.is_some(), b.err.is_some());
        }
    }
}
