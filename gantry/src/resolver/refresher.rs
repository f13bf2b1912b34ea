//! Periodic inventory refresh.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::{Inventory, TableResolver};
use crate::Result;

impl TableResolver {
    /// Re-read both inventories and swap them in.
    ///
    /// Network calls run without holding the resolver lock. A source that
    /// fails keeps its previous contents; the swap itself never fails.
    pub async fn refresh(&self) {
        let previous = self.inventory();

        let clickhouse = match self.discovery.reload_table_definitions().await {
            Ok(()) => {
                let tables = self.discovery.table_definitions();
                Inventory::from_sources(tables.values(), None).clickhouse
            }
            Err(e) => {
                tracing::warn!(
                    "table discovery ({}) failed, keeping previous inventory: {}",
                    self.discovery.backend_name(),
                    e
                );
                metrics::counter!("gantry_inventory_refresh_errors_total", "source" => "clickhouse")
                    .increment(1);
                previous.clickhouse.clone()
            }
        };

        let elastic = match self.elastic.resolve("*").await {
            Ok(Some(resolved)) => resolved.names().cloned().collect(),
            Ok(None) => Default::default(),
            Err(e) => {
                tracing::warn!(
                    "elasticsearch index listing ({}) failed, keeping previous inventory: {}",
                    self.elastic.backend_name(),
                    e
                );
                metrics::counter!("gantry_inventory_refresh_errors_total", "source" => "elasticsearch")
                    .increment(1);
                previous.elastic.clone()
            }
        };

        let inventory = Inventory { clickhouse, elastic };
        tracing::debug!(
            "inventory refreshed: {} clickhouse tables, {} elasticsearch indices",
            inventory.clickhouse.len(),
            inventory.elastic.len()
        );
        metrics::gauge!("gantry_inventory_clickhouse_tables")
            .set(inventory.clickhouse.len() as f64);
        metrics::gauge!("gantry_inventory_elastic_indices").set(inventory.elastic.len() as f64);
        self.swap_inventory(inventory);
    }

    /// Run the refresh loop until [`TableResolver::stop`] is called.
    ///
    /// Also refreshes whenever the discovery requests a forced reload. A
    /// stopped resolver stays stopped: later calls return immediately.
    pub async fn start(&self) -> Result<()> {
        tracing::info!(
            "table resolver started (refresh interval: {:?})",
            self.refresh_interval
        );

        let mut ticker = interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_rx.clone();
        if *shutdown_rx.borrow_and_update() {
            tracing::info!("table resolver already stopped");
            return Ok(());
        }
        let mut force_reload = self.discovery.subscribe_force_reload();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh().await;
                }
                changed = async {
                    match force_reload.as_mut() {
                        Some(rx) => rx.changed().await,
                        None => std::future::pending().await,
                    }
                } => {
                    if changed.is_err() {
                        force_reload = None;
                        continue;
                    }
                    tracing::info!("forced inventory reload");
                    self.refresh().await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("table resolver shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Run [`TableResolver::start`] on the tokio runtime.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.start().await })
    }

    /// Signal the refresh loop to stop
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::discovery::{DiscoveredTable, FixedElasticIndexes, StaticTableDiscovery};
    use crate::resolver::{ConnectorDecision, Pipeline};
    use std::time::Duration;

    #[tokio::test]
    async fn test_refresh_swaps_both_inventories() {
        let discovery = Arc::new(StaticTableDiscovery::new(vec![]));
        let elastic = Arc::new(FixedElasticIndexes::new(&["legacy"]));
        let resolver = TableResolver::new(&GatewayConfig::default(), discovery.clone(), elastic);

        discovery.add_table(DiscoveredTable::physical("logs"));
        resolver.refresh().await;

        let inventory = resolver.inventory();
        assert!(inventory.is_physical_table("logs"));
        assert!(inventory.elastic.contains("legacy"));
    }

    #[tokio::test]
    async fn test_failed_source_keeps_previous_part() {
        let discovery = Arc::new(StaticTableDiscovery::new(vec![DiscoveredTable::physical(
            "logs",
        )]));
        let elastic = Arc::new(FixedElasticIndexes::new(&["legacy"]));
        let resolver =
            TableResolver::new(&GatewayConfig::default(), discovery.clone(), elastic.clone());
        resolver.refresh().await;

        discovery.set_failure(Some("connection refused"));
        elastic.set(Default::default());
        resolver.refresh().await;

        let inventory = resolver.inventory();
        assert!(inventory.is_physical_table("logs"));
        assert!(inventory.elastic.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_refreshes_and_stops() {
        let mut config = GatewayConfig::default();
        config.resolver.refresh_interval_secs = 1;
        config.resolver.autodiscovery = true;
        let discovery = Arc::new(StaticTableDiscovery::new(vec![]));
        let resolver = Arc::new(TableResolver::new(
            &config,
            discovery.clone(),
            Arc::new(FixedElasticIndexes::default()),
        ));
        let handle = resolver.clone().spawn();

        assert_eq!(
            resolver.resolve(Pipeline::Query, "logs").use_connectors,
            vec![ConnectorDecision::elastic()]
        );
        discovery.add_table(DiscoveredTable::physical("logs"));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(
            resolver.resolve(Pipeline::Query, "logs").use_connectors,
            vec![ConnectorDecision::clickhouse("logs", "logs")]
        );

        resolver.stop();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_start_after_stop_returns_without_refreshing() {
        let discovery = Arc::new(StaticTableDiscovery::new(vec![]));
        let resolver = TableResolver::new(
            &GatewayConfig::default(),
            discovery.clone(),
            Arc::new(FixedElasticIndexes::default()),
        );
        resolver.stop();
        discovery.add_table(DiscoveredTable::physical("logs"));

        tokio::time::timeout(Duration::from_secs(1), resolver.start())
            .await
            .unwrap()
            .unwrap();
        assert!(!resolver.inventory().is_physical_table("logs"));
    }

    #[tokio::test]
    async fn test_force_reload_triggers_refresh() {
        let mut config = GatewayConfig::default();
        config.resolver.refresh_interval_secs = 3600;
        let discovery = Arc::new(StaticTableDiscovery::new(vec![]));
        let resolver = Arc::new(TableResolver::new(
            &config,
            discovery.clone(),
            Arc::new(FixedElasticIndexes::default()),
        ));
        let handle = resolver.clone().spawn();
        // let the first tick run
        tokio::time::sleep(Duration::from_millis(50)).await;

        discovery.add_table(DiscoveredTable::physical("late"));
        discovery.request_reload();

        let mut seen = false;
        for _ in 0..100 {
            if resolver.inventory().is_physical_table("late") {
                seen = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(seen);

        resolver.stop();
        handle.await.unwrap().unwrap();
    }
}
