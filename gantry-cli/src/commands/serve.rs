use anyhow::Result;

use crate::backends::Services;

/// Run the inventory refresh loop until Ctrl-C.
pub async fn run_serve(services: &Services) -> Result<()> {
    let handle = services.resolver.clone().spawn();

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupted, stopping");
    services.resolver.stop();
    handle.await??;

    let inventory = services.resolver.inventory();
    tracing::info!(
        "final inventory: {} clickhouse tables, {} elasticsearch indices",
        inventory.clickhouse.len(),
        inventory.elastic.len()
    );
    Ok(())
}
