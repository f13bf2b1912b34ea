use anyhow::Result;

use crate::backends::Services;

/// Print the routing decision for `pattern` as JSON.
pub async fn run_resolve(services: &Services, pipeline: &str, pattern: &str) -> Result<()> {
    services.resolver.refresh().await;
    let decision = services.resolver.resolve_named(pipeline, pattern);
    println!("{}", serde_json::to_string_pretty(&decision)?);
    if let Some(err) = &decision.err {
        tracing::warn!("[{}] does not resolve: {}", pattern, err);
    }
    Ok(())
}
