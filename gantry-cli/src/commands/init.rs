use anyhow::{bail, Result};
use std::path::Path;

use gantry::GatewayConfig;

/// Write the default configuration to `path`.
pub fn run_init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists, pass --force to overwrite it",
            path.display()
        );
    }
    GatewayConfig::default().save(path)?;
    tracing::info!("wrote default configuration to {}", path.display());
    Ok(())
}
