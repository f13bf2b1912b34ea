use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gantry::GatewayConfig;

mod backends;
mod commands;

#[derive(Parser, Debug)]
#[command(name = "gantry")]
#[command(about = "Gantry - index routing and schema-evolving ingest for ClickHouse")]
#[command(version)]
struct Cli {
    /// Configuration file path (TOML, or YAML by extension)
    #[arg(short, long, default_value = "gantry.toml", env = "GANTRY_CONFIG")]
    config: PathBuf,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show how an index pattern is routed
    Resolve {
        /// Index name or pattern, e.g. `logs-*,audit`
        pattern: String,

        /// Pipeline to resolve for (query or ingest)
        #[arg(short, long, default_value = "query")]
        pipeline: String,

        /// Resolve against the tables and indices given below instead of
        /// the configured backends
        #[arg(long)]
        offline: bool,

        /// ClickHouse table present in the offline inventory
        #[arg(long = "table")]
        tables: Vec<String>,

        /// Elasticsearch index present in the offline inventory
        #[arg(long = "elastic-index")]
        elastic_indexes: Vec<String>,
    },

    /// Ingest newline-delimited JSON documents into an index
    Ingest {
        /// Target index
        index: String,

        /// JSONL file, `-` for stdin
        #[arg(short, long, default_value = "-")]
        input: String,

        /// Documents per batch
        #[arg(long, default_value = "500")]
        batch_size: usize,

        /// Print the statements instead of executing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Keep the routing inventory fresh until interrupted
    Serve,

    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(json: bool, default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| format!("{},gantry=debug", default_level)),
    );
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_config(path: &Path) -> Result<GatewayConfig> {
    if path.exists() {
        GatewayConfig::load(path)
    } else {
        Ok(GatewayConfig::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::InitConfig { force } = cli.command {
        init_tracing(cli.log_json, "info");
        return commands::run_init_config(&cli.config, force);
    }

    let config = load_config(&cli.config)?;
    init_tracing(cli.log_json || config.logging.json, &config.logging.level);
    if !cli.config.exists() {
        tracing::info!(
            "config file {} not found, using defaults",
            cli.config.display()
        );
    }

    match cli.command {
        Commands::Resolve {
            pattern,
            pipeline,
            offline,
            tables,
            elastic_indexes,
        } => {
            let services = if offline {
                backends::offline(config, &tables, &elastic_indexes)
            } else {
                backends::connected(config)?
            };
            commands::run_resolve(&services, &pipeline, &pattern).await
        }
        Commands::Ingest {
            index,
            input,
            batch_size,
            dry_run,
        } => {
            let services = if dry_run {
                backends::offline(config, &[], &[])
            } else {
                backends::connected(config)?
            };
            commands::run_ingest(&services, &index, &input, batch_size).await
        }
        Commands::Serve => {
            let services = backends::connected(config)?;
            commands::run_serve(&services).await
        }
        Commands::InitConfig { .. } => Ok(()),
    }
}
