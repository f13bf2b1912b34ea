//! Configuration management for gantry
//!
//! Loaded from TOML (default) or YAML, selected by file extension:
//!
//! ```toml
//! [resolver]
//! refresh_interval_secs = 60
//! default_query_target = ["elasticsearch"]
//! default_ingest_target = ["elasticsearch"]
//!
//! [indexes.logs-web]
//! query_target = ["clickhouse"]
//! ingest_target = ["clickhouse"]
//!
//! [indexes.audit]
//! use_common_table = true
//!
//! [ingest]
//! always_add_column_limit = 100
//! field_frequency = 10
//! ```

mod index;

pub use index::{IndexConfig, PartitionStrategy, Target, CLICKHOUSE_TARGET, ELASTICSEARCH_TARGET};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub indexes: BTreeMap<String, IndexConfig>,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub clickhouse: ClickhouseConfig,
    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    /// Seconds between inventory refreshes
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_targets")]
    pub default_query_target: Vec<String>,
    #[serde(default = "default_targets")]
    pub default_ingest_target: Vec<String>,
    /// Route unconfigured indexes with a ClickHouse default target to the common table
    #[serde(default)]
    pub use_common_table_for_wildcard: bool,
    /// Serve existing ClickHouse tables even when they are not configured
    #[serde(default)]
    pub autodiscovery: bool,
}

fn default_refresh_interval_secs() -> u64 {
    60
}

fn default_targets() -> Vec<String> {
    vec![ELASTICSEARCH_TARGET.to_string()]
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            default_query_target: default_targets(),
            default_ingest_target: default_targets(),
            use_common_table_for_wildcard: false,
            autodiscovery: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    /// Below this many columns every new field becomes a column
    #[serde(default = "default_always_add_column_limit")]
    pub always_add_column_limit: usize,
    /// Above this many columns no field is promoted
    #[serde(default = "default_alter_column_upper_limit")]
    pub alter_column_upper_limit: usize,
    /// Occurrences within one window needed to promote a field
    #[serde(default = "default_field_frequency")]
    pub field_frequency: i64,
    /// Flatten nested objects into separate columns
    #[serde(default = "default_true")]
    pub flatten_nested: bool,
    #[serde(default = "default_nested_separator")]
    pub nested_separator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_partitioning_strategy: Option<PartitionStrategy>,
    #[serde(default = "default_true")]
    pub timestamp_defaults_now: bool,
    #[serde(default = "default_true")]
    pub async_insert: bool,
    /// Log every CREATE/ALTER before it runs
    #[serde(default)]
    pub sql_tracing: bool,
}

fn default_always_add_column_limit() -> usize {
    100
}

fn default_alter_column_upper_limit() -> usize {
    1000
}

fn default_field_frequency() -> i64 {
    10
}

fn default_nested_separator() -> String {
    ".".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            cluster_name: None,
            always_add_column_limit: default_always_add_column_limit(),
            alter_column_upper_limit: default_alter_column_upper_limit(),
            field_frequency: default_field_frequency(),
            flatten_nested: true,
            nested_separator: default_nested_separator(),
            default_partitioning_strategy: None,
            timestamp_defaults_now: true,
            async_insert: true,
            sql_tracing: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClickhouseConfig {
    #[serde(default = "default_clickhouse_url")]
    pub url: String,
    #[serde(default = "default_database")]
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

fn default_clickhouse_url() -> String {
    "http://localhost:8123".to_string()
}

fn default_database() -> String {
    "default".to_string()
}

impl Default for ClickhouseConfig {
    fn default() -> Self {
        Self {
            url: default_clickhouse_url(),
            database: default_database(),
            user: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ElasticsearchConfig {
    /// Elasticsearch base URL; no Elasticsearch inventory when unset
    pub url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_virtual_tables_dir")]
    pub virtual_tables_dir: PathBuf,
}

fn default_virtual_tables_dir() -> PathBuf {
    PathBuf::from("~/.gantry/virtual_tables")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            virtual_tables_dir: default_virtual_tables_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Expand ~ to home directory
pub fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
        Ok(home.join(rest))
    } else if s == "~" {
        dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))
    } else {
        Ok(path.to_path_buf())
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

impl GatewayConfig {
    /// Parse a configuration document; YAML when `yaml` is set, TOML otherwise.
    pub fn parse(content: &str, yaml: bool) -> Result<Self> {
        let config = if yaml {
            serde_yaml::from_str(content).context("invalid YAML configuration")?
        } else {
            toml::from_str(content).context("invalid TOML configuration")?
        };
        Ok(config)
    }

    /// Load config from file path
    pub fn load(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("cannot read {}", config_path.display()))?;
        let mut config = Self::parse(&content, is_yaml(config_path))?;
        config.expand_paths()?;
        Ok(config)
    }

    /// Load config from file path, or create default
    pub fn load_or_create(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            Self::load(config_path)
        } else {
            let mut config = GatewayConfig::default();
            // Try to save default config
            let _ = config.save(config_path);
            config.expand_paths()?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = if is_yaml(path) {
            serde_yaml::to_string(self)?
        } else {
            toml::to_string_pretty(self)?
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Per-index configuration, if the index is configured.
    pub fn index(&self, name: &str) -> Option<&IndexConfig> {
        self.indexes.get(name)
    }

    fn expand_paths(&mut self) -> Result<()> {
        self.storage.virtual_tables_dir = expand_tilde(&self.storage.virtual_tables_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Pipeline;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.resolver.refresh_interval_secs, 60);
        assert_eq!(config.resolver.default_query_target, vec!["elasticsearch"]);
        assert_eq!(config.ingest.always_add_column_limit, 100);
        assert_eq!(config.ingest.alter_column_upper_limit, 1000);
        assert_eq!(config.ingest.field_frequency, 10);
        assert!(config.ingest.timestamp_defaults_now);
    }

    #[test]
    fn test_parse_toml() {
        let content = r#"
            [resolver]
            refresh_interval_secs = 5
            default_query_target = ["clickhouse"]
            use_common_table_for_wildcard = true

            [indexes.logs]
            query_target = ["clickhouse", "elasticsearch"]
            ingest_target = ["clickhouse"]
            partitioning_strategy = "daily"

            [indexes.logs.schema_overrides]
            "host.name" = "keyword"

            [indexes.closed]
            query_target = []
            ingest_target = []

            [ingest]
            field_frequency = 3
        "#;
        let config = GatewayConfig::parse(content, false).unwrap();
        assert_eq!(config.resolver.refresh_interval_secs, 5);
        assert!(config.resolver.use_common_table_for_wildcard);
        // untouched sections keep their defaults
        assert_eq!(config.resolver.default_ingest_target, vec!["elasticsearch"]);
        assert_eq!(config.ingest.field_frequency, 3);
        assert_eq!(config.ingest.always_add_column_limit, 100);

        let logs = config.index("logs").unwrap();
        assert_eq!(logs.targets(Pipeline::Query).unwrap().len(), 2);
        assert_eq!(logs.partitioning_strategy, Some(PartitionStrategy::Daily));
        assert_eq!(logs.schema_overrides.get("host.name").unwrap(), "keyword");

        let closed = config.index("closed").unwrap();
        assert!(closed.targets(Pipeline::Ingest).unwrap().is_empty());
    }

    #[test]
    fn test_parse_yaml() {
        let content = r#"
resolver:
  default_ingest_target: [clickhouse]
indexes:
  audit:
    use_common_table: true
"#;
        let config = GatewayConfig::parse(content, true).unwrap();
        assert_eq!(config.resolver.default_ingest_target, vec!["clickhouse"]);
        assert!(config.index("audit").unwrap().use_common_table);
    }

    #[test]
    fn test_load_or_create_writes_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join("gantry.toml");

        let config = GatewayConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.resolver.refresh_interval_secs, 60);

        let reloaded = GatewayConfig::load(&path).unwrap();
        assert_eq!(reloaded.ingest.field_frequency, 10);
    }

    #[test]
    fn test_save_and_load_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gantry.yaml");

        let mut config = GatewayConfig::default();
        config
            .indexes
            .insert("logs".to_string(), IndexConfig::common_table());
        config.save(&path).unwrap();

        let loaded = GatewayConfig::load(&path).unwrap();
        assert!(loaded.index("logs").unwrap().use_common_table);
    }

    #[test]
    fn test_expand_tilde_passthrough() {
        let p = expand_tilde(Path::new("/var/lib/gantry")).unwrap();
        assert_eq!(p, PathBuf::from("/var/lib/gantry"));
    }
}
