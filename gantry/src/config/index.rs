//! Per-index routing and storage configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::resolver::Pipeline;

pub const CLICKHOUSE_TARGET: &str = "clickhouse";
pub const ELASTICSEARCH_TARGET: &str = "elasticsearch";

/// A backend an index can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Clickhouse,
    Elasticsearch,
}

impl Target {
    /// Parse a configured target name. Unknown names are reported at
    /// resolution time, not at load time.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            CLICKHOUSE_TARGET => Some(Target::Clickhouse),
            ELASTICSEARCH_TARGET => Some(Target::Elasticsearch),
            _ => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Clickhouse => f.write_str(CLICKHOUSE_TARGET),
            Target::Elasticsearch => f.write_str(ELASTICSEARCH_TARGET),
        }
    }
}

/// Table partitioning applied to `CREATE TABLE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionStrategy {
    Hourly,
    Daily,
    Monthly,
    Yearly,
    None,
}

impl PartitionStrategy {
    /// ClickHouse function applied to the timestamp column, if any.
    pub fn partition_function(&self) -> Option<&'static str> {
        match self {
            PartitionStrategy::Hourly => Some("toStartOfHour"),
            PartitionStrategy::Daily => Some("toYYYYMMDD"),
            PartitionStrategy::Monthly => Some("toYYYYMM"),
            PartitionStrategy::Yearly => Some("toYYYY"),
            PartitionStrategy::None => None,
        }
    }
}

/// Configuration of one logical index.
///
/// A missing target list inherits the resolver defaults; an explicitly empty
/// list disables the index for that pipeline.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct IndexConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_target: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingest_target: Option<Vec<String>>,

    /// Store rows in the shared common table instead of a dedicated table.
    #[serde(default)]
    pub use_common_table: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitioning_strategy: Option<PartitionStrategy>,

    /// Enable ClickHouse async inserts for this index (overrides the ingest default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub async_insert: Option<bool>,

    /// Predefined field types, `field name -> type` (`keyword`, `long`, `timestamp`, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub schema_overrides: BTreeMap<String, String>,
}

impl IndexConfig {
    /// Explicit targets for a pipeline, `None` when inherited.
    pub fn targets(&self, pipeline: Pipeline) -> Option<&[String]> {
        match pipeline {
            Pipeline::Ingest => self.ingest_target.as_deref(),
            Pipeline::Query => self.query_target.as_deref(),
        }
    }

    /// Both pipelines routed to the given targets.
    pub fn with_targets(targets: &[&str]) -> Self {
        let targets: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
        Self {
            query_target: Some(targets.clone()),
            ingest_target: Some(targets),
            ..Default::default()
        }
    }

    /// An index stored in the common table.
    pub fn common_table() -> Self {
        Self {
            use_common_table: true,
            ..Self::with_targets(&[CLICKHOUSE_TARGET])
        }
    }

    /// An index with every pipeline disabled.
    pub fn disabled() -> Self {
        Self::with_targets(&[])
    }
}
