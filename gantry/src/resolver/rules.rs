//! Routing rules
//!
//! Each rule is a pure function of one pattern part and an inventory
//! snapshot. A ladder evaluates its rules in order and the first rule that
//! returns a decision wins.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::decision::{ConnectorDecision, Decision};
use super::inventory::Inventory;
use super::pattern::{is_internal_index, GlobMatcher, ParsedPattern};
use super::Pipeline;
use crate::common_table;
use crate::config::{GatewayConfig, IndexConfig, ResolverConfig, Target};
use crate::error::ResolveError;

type RuleFn = dyn Fn(&ParsedPattern, &Inventory) -> Option<Decision> + Send + Sync;

pub struct Rule {
    pub name: &'static str,
    apply: Box<RuleFn>,
}

impl Rule {
    pub fn new<F>(name: &'static str, apply: F) -> Self
    where
        F: Fn(&ParsedPattern, &Inventory) -> Option<Decision> + Send + Sync + 'static,
    {
        Self {
            name,
            apply: Box::new(apply),
        }
    }

    pub fn apply(&self, pattern: &ParsedPattern, inventory: &Inventory) -> Option<Decision> {
        (self.apply)(pattern, inventory)
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule").field("name", &self.name).finish()
    }
}

/// The routing-relevant part of the gateway configuration.
#[derive(Debug, Clone, Default)]
pub struct RoutingConfig {
    pub indexes: BTreeMap<String, IndexConfig>,
    pub resolver: ResolverConfig,
}

impl From<&GatewayConfig> for RoutingConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            indexes: config.indexes.clone(),
            resolver: config.resolver.clone(),
        }
    }
}

impl RoutingConfig {
    pub fn default_targets(&self, pipeline: Pipeline) -> &[String] {
        match pipeline {
            Pipeline::Ingest => &self.resolver.default_ingest_target,
            Pipeline::Query => &self.resolver.default_query_target,
        }
    }

    /// Configured targets of an index, falling back to the defaults.
    pub fn effective_targets<'a>(
        &'a self,
        index: &'a IndexConfig,
        pipeline: Pipeline,
    ) -> &'a [String] {
        index
            .targets(pipeline)
            .unwrap_or_else(|| self.default_targets(pipeline))
    }

    /// Whether a dedicated ClickHouse table may serve `name`.
    fn serves_from_clickhouse(&self, name: &str, pipeline: Pipeline) -> bool {
        self.resolver.autodiscovery || self.configured_for_clickhouse(name, pipeline)
    }

    /// Whether `name` is a configured index with a ClickHouse target.
    fn configured_for_clickhouse(&self, name: &str, pipeline: Pipeline) -> bool {
        match self.indexes.get(name) {
            Some(cfg) => self
                .effective_targets(cfg, pipeline)
                .iter()
                .any(|t| t == crate::config::CLICKHOUSE_TARGET),
            None => false,
        }
    }
}

fn parse_targets(index: &str, targets: &[String]) -> Result<Vec<Target>, ResolveError> {
    let mut parsed = Vec::with_capacity(targets.len());
    for name in targets {
        let target = Target::parse(name).ok_or_else(|| ResolveError::UnsupportedTarget {
            index: index.to_string(),
            target: name.clone(),
        })?;
        if parsed.contains(&target) {
            return Err(ResolveError::DuplicateTarget {
                index: index.to_string(),
                target: name.clone(),
            });
        }
        parsed.push(target);
    }
    Ok(parsed)
}

fn connector_for(target: Target, table_name: &str, index: &str) -> ConnectorDecision {
    match target {
        Target::Elasticsearch => ConnectorDecision::elastic(),
        Target::Clickhouse => ConnectorDecision::clickhouse(table_name, index),
    }
}

/// Elasticsearch and Kibana internals never route to ClickHouse.
pub fn internal_index() -> Rule {
    Rule::new("internal_index", |pattern, _| {
        if is_internal_index(&pattern.source) {
            Some(Decision::connectors(
                vec![ConnectorDecision::Elastic {
                    management_call: true,
                }],
                "It's kibana internals",
            ))
        } else {
            None
        }
    })
}

/// An index configured with no targets is closed, not missing.
pub fn disabled_in_config(config: Arc<RoutingConfig>, pipeline: Pipeline) -> Rule {
    Rule::new("disabled_in_config", move |pattern, _| {
        let name = pattern.name()?;
        let index = config.indexes.get(name)?;
        match index.targets(pipeline) {
            Some(targets) if targets.is_empty() => {
                Some(Decision::closed("Index is disabled in config."))
            }
            _ => None,
        }
    })
}

/// Exactly configured index with a dedicated table.
///
/// Two targets: ingest writes to both in configured order, query reads the
/// ClickHouse table only.
pub fn single_index(config: Arc<RoutingConfig>, pipeline: Pipeline) -> Rule {
    Rule::new("single_index", move |pattern, _| {
        let name = pattern.name()?;
        let index = config.indexes.get(name)?;
        if index.use_common_table {
            return None;
        }

        let targets = config.effective_targets(index, pipeline);
        if targets.len() > 2 {
            return Some(Decision::error(
                ResolveError::TooManyTargets {
                    index: name.to_string(),
                    count: targets.len(),
                },
                "Unsupported configuration",
            ));
        }
        let targets = match parse_targets(name, targets) {
            Ok(t) => t,
            Err(e) => return Some(Decision::error(e, "Unsupported configuration")),
        };

        match targets.as_slice() {
            [] => Some(Decision::closed("Index is disabled in config.")),
            [target] => Some(Decision::connectors(
                vec![connector_for(*target, name, name)],
                "Enabled in the config.",
            )),
            _ => match pipeline {
                Pipeline::Ingest => Some(Decision::connectors(
                    targets
                        .iter()
                        .map(|t| connector_for(*t, name, name))
                        .collect(),
                    "Enabled in the config. Dual write is enabled.",
                )),
                Pipeline::Query => Some(Decision::connectors(
                    vec![ConnectorDecision::clickhouse(name, name)],
                    "Enabled in the config. Reading from ClickHouse.",
                )),
            },
        }
    })
}

/// Indexes stored in the shared table.
pub fn common_table(config: Arc<RoutingConfig>) -> Rule {
    Rule::new("common_table", move |pattern, inventory| {
        if let Some(name) = pattern.name() {
            if name == common_table::TABLE_NAME {
                return Some(Decision::error(
                    ResolveError::CommonTableAccessed(name.to_string()),
                    "It's internal table. Not allowed to be queried directly.",
                ));
            }
            let configured = config
                .indexes
                .get(name)
                .is_some_and(|cfg| cfg.use_common_table);
            if configured || inventory.is_virtual_table(name) {
                return Some(Decision::connectors(
                    vec![ConnectorDecision::common_table(vec![name.to_string()])],
                    "Common table will be used.",
                ));
            }
            return None;
        }

        let matches = inventory.matches(&pattern.source);
        let matcher = GlobMatcher::new(&pattern.source);
        let mut indexes = matches.virtual_tables.clone();
        for (name, cfg) in &config.indexes {
            if cfg.use_common_table && matcher.matches(name) && !indexes.contains(name) {
                indexes.push(name.clone());
            }
        }
        if indexes.is_empty() {
            return None;
        }
        indexes.sort();

        if !matches.elastic.is_empty() {
            return Some(Decision::error(
                ResolveError::CommonTableWithElastic {
                    pattern: pattern.source.clone(),
                    elastic: matches.elastic,
                },
                "Both Elastic and common table indexes matched.",
            ));
        }
        if !matches.physical.is_empty() {
            return Some(Decision::error(
                ResolveError::IncompatibleParts {
                    pattern: pattern.source.clone(),
                    reason: format!(
                        "common table indexes {:?} and dedicated tables {:?} matched",
                        indexes, matches.physical
                    ),
                },
                "Common table and dedicated tables matched.",
            ));
        }
        Some(Decision::connectors(
            vec![ConnectorDecision::common_table(indexes)],
            "Common table will be used.",
        ))
    })
}

/// Wildcards resolved against both inventories (query only).
pub fn cross_connector(config: Arc<RoutingConfig>) -> Rule {
    Rule::new("cross_connector", move |pattern, inventory| {
        if !pattern.is_pattern {
            return None;
        }
        let matches = inventory.matches(&pattern.source);
        let physical: Vec<String> = matches
            .physical
            .into_iter()
            .filter(|t| config.serves_from_clickhouse(t, Pipeline::Query))
            .collect();
        // dual-written indexes are read from ClickHouse
        let elastic: Vec<String> = matches
            .elastic
            .into_iter()
            .filter(|name| !config.configured_for_clickhouse(name, Pipeline::Query))
            .collect();

        match (elastic.is_empty(), physical.is_empty()) {
            (false, false) => Some(Decision::error(
                ResolveError::AmbiguousPattern {
                    pattern: pattern.source.clone(),
                    elastic,
                    clickhouse: physical,
                },
                "Both Elastic and ClickHouse matched.",
            )),
            (true, true) => Some(Decision::empty("No indexes matched.")),
            (false, true) => Some(Decision::connectors(
                vec![ConnectorDecision::elastic()],
                "Only Elastic indexes matched.",
            )),
            (true, false) => {
                if physical.len() > 1 {
                    return Some(Decision::error(
                        ResolveError::MultipleTables {
                            pattern: pattern.source.clone(),
                            tables: physical,
                        },
                        "Several ClickHouse tables matched.",
                    ));
                }
                let table = &physical[0];
                Some(Decision::connectors(
                    vec![ConnectorDecision::clickhouse(table, table)],
                    "Only ClickHouse tables matched.",
                ))
            }
        }
    })
}

/// Last resort: the configured default targets.
pub fn default_wildcard(config: Arc<RoutingConfig>, pipeline: Pipeline) -> Rule {
    Rule::new("default_wildcard", move |pattern, inventory| {
        let name = pattern.parts.first().map(String::as_str).unwrap_or_default();
        let message = format!("Using default wildcard configuration for {} processor", pipeline);

        if pipeline == Pipeline::Query
            && config.resolver.autodiscovery
            && inventory.is_physical_table(name)
        {
            return Some(Decision::connectors(
                vec![ConnectorDecision::clickhouse(name, name)],
                "Autodiscovered ClickHouse table.",
            ));
        }

        let targets = match parse_targets(name, config.default_targets(pipeline)) {
            Ok(t) => t,
            Err(e) => return Some(Decision::error(e, "Unsupported configuration")),
        };
        if targets.is_empty() {
            return Some(Decision::connectors(
                vec![ConnectorDecision::elastic()],
                message,
            ));
        }

        let clickhouse = if config.resolver.use_common_table_for_wildcard {
            ConnectorDecision::common_table(vec![name.to_string()])
        } else {
            ConnectorDecision::clickhouse(name, name)
        };
        let connectors: Vec<ConnectorDecision> = match pipeline {
            Pipeline::Query if targets.contains(&Target::Clickhouse) => vec![clickhouse],
            _ => targets
                .iter()
                .map(|t| match t {
                    Target::Clickhouse => clickhouse.clone(),
                    Target::Elasticsearch => ConnectorDecision::elastic(),
                })
                .collect(),
        };
        Some(Decision::connectors(connectors, message))
    })
}

pub fn ingest_ladder(config: Arc<RoutingConfig>) -> Vec<Rule> {
    vec![
        internal_index(),
        disabled_in_config(config.clone(), Pipeline::Ingest),
        single_index(config.clone(), Pipeline::Ingest),
        common_table(config.clone()),
        default_wildcard(config, Pipeline::Ingest),
    ]
}

pub fn query_ladder(config: Arc<RoutingConfig>) -> Vec<Rule> {
    vec![
        internal_index(),
        disabled_in_config(config.clone(), Pipeline::Query),
        single_index(config.clone(), Pipeline::Query),
        common_table(config.clone()),
        cross_connector(config.clone()),
        default_wildcard(config, Pipeline::Query),
    ]
}
