//! Table/index resolution
//!
//! Decides, per pipeline and index expression, which backend(s) and which
//! physical table(s) serve a request:
//!
//! ```text
//! pattern ──► splitter ──► parts ──► rule ladder (per part) ──► merger ──► Decision
//!                                          ▲
//!                              inventory snapshot (refresher)
//! ```
//!
//! Decisions are cached per pipeline and pattern. The refresher swaps the
//! inventory and clears every cache under the same lock, so a cached
//! decision is never older than the inventory it was computed from.

pub mod decision;
pub mod inventory;
pub mod merger;
pub mod pattern;
mod refresher;
pub mod rules;

pub use decision::{ConnectorDecision, Decision};
pub use inventory::{ClickhouseTable, Inventory, PatternMatches};
pub use merger::merge_decisions;
pub use pattern::{is_internal_index, GlobMatcher, ParsedPattern, PatternSplitter};
pub use rules::{Rule, RoutingConfig};

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::GatewayConfig;
use crate::discovery::{ElasticIndexResolver, TableDiscovery};
use crate::error::ResolveError;
use pattern::{SingleIndexSplitter, WildcardSplitter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Pipeline {
    Ingest,
    Query,
}

impl Pipeline {
    pub const ALL: [Pipeline; 2] = [Pipeline::Ingest, Pipeline::Query];

    pub fn as_str(&self) -> &'static str {
        match self {
            Pipeline::Ingest => "ingest",
            Pipeline::Query => "query",
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pipeline {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ingest" => Ok(Pipeline::Ingest),
            "query" => Ok(Pipeline::Query),
            other => Err(ResolveError::PipelineNotFound(other.to_string())),
        }
    }
}

/// Splitter and rule ladder of one pipeline. Immutable once built.
pub struct PipelineResolver {
    pipeline: Pipeline,
    splitter: Box<dyn PatternSplitter>,
    rules: Vec<Rule>,
}

impl PipelineResolver {
    pub fn new(pipeline: Pipeline, splitter: Box<dyn PatternSplitter>, rules: Vec<Rule>) -> Self {
        Self {
            pipeline,
            splitter,
            rules,
        }
    }

    pub fn ingest(config: Arc<RoutingConfig>) -> Self {
        Self::new(
            Pipeline::Ingest,
            Box::new(SingleIndexSplitter),
            rules::ingest_ladder(config),
        )
    }

    pub fn query(config: Arc<RoutingConfig>) -> Self {
        Self::new(
            Pipeline::Query,
            Box::new(WildcardSplitter),
            rules::query_ladder(config),
        )
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name).collect()
    }

    /// Evaluate `pattern` against one inventory snapshot.
    pub fn evaluate(&self, pattern: &str, inventory: &Inventory) -> Decision {
        let parts = match self.splitter.split(pattern) {
            Ok(parts) => parts,
            Err(decision) => return decision.with_origin("splitter", pattern),
        };

        let decisions: Vec<Decision> = parts
            .iter()
            .map(|part| self.evaluate_part(part, inventory))
            .collect();

        if decisions.len() == 1 {
            let mut decision = decisions.into_iter().next().unwrap_or_default();
            decision.index_pattern = pattern.to_string();
            return decision;
        }
        merge_decisions(pattern, decisions).with_origin("decision_merger", pattern)
    }

    fn evaluate_part(&self, part: &ParsedPattern, inventory: &Inventory) -> Decision {
        for rule in &self.rules {
            if let Some(decision) = rule.apply(part, inventory) {
                return decision.with_origin(rule.name, &part.source);
            }
        }
        Decision::empty("No rule matched.").with_origin("none", &part.source)
    }
}

/// Decisions made for one pattern, across pipelines.
#[derive(Debug, Clone, Serialize)]
pub struct PatternDecisions {
    pub pattern: String,
    pub decisions: BTreeMap<Pipeline, Decision>,
}

struct ResolverState {
    inventory: Arc<Inventory>,
    caches: HashMap<Pipeline, HashMap<String, Decision>>,
}

pub struct TableResolver {
    ingest: PipelineResolver,
    query: PipelineResolver,
    state: Mutex<ResolverState>,
    discovery: Arc<dyn TableDiscovery>,
    elastic: Arc<dyn ElasticIndexResolver>,
    refresh_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TableResolver {
    /// Build a resolver. The initial inventory is the discovery's current
    /// snapshot; Elasticsearch indices appear with the first refresh.
    pub fn new(
        config: &GatewayConfig,
        discovery: Arc<dyn TableDiscovery>,
        elastic: Arc<dyn ElasticIndexResolver>,
    ) -> Self {
        let routing = Arc::new(RoutingConfig::from(config));
        let tables = discovery.table_definitions();
        let inventory = Inventory::from_sources(tables.values(), None);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            ingest: PipelineResolver::ingest(routing.clone()),
            query: PipelineResolver::query(routing),
            state: Mutex::new(ResolverState {
                inventory: Arc::new(inventory),
                caches: HashMap::new(),
            }),
            discovery,
            elastic,
            refresh_interval: Duration::from_secs(config.resolver.refresh_interval_secs.max(1)),
            shutdown_tx,
            shutdown_rx,
        }
    }

    fn pipeline(&self, pipeline: Pipeline) -> &PipelineResolver {
        match pipeline {
            Pipeline::Ingest => &self.ingest,
            Pipeline::Query => &self.query,
        }
    }

    pub fn pipelines(&self) -> Vec<Pipeline> {
        Pipeline::ALL.to_vec()
    }

    /// Resolve an index expression. Repeated calls return equal decisions
    /// until the next inventory swap.
    pub fn resolve(&self, pipeline: Pipeline, pattern: &str) -> Decision {
        let mut state = self.state.lock();

        if let Some(cached) = state
            .caches
            .get(&pipeline)
            .and_then(|cache| cache.get(pattern))
        {
            metrics::counter!("gantry_resolver_cache_hits_total", "pipeline" => pipeline.as_str())
                .increment(1);
            tracing::trace!("decision cache hit for [{}] ({})", pattern, pipeline);
            return cached.clone();
        }
        metrics::counter!("gantry_resolver_cache_misses_total", "pipeline" => pipeline.as_str())
            .increment(1);

        let inventory = state.inventory.clone();
        let decision = self.pipeline(pipeline).evaluate(pattern, &inventory);
        tracing::debug!("resolved [{}] for {}: {}", pattern, pipeline, decision);

        state
            .caches
            .entry(pipeline)
            .or_default()
            .insert(pattern.to_string(), decision.clone());
        decision
    }

    /// Resolve with a pipeline given by name.
    pub fn resolve_named(&self, pipeline: &str, pattern: &str) -> Decision {
        match pipeline.parse::<Pipeline>() {
            Ok(p) => self.resolve(p, pattern),
            Err(e) => Decision::error(e, "Pipeline not found.").with_origin("resolver", pattern),
        }
    }

    /// Every cached decision, sorted by pattern.
    pub fn recent_decisions(&self) -> Vec<PatternDecisions> {
        let state = self.state.lock();
        let mut by_pattern: BTreeMap<String, BTreeMap<Pipeline, Decision>> = BTreeMap::new();
        for (pipeline, cache) in &state.caches {
            for (pattern, decision) in cache {
                by_pattern
                    .entry(pattern.clone())
                    .or_default()
                    .insert(*pipeline, decision.clone());
            }
        }
        by_pattern
            .into_iter()
            .map(|(pattern, decisions)| PatternDecisions { pattern, decisions })
            .collect()
    }

    /// Current inventory snapshot.
    pub fn inventory(&self) -> Arc<Inventory> {
        self.state.lock().inventory.clone()
    }

    /// Install a new inventory and drop every cached decision atomically.
    pub fn swap_inventory(&self, inventory: Inventory) {
        let mut state = self.state.lock();
        state.inventory = Arc::new(inventory);
        state.caches.clear();
    }
}
