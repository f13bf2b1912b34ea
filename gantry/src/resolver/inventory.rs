//! Immutable snapshot of what exists in both backends.

use std::collections::{BTreeMap, BTreeSet};

use super::pattern::{is_internal_index, GlobMatcher};
use crate::common_table;
use crate::discovery::{DiscoveredTable, ResolvedIndices};

/// Registry view of one ClickHouse table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickhouseTable {
    pub name: String,
    pub is_virtual: bool,
}

/// Names found by matching a wildcard against the inventory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PatternMatches {
    pub elastic: Vec<String>,
    /// Dedicated ClickHouse tables
    pub physical: Vec<String>,
    /// Logical indexes stored in the common table
    pub virtual_tables: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Inventory {
    pub clickhouse: BTreeMap<String, ClickhouseTable>,
    pub elastic: BTreeSet<String>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sources<'a>(
        tables: impl IntoIterator<Item = &'a DiscoveredTable>,
        elastic: Option<&ResolvedIndices>,
    ) -> Self {
        let clickhouse = tables
            .into_iter()
            .map(|t| {
                (
                    t.name.clone(),
                    ClickhouseTable {
                        name: t.name.clone(),
                        is_virtual: t.is_virtual,
                    },
                )
            })
            .collect();
        let elastic = elastic
            .map(|e| e.names().cloned().collect())
            .unwrap_or_default();
        Self { clickhouse, elastic }
    }

    pub fn with_table(mut self, name: &str) -> Self {
        self.add_table(name, false);
        self
    }

    pub fn with_virtual_table(mut self, name: &str) -> Self {
        self.add_table(name, true);
        self
    }

    pub fn with_elastic_index(mut self, name: &str) -> Self {
        self.elastic.insert(name.to_string());
        self
    }

    fn add_table(&mut self, name: &str, is_virtual: bool) {
        self.clickhouse.insert(
            name.to_string(),
            ClickhouseTable {
                name: name.to_string(),
                is_virtual,
            },
        );
    }

    pub fn is_virtual_table(&self, name: &str) -> bool {
        self.clickhouse.get(name).is_some_and(|t| t.is_virtual)
    }

    pub fn is_physical_table(&self, name: &str) -> bool {
        self.clickhouse.get(name).is_some_and(|t| !t.is_virtual)
    }

    /// Match a wildcard. The common table and internal indices are never
    /// returned; every list is sorted.
    pub fn matches(&self, pattern: &str) -> PatternMatches {
        let matcher = GlobMatcher::new(pattern);
        let mut out = PatternMatches::default();
        for (name, table) in &self.clickhouse {
            if name == common_table::TABLE_NAME || !matcher.matches(name) {
                continue;
            }
            if table.is_virtual {
                out.virtual_tables.push(name.clone());
            } else {
                out.physical.push(name.clone());
            }
        }
        out.elastic = self
            .elastic
            .iter()
            .filter(|n| !is_internal_index(n) && matcher.matches(n))
            .cloned()
            .collect();
        out
    }
}
