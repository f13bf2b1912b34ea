//! When does an unseen field become a real column.

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::common_table;
use crate::config::IngestConfig;
use crate::schema::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvolutionPolicy {
    /// Tables below this many columns promote every new field
    pub always_add_column_limit: usize,
    /// Tables above this many columns promote nothing
    pub alter_column_upper_limit: usize,
    /// Sightings within one window needed to promote a field
    pub field_frequency: i64,
}

impl EvolutionPolicy {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            always_add_column_limit: config.always_add_column_limit,
            alter_column_upper_limit: config.alter_column_upper_limit,
            field_frequency: config.field_frequency,
        }
    }

    /// Documents per counting window.
    fn window(&self) -> i64 {
        self.always_add_column_limit as i64
    }
}

impl Default for EvolutionPolicy {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}

#[derive(Debug, Default)]
struct Counters {
    /// Documents with unknown fields seen in the current window
    ingest_counter: i64,
    /// (table, field) -> sightings in the current window
    fields: HashMap<(String, String), i64>,
}

/// Field occurrence statistics shared by all tables of a processor.
#[derive(Debug, Default)]
pub struct FieldStatistics {
    policy: EvolutionPolicy,
    counters: Mutex<Counters>,
}

impl FieldStatistics {
    pub fn new(policy: EvolutionPolicy) -> Self {
        Self {
            policy,
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn policy(&self) -> EvolutionPolicy {
        self.policy
    }

    /// Count one document carrying unknown fields.
    pub fn record_ingest(&self) {
        self.counters.lock().ingest_counter += 1;
    }

    /// Positions in `keys` of the fields to promote to columns of `table` now.
    pub fn promotable(&self, table: &Table, keys: &[String]) -> Vec<usize> {
        let columns = table.column_count();
        if table.name == common_table::TABLE_NAME {
            if columns > self.policy.alter_column_upper_limit {
                tracing::warn!(
                    "common table has more than {} columns",
                    self.policy.alter_column_upper_limit
                );
            }
            return (0..keys.len()).collect();
        }
        if columns < self.policy.always_add_column_limit {
            return (0..keys.len()).collect();
        }
        if columns > self.policy.alter_column_upper_limit {
            return Vec::new();
        }

        let mut counters = self.counters.lock();
        let mut promoted = Vec::new();
        for (i, key) in keys.iter().enumerate() {
            let count = {
                let entry = counters
                    .fields
                    .entry((table.name.clone(), key.clone()))
                    .or_insert(0);
                *entry += 1;
                *entry
            };
            if counters.ingest_counter >= self.policy.window() {
                counters.ingest_counter = 0;
                counters.fields.clear();
            }
            if count >= self.policy.field_frequency {
                promoted.push(i);
            }
        }
        promoted
    }

    /// Sightings of `field` in `table` within the current window.
    pub fn field_count(&self, table: &str, field: &str) -> i64 {
        self.counters
            .lock()
            .fields
            .get(&(table.to_string(), field.to_string()))
            .copied()
            .unwrap_or(0)
    }
}
