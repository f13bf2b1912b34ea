//! The shared ClickHouse table for indexes configured with `use_common_table`.
//!
//! Rows of every such index land in one physical table, tagged with
//! [`INDEX_NAME_COLUMN`]. The apparent schema of each index is kept as a
//! [`VirtualTable`] snapshot in a [`VirtualTableStorage`], keyed by index name.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ingest::IngestTransformer;
use crate::schema::{
    Column, ColumnType, Table, TableConfig, ATTRIBUTES_MAP_TYPE, ATTRIBUTES_METADATA_COLUMN,
    ATTRIBUTES_VALUES_COLUMN, TIMESTAMP_FIELD,
};
use crate::Result;
use gantry_storage::VirtualTableStorage;

pub const TABLE_NAME: &str = "quesma_common_table";
pub const INDEX_NAME_COLUMN: &str = "__quesma_index_name";
pub const VIRTUAL_TABLE_VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualTableColumn {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub column_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
}

impl VirtualTableColumn {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            column_type: String::new(),
            comment: String::new(),
        }
    }
}

/// Persisted schema of one logical index stored in the common table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualTable {
    pub version: String,
    pub stored_at: String,
    pub columns: Vec<VirtualTableColumn>,
}

impl VirtualTable {
    /// Snapshot the columns of `table`, without attribute maps, always
    /// including the timestamp, sorted by name.
    pub fn snapshot(table: &Table, now: DateTime<Utc>) -> Self {
        let mut names: Vec<String> = table
            .columns()
            .keys()
            .filter(|name| {
                name.as_str() != ATTRIBUTES_VALUES_COLUMN
                    && name.as_str() != ATTRIBUTES_METADATA_COLUMN
            })
            .cloned()
            .collect();
        if !names.iter().any(|n| n == TIMESTAMP_FIELD) {
            names.push(TIMESTAMP_FIELD.to_string());
        }
        names.sort();

        Self {
            version: VIRTUAL_TABLE_VERSION.to_string(),
            stored_at: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            columns: names.iter().map(|n| VirtualTableColumn::named(n)).collect(),
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Persist the current schema of a virtual table under its name.
pub async fn store_virtual_table(table: &Table, storage: &dyn VirtualTableStorage) -> Result<()> {
    let snapshot = VirtualTable::snapshot(table, Utc::now());
    let document = serde_json::to_string_pretty(&snapshot)?;
    storage.put(&table.name, &document).await?;
    tracing::debug!(
        "stored virtual table {} with {} columns",
        table.name,
        snapshot.columns.len()
    );
    Ok(())
}

/// Definition of the common table itself, not yet created.
pub fn table_definition(cluster_name: Option<String>) -> Table {
    let config = TableConfig {
        cluster_name,
        ..TableConfig::default()
    };
    let mut timestamp = Column::new(TIMESTAMP_FIELD, ColumnType::base("DateTime64(3)"));
    timestamp.modifiers = "DEFAULT now64()".to_string();
    let columns = vec![
        timestamp,
        Column::new(
            INDEX_NAME_COLUMN,
            ColumnType::Compound {
                name: "LowCardinality".to_string(),
                inner: Box::new(ColumnType::base("String")),
            },
        ),
        Column::new(ATTRIBUTES_VALUES_COLUMN, ColumnType::base(ATTRIBUTES_MAP_TYPE)),
        Column::new(ATTRIBUTES_METADATA_COLUMN, ColumnType::base(ATTRIBUTES_MAP_TYPE)),
    ];
    Table::new(TABLE_NAME, config, columns)
}

/// Tags every document with the logical index it belongs to.
#[derive(Debug, Clone)]
pub struct AddIndexNameTransformer {
    pub index_name: String,
}

impl AddIndexNameTransformer {
    pub fn new(index_name: &str) -> Self {
        Self {
            index_name: index_name.to_string(),
        }
    }
}

impl IngestTransformer for AddIndexNameTransformer {
    fn transform(&self, mut document: Map<String, Value>) -> Result<Map<String, Value>> {
        document.insert(
            INDEX_NAME_COLUMN.to_string(),
            Value::String(self.index_name.clone()),
        );
        Ok(document)
    }
}
