use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::types::{Column, ColumnType};
use crate::config::PartitionStrategy;
use crate::discovery::DiscoveredTable;

pub const TIMESTAMP_FIELD: &str = "@timestamp";
pub const ATTRIBUTES_VALUES_COLUMN: &str = "attributes_values";
pub const ATTRIBUTES_METADATA_COLUMN: &str = "attributes_metadata";

/// Type of the attribute map columns.
pub const ATTRIBUTES_MAP_TYPE: &str = "Map(String,String)";

/// One overflow bucket for fields without a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub keys_array_name: String,
    pub values_array_name: String,
    pub types_array_name: String,
    pub map_value_name: String,
    pub map_metadata_name: String,
    pub attribute_type: ColumnType,
}

impl Attribute {
    fn bucket(suffix: &str, type_name: &str) -> Self {
        Self {
            keys_array_name: format!("attributes_{}_key", suffix),
            values_array_name: format!("attributes_{}_value", suffix),
            types_array_name: format!("attributes_{}_type", suffix),
            map_value_name: ATTRIBUTES_VALUES_COLUMN.to_string(),
            map_metadata_name: ATTRIBUTES_METADATA_COLUMN.to_string(),
            attribute_type: ColumnType::base(type_name),
        }
    }

    pub fn string() -> Self {
        Self::bucket("string", "String")
    }

    pub fn int64() -> Self {
        Self::bucket("int64", "Int64")
    }

    pub fn float64() -> Self {
        Self::bucket("float64", "Float64")
    }

    pub fn bool() -> Self {
        Self::bucket("bool", "Bool")
    }

    /// Whether `value` converts to the bucket type without loss.
    /// The string bucket accepts everything.
    pub fn can_convert(&self, value: &Value) -> bool {
        match self.attribute_type.base_name() {
            "String" => true,
            "Int64" => {
                value.is_i64()
                    || value
                        .as_f64()
                        .is_some_and(|f| {
                            f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64
                        })
            }
            "Float64" => value.is_number(),
            "Bool" => value.is_boolean(),
            _ => false,
        }
    }
}

/// Physical layout of a table created by the ingest path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    pub has_timestamp: bool,
    pub timestamp_defaults_now: bool,
    pub engine: String,
    pub order_by: String,
    pub partition_strategy: Option<PartitionStrategy>,
    pub primary_key: String,
    pub ttl: String,
    pub settings: String,
    pub cluster_name: Option<String>,
    pub attributes: Vec<Attribute>,
}

impl Default for TableConfig {
    /// Timestamped MergeTree with all four attribute buckets.
    fn default() -> Self {
        Self {
            has_timestamp: true,
            timestamp_defaults_now: true,
            engine: "MergeTree".to_string(),
            order_by: format!("(\"{}\")", TIMESTAMP_FIELD),
            partition_strategy: None,
            primary_key: String::new(),
            ttl: String::new(),
            settings: String::new(),
            cluster_name: None,
            attributes: vec![
                Attribute::int64(),
                Attribute::float64(),
                Attribute::bool(),
                Attribute::string(),
            ],
        }
    }
}

impl TableConfig {
    /// Layout of tables created on first ingest: one string attribute bucket.
    pub fn only_schema_fields(cluster_name: Option<String>) -> Self {
        Self {
            cluster_name,
            attributes: vec![Attribute::string()],
            ..Self::default()
        }
    }

    /// No attribute buckets and no timestamp column.
    pub fn no_attributes() -> Self {
        Self {
            has_timestamp: false,
            timestamp_defaults_now: false,
            attributes: Vec::new(),
            ..Self::default()
        }
    }

    /// Clauses following the column list of `CREATE TABLE`, one per line.
    pub fn post_clause(&self) -> String {
        let mut s = format!("ENGINE = {}\n", self.engine);
        if !self.order_by.is_empty() {
            s.push_str(&format!("ORDER BY {}\n", self.order_by));
        }
        if let Some(function) = self.partition_strategy.and_then(|p| p.partition_function()) {
            s.push_str(&format!("PARTITION BY {}(\"{}\")\n", function, TIMESTAMP_FIELD));
        }
        if !self.primary_key.is_empty() {
            s.push_str(&format!("PRIMARY KEY {}\n", self.primary_key));
        }
        if !self.ttl.is_empty() {
            s.push_str(&format!("TTL {}\n", self.ttl));
        }
        if !self.settings.is_empty() {
            s.push_str(&format!("SETTINGS {}\n", self.settings));
        }
        s
    }

    /// Names of the columns holding attribute maps.
    pub fn attribute_map_columns(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for attribute in &self.attributes {
            for name in [&attribute.map_value_name, &attribute.map_metadata_name] {
                if !names.contains(&name.as_str()) {
                    names.push(name.as_str());
                }
            }
        }
        names
    }
}

pub type Columns = Arc<BTreeMap<String, Column>>;

/// A table known to the ingest processor.
///
/// The column map is copy-on-write: readers take a snapshot `Arc`, writers
/// install a new map. Columns are only ever added.
#[derive(Debug)]
pub struct Table {
    pub name: String,
    pub config: TableConfig,
    /// Logical index stored in the common table; never materialized
    pub virtual_table: bool,
    /// Secondary index clauses used when the table is created
    pub indexes: Vec<String>,
    cols: RwLock<Columns>,
    created: AtomicBool,
}

impl Table {
    pub fn new(name: &str, config: TableConfig, columns: impl IntoIterator<Item = Column>) -> Self {
        let cols: BTreeMap<String, Column> =
            columns.into_iter().map(|c| (c.name.clone(), c)).collect();
        Self {
            name: name.to_string(),
            config,
            virtual_table: false,
            indexes: Vec::new(),
            cols: RwLock::new(Arc::new(cols)),
            created: AtomicBool::new(false),
        }
    }

    /// A table that already exists in the database.
    pub fn from_discovered(discovered: &DiscoveredTable, config: TableConfig) -> Self {
        let columns = discovered.columns.values().map(|c| {
            let mut column = Column::from_type_string(&c.name, &c.column_type);
            column.comment = c.comment.clone();
            column
        });
        let table = Self::new(&discovered.name, config, columns).as_virtual(discovered.is_virtual);
        table.mark_created();
        table
    }

    pub fn as_virtual(mut self, virtual_table: bool) -> Self {
        self.virtual_table = virtual_table;
        self
    }

    pub fn with_indexes(mut self, indexes: Vec<String>) -> Self {
        self.indexes = indexes;
        self
    }

    /// Whether the table exists in the database.
    pub fn is_created(&self) -> bool {
        self.created.load(Ordering::Acquire)
    }

    pub fn mark_created(&self) {
        self.created.store(true, Ordering::Release);
    }

    pub fn columns(&self) -> Columns {
        self.cols.read().clone()
    }

    pub fn column(&self, name: &str) -> Option<Column> {
        self.cols.read().get(name).cloned()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.cols.read().contains_key(name)
    }

    pub fn column_count(&self) -> usize {
        self.cols.read().len()
    }

    /// Add columns that are not present yet; returns how many were added.
    pub fn add_columns(&self, columns: impl IntoIterator<Item = Column>) -> usize {
        let mut guard = self.cols.write();
        let mut next = BTreeMap::clone(&guard);
        let mut added = 0;
        for column in columns {
            if !next.contains_key(&column.name) {
                next.insert(column.name.clone(), column);
                added += 1;
            }
        }
        if added > 0 {
            *guard = Arc::new(next);
        }
        added
    }

    /// Forget columns whose ALTER did not go through.
    pub fn remove_columns(&self, names: &[String]) -> usize {
        let mut guard = self.cols.write();
        let mut next = BTreeMap::clone(&guard);
        let removed = names.iter().filter(|n| next.remove(*n).is_some()).count();
        if removed > 0 {
            *guard = Arc::new(next);
        }
        removed
    }
}

/// Registry of tables known to the ingest processor.
#[derive(Debug, Default)]
pub struct TableMap {
    tables: RwLock<HashMap<String, Arc<Table>>>,
}

impl TableMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Table>> {
        self.tables.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.read().contains_key(name)
    }

    /// Register `table` unless a table with that name exists. Returns the
    /// registered table and whether `table` was the one inserted.
    pub fn insert_if_absent(&self, table: Table) -> (Arc<Table>, bool) {
        let mut tables = self.tables.write();
        if let Some(existing) = tables.get(&table.name) {
            return (existing.clone(), false);
        }
        let table = Arc::new(table);
        tables.insert(table.name.clone(), table.clone());
        (table, true)
    }

    /// Sorted table names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attribute_can_convert() {
        assert!(Attribute::string().can_convert(&json!({"a": 1})));
        assert!(Attribute::int64().can_convert(&json!(3)));
        assert!(Attribute::int64().can_convert(&json!(3.0)));
        assert!(!Attribute::int64().can_convert(&json!(3.5)));
        assert!(!Attribute::int64().can_convert(&json!("3")));
        assert!(Attribute::float64().can_convert(&json!(3.5)));
        assert!(Attribute::bool().can_convert(&json!(false)));
        assert!(!Attribute::bool().can_convert(&json!("false")));
    }

    #[test]
    fn test_post_clause() {
        let mut config = TableConfig::only_schema_fields(None);
        assert_eq!(
            config.post_clause(),
            "ENGINE = MergeTree\nORDER BY (\"@timestamp\")\n"
        );

        config.partition_strategy = Some(PartitionStrategy::Daily);
        config.ttl = "toDateTime(\"@timestamp\") + INTERVAL 7 DAY".to_string();
        assert_eq!(
            config.post_clause(),
            "ENGINE = MergeTree\nORDER BY (\"@timestamp\")\nPARTITION BY toYYYYMMDD(\"@timestamp\")\nTTL toDateTime(\"@timestamp\") + INTERVAL 7 DAY\n"
        );

        config.partition_strategy = Some(PartitionStrategy::None);
        assert!(!config.post_clause().contains("PARTITION"));
    }

    #[test]
    fn test_presets() {
        assert_eq!(TableConfig::default().attributes.len(), 4);
        assert_eq!(
            TableConfig::only_schema_fields(Some("c1".into())).attributes,
            vec![Attribute::string()]
        );
        let no_attrs = TableConfig::no_attributes();
        assert!(!no_attrs.has_timestamp);
        assert!(no_attrs.attribute_map_columns().is_empty());
        assert_eq!(
            TableConfig::default().attribute_map_columns(),
            vec![ATTRIBUTES_VALUES_COLUMN, ATTRIBUTES_METADATA_COLUMN]
        );
    }

    #[test]
    fn test_columns_are_copy_on_write() {
        let table = Table::new(
            "logs",
            TableConfig::default(),
            vec![Column::new("a", ColumnType::nullable("String"))],
        );
        let before = table.columns();

        let added = table.add_columns(vec![
            Column::new("a", ColumnType::nullable("Int64")),
            Column::new("b", ColumnType::nullable("String")),
        ]);
        assert_eq!(added, 1);
        assert_eq!(before.len(), 1);
        assert_eq!(table.column_count(), 2);
        assert_eq!(
            table.column("a").unwrap().column_type,
            ColumnType::nullable("String")
        );
    }

    #[test]
    fn test_table_map_insert_if_absent() {
        let tables = TableMap::new();
        let (first, inserted) =
            tables.insert_if_absent(Table::new("t", TableConfig::default(), vec![]));
        assert!(inserted);
        let (second, inserted) =
            tables.insert_if_absent(Table::new("t", TableConfig::no_attributes(), vec![]));
        assert!(!inserted);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(tables.names(), vec!["t"]);
    }

    #[test]
    fn test_from_discovered_is_created() {
        let discovered = DiscoveredTable::physical("logs").with_column("a", "Nullable(String)");
        let table = Table::from_discovered(&discovered, TableConfig::default());
        assert!(table.is_created());
        assert!(!table.virtual_table);
        assert_eq!(
            table.column("a").unwrap().column_type,
            ColumnType::nullable("String")
        );
    }
}
