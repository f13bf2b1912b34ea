//! Per-index field schema and field-name encodings.

use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::config::GatewayConfig;

/// Field types accepted in `schema_overrides`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Keyword,
    Long,
    UnsignedLong,
    Timestamp,
    Date,
    Float,
    Boolean,
    Ip,
    Point,
    Other(String),
}

impl FieldType {
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "text" => FieldType::Text,
            "keyword" => FieldType::Keyword,
            "long" | "integer" => FieldType::Long,
            "unsigned_long" => FieldType::UnsignedLong,
            "timestamp" => FieldType::Timestamp,
            "date" => FieldType::Date,
            "float" | "double" => FieldType::Float,
            "boolean" | "bool" => FieldType::Boolean,
            "ip" => FieldType::Ip,
            "point" | "geo_point" => FieldType::Point,
            _ => FieldType::Other(name.to_string()),
        }
    }

    /// Column type used when creating a table, `None` for unsupported types
    /// and for points (which map to two columns).
    pub fn column_type(&self) -> Option<&'static str> {
        match self {
            FieldType::Text | FieldType::Keyword => Some("Nullable(String)"),
            FieldType::Long => Some("Nullable(Int64)"),
            FieldType::UnsignedLong => Some("Nullable(UInt64)"),
            FieldType::Timestamp => Some("Nullable(DateTime64)"),
            FieldType::Date => Some("Nullable(Date)"),
            FieldType::Float => Some("Nullable(Float64)"),
            FieldType::Boolean => Some("Nullable(Bool)"),
            FieldType::Ip => Some("Nullable(IPv6)"),
            FieldType::Point | FieldType::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaField {
    pub property_name: String,
    pub field_type: FieldType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSchema {
    /// Keyed by property name
    pub fields: BTreeMap<String, SchemaField>,
}

/// Where a field definition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSource {
    Ingest,
    Mapping,
    StaticConfiguration,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldEncodingKey {
    pub table_name: String,
    pub field_name: String,
}

impl FieldEncodingKey {
    pub fn new(table_name: &str, field_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            field_name: field_name.to_string(),
        }
    }
}

/// Original field name → encoded column name, per table.
pub type FieldEncodings = BTreeMap<FieldEncodingKey, String>;

/// Encoded column name → original field name for one table.
pub fn reverse_encodings(encodings: &FieldEncodings, table_name: &str) -> BTreeMap<String, String> {
    encodings
        .iter()
        .filter(|(key, _)| key.table_name == table_name)
        .map(|(key, encoded)| (encoded.clone(), key.field_name.clone()))
        .collect()
}

/// Schema lookups used while ingesting. Only touches in-memory state.
pub trait SchemaRegistry: Send + Sync {
    fn find_schema(&self, index: &str) -> Option<IndexSchema>;

    /// Merge encodings; later encodings of the same key win.
    fn update_field_encodings(&self, encodings: &FieldEncodings);

    fn field_encodings(&self) -> FieldEncodings;

    fn update_fields_origins(&self, index: &str, origins: BTreeMap<String, FieldSource>);

    fn field_origins(&self, index: &str) -> BTreeMap<String, FieldSource>;
}

/// Registry backed by the `schema_overrides` of the index configuration.
#[derive(Debug, Default)]
pub struct StaticSchemaRegistry {
    schemas: BTreeMap<String, IndexSchema>,
    encodings: RwLock<FieldEncodings>,
    origins: RwLock<BTreeMap<String, BTreeMap<String, FieldSource>>>,
}

impl StaticSchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        let mut registry = Self::new();
        for (index, index_config) in &config.indexes {
            if index_config.schema_overrides.is_empty() {
                continue;
            }
            let fields = index_config
                .schema_overrides
                .iter()
                .map(|(name, type_name)| {
                    (
                        name.clone(),
                        SchemaField {
                            property_name: name.clone(),
                            field_type: FieldType::parse(type_name),
                        },
                    )
                })
                .collect();
            registry.schemas.insert(index.clone(), IndexSchema { fields });
        }
        registry
    }

    pub fn with_schema(mut self, index: &str, schema: IndexSchema) -> Self {
        self.schemas.insert(index.to_string(), schema);
        self
    }
}

impl SchemaRegistry for StaticSchemaRegistry {
    fn find_schema(&self, index: &str) -> Option<IndexSchema> {
        self.schemas.get(index).cloned()
    }

    fn update_field_encodings(&self, encodings: &FieldEncodings) {
        let mut guard = self.encodings.write();
        for (key, encoded) in encodings {
            guard.insert(key.clone(), encoded.clone());
        }
    }

    fn field_encodings(&self) -> FieldEncodings {
        self.encodings.read().clone()
    }

    fn update_fields_origins(&self, index: &str, origins: BTreeMap<String, FieldSource>) {
        self.origins
            .write()
            .entry(index.to_string())
            .or_default()
            .extend(origins);
    }

    fn field_origins(&self, index: &str) -> BTreeMap<String, FieldSource> {
        self.origins.read().get(index).cloned().unwrap_or_default()
    }
}
