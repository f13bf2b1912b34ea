//! Table schema model
//!
//! ClickHouse column types and their inference from JSON values, the table
//! registry used by the ingest path, and the per-index field schema.

pub mod registry;
pub mod table;
pub mod types;

pub use registry::{
    reverse_encodings, FieldEncodingKey, FieldEncodings, FieldSource, FieldType, IndexSchema,
    SchemaField, SchemaRegistry, StaticSchemaRegistry,
};
pub use table::{
    Attribute, Columns, Table, TableConfig, TableMap, ATTRIBUTES_MAP_TYPE,
    ATTRIBUTES_METADATA_COLUMN, ATTRIBUTES_VALUES_COLUMN, TIMESTAMP_FIELD,
};
pub use types::{infer_type, type_name_of, Column, ColumnType, UNDEFINED_TYPE};
