//! Column derivation for new tables and schema diffs for known ones.

use serde_json::Value;
use std::collections::BTreeMap;

use super::transform::{encode_field_name, ColumnNameFormatter, Document};
use crate::comment_metadata::CommentMetadata;
use crate::schema::{
    infer_type, reverse_encodings, Column, ColumnType, FieldEncodingKey, FieldEncodings,
    FieldType, IndexSchema, Table, TableConfig, ATTRIBUTES_MAP_TYPE, TIMESTAMP_FIELD,
};

/// A column proposed for a new table: encoded name and full type string
/// (which may carry a `DEFAULT` clause).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTableEntry {
    pub column_name: String,
    pub column_type: String,
}

impl CreateTableEntry {
    fn new(column_name: &str, column_type: &str) -> Self {
        Self {
            column_name: column_name.to_string(),
            column_type: column_type.to_string(),
        }
    }
}

/// One column per top level field whose type can be inferred.
pub fn json_to_columns(document: &Document, config: &TableConfig) -> Vec<CreateTableEntry> {
    let mut entries = Vec::with_capacity(document.len());
    for (name, value) in document {
        let Some(inferred) = infer_type(value) else {
            tracing::warn!("skipping field '{}' with invalid or incomplete type", name);
            continue;
        };
        let mut column_type = inferred.for_inferred_column().to_string();
        if name == TIMESTAMP_FIELD && config.timestamp_defaults_now {
            column_type.push_str(" DEFAULT now64()");
        }
        entries.push(CreateTableEntry::new(name, &column_type));
    }
    entries
}

fn encoded_name(encodings: &FieldEncodings, table_name: &str, property: &str) -> String {
    encodings
        .get(&FieldEncodingKey::new(table_name, property))
        .cloned()
        .unwrap_or_else(|| encode_field_name(property))
}

/// Columns declared by the predefined schema, keyed by encoded name.
pub fn schema_to_columns(
    schema: Option<&IndexSchema>,
    formatter: &dyn ColumnNameFormatter,
    table_name: &str,
    encodings: &FieldEncodings,
) -> BTreeMap<String, CreateTableEntry> {
    let mut columns = BTreeMap::new();
    let Some(schema) = schema else {
        return columns;
    };

    for field in schema.fields.values() {
        let property = &field.property_name;
        if field.field_type == FieldType::Point {
            for suffix in ["lat", "lon"] {
                let name = encoded_name(encodings, table_name, &formatter.format(property, suffix));
                columns.insert(name.clone(), CreateTableEntry::new(&name, "Nullable(Float64)"));
            }
            continue;
        }
        match field.field_type.column_type() {
            Some(column_type) => {
                let name = encoded_name(encodings, table_name, property);
                columns.insert(name.clone(), CreateTableEntry::new(&name, column_type));
            }
            None => tracing::warn!(
                "unsupported field type '{:?}' for field '{}' when creating table {}, ignoring",
                field.field_type,
                property,
                table_name
            ),
        }
    }
    columns
}

/// Merge document and schema columns into table columns with metadata
/// comments. A schema type wins over the inferred one unless the document
/// holds an array there.
pub fn columns_to_properties(
    from_json: Vec<CreateTableEntry>,
    mut from_schema: BTreeMap<String, CreateTableEntry>,
    encodings: &FieldEncodings,
    table_name: &str,
) -> Vec<Column> {
    let reverse = reverse_encodings(encodings, table_name);
    let comment_for = |column_name: &str| {
        let property = reverse
            .get(column_name)
            .map(String::as_str)
            .unwrap_or(column_name);
        CommentMetadata::for_field(property).marshal()
    };

    let mut columns = Vec::with_capacity(from_json.len() + from_schema.len());
    for entry in from_json {
        let chosen = match from_schema.remove(&entry.column_name) {
            Some(schema_entry) if !entry.column_type.contains("Array") => schema_entry,
            _ => entry,
        };
        columns.push(
            Column::from_type_string(&chosen.column_name, &chosen.column_type)
                .with_comment(comment_for(&chosen.column_name)),
        );
    }
    for entry in from_schema.into_values() {
        columns.push(
            Column::from_type_string(&entry.column_name, &entry.column_type)
                .with_comment(comment_for(&entry.column_name)),
        );
    }
    columns
}

/// Timestamp and attribute map columns a new table needs beyond those
/// derived from its first document.
pub fn framework_columns(config: &TableConfig, existing: &[Column]) -> Vec<Column> {
    let present = |name: &str| existing.iter().any(|c| c.name == name);
    let mut columns = Vec::new();
    if config.has_timestamp && !present(TIMESTAMP_FIELD) {
        let mut timestamp = Column::new(TIMESTAMP_FIELD, ColumnType::base("DateTime64(3)"));
        if config.timestamp_defaults_now {
            timestamp.modifiers = "DEFAULT now64()".to_string();
        }
        columns.push(timestamp);
    }
    for name in config.attribute_map_columns() {
        if !present(name) {
            columns.push(Column::new(name, ColumnType::base(ATTRIBUTES_MAP_TYPE)));
        }
    }
    columns
}

/// Fields of `document` the table has no column for. Members of tuple
/// columns are compared recursively.
pub fn difference_map(document: &Document, table: &Table) -> Document {
    let columns = table.columns();
    let mut diff = Document::new();
    for (name, value) in document {
        match columns.get(name) {
            None => {
                diff.insert(name.clone(), value.clone());
            }
            Some(column) => {
                if let Value::Object(members) = value {
                    let nested = tuple_difference(members, &column.column_type);
                    if !nested.is_empty() {
                        diff.insert(name.clone(), Value::Object(nested));
                    }
                }
            }
        }
    }
    diff
}

fn tuple_difference(members: &Document, column_type: &ColumnType) -> Document {
    let mut diff = Document::new();
    if !column_type.is_tuple() {
        return diff;
    }
    for (name, value) in members {
        match column_type.field(name) {
            None => {
                diff.insert(name.clone(), value.clone());
            }
            Some(member_type) => {
                if let Value::Object(nested) = value {
                    let nested = tuple_difference(nested, member_type);
                    if !nested.is_empty() {
                        diff.insert(name.clone(), Value::Object(nested));
                    }
                }
            }
        }
    }
    diff
}

/// Keep only fields the table has columns for.
pub fn remove_non_schema_fields(document: Document, table: &Table) -> Document {
    let columns = table.columns();
    document
        .into_iter()
        .filter_map(|(name, value)| {
            let column = columns.get(&name)?;
            let value = match value {
                Value::Object(members) if column.column_type.is_tuple() => {
                    Value::Object(keep_tuple_members(members, &column.column_type))
                }
                other => other,
            };
            Some((name, value))
        })
        .collect()
}

fn keep_tuple_members(members: Document, column_type: &ColumnType) -> Document {
    members
        .into_iter()
        .filter_map(|(name, value)| {
            let member_type = column_type.field(&name)?;
            match value {
                Value::Object(nested) if member_type.is_tuple() => {
                    let nested = keep_tuple_members(nested, member_type);
                    if nested.is_empty() {
                        None
                    } else {
                        Some((name, Value::Object(nested)))
                    }
                }
                Value::Object(nested) if nested.is_empty() => None,
                other => Some((name, other)),
            }
        })
        .collect()
}
