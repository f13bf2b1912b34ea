//! Packing of fields without a column into the attribute map columns.

use serde_json::Value;
use std::collections::BTreeMap;

use super::transform::Document;
use crate::schema::{type_name_of, Attribute};
use crate::{Error, Result};

/// One field routed to an attribute bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeEntry {
    pub key: String,
    /// Value as text, the way it is stored in the map
    pub value: String,
    /// Inferred type name, `Undefined` when it has none
    pub value_type: String,
}

/// Field entries grouped per bucket, parallel to the configured attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributesByBucket {
    pub buckets: Vec<Vec<AttributeEntry>>,
}

impl AttributesByBucket {
    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> impl Iterator<Item = &AttributeEntry> {
        self.buckets.iter().flatten()
    }

    /// Drop entries by key, e.g. after they were promoted to columns.
    pub fn remove_keys(&mut self, keys: &[String]) {
        for bucket in &mut self.buckets {
            bucket.retain(|entry| !keys.contains(&entry.key));
        }
    }
}

/// Text form of a value: strings unquoted, everything else as JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Assign every field of `diff` to the first bucket that can hold it,
/// visiting fields in key order.
pub fn build_attributes(diff: &Document, attributes: &[Attribute]) -> Result<AttributesByBucket> {
    let mut packed = AttributesByBucket {
        buckets: vec![Vec::new(); attributes.len()],
    };
    for (key, value) in diff {
        let bucket = attributes
            .iter()
            .position(|attribute| attribute.can_convert(value))
            .ok_or_else(|| {
                Error::Ingest(format!(
                    "no attribute bucket accepts field '{}' with value {}",
                    key, value
                ))
            })?;
        packed.buckets[bucket].push(AttributeEntry {
            key: key.clone(),
            value: value_text(value),
            value_type: type_name_of(value),
        });
    }
    Ok(packed)
}

/// Route fields that failed validation into the string bucket.
///
/// Their real type is kept in the type name so the metadata map still
/// records what was received.
pub fn add_invalid_fields(
    packed: &mut AttributesByBucket,
    invalid: &Document,
    attributes: &[Attribute],
) {
    let Some(bucket) = attributes
        .iter()
        .position(|a| a.attribute_type.base_name() == "String")
    else {
        return;
    };
    for (key, value) in invalid {
        packed.buckets[bucket].push(AttributeEntry {
            key: key.clone(),
            value: value_text(value),
            value_type: type_name_of(value),
        });
    }
}

/// Content of the two attribute map columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NonSchemaFields {
    pub values_column: String,
    pub metadata_column: String,
    pub values: BTreeMap<String, String>,
    /// `key -> "<value>;<type>"`
    pub metadata: BTreeMap<String, String>,
}

impl NonSchemaFields {
    /// Map columns as JSON fields, each omitted when empty.
    pub fn into_document(self) -> Document {
        let mut document = Document::new();
        if !self.values.is_empty() {
            document.insert(self.values_column, map_value(self.values));
        }
        if !self.metadata.is_empty() {
            document.insert(self.metadata_column, map_value(self.metadata));
        }
        document
    }
}

fn map_value(map: BTreeMap<String, String>) -> Value {
    Value::Object(map.into_iter().map(|(k, v)| (k, Value::String(v))).collect())
}

/// Build the attribute map contents. Empty values are left out of the
/// values map but still recorded in the metadata map.
pub fn non_schema_fields(
    packed: &AttributesByBucket,
    attributes: &[Attribute],
) -> Option<NonSchemaFields> {
    let first = attributes.first()?;
    let mut fields = NonSchemaFields {
        values_column: first.map_value_name.clone(),
        metadata_column: first.map_metadata_name.clone(),
        ..Default::default()
    };
    for entry in packed.entries() {
        if !entry.value.is_empty() {
            fields.values.insert(entry.key.clone(), entry.value.clone());
        }
        fields.metadata.insert(
            entry.key.clone(),
            format!("{};{}", entry.value, entry.value_type),
        );
    }
    Some(fields)
}

/// Row JSON: schema fields merged with the attribute maps, keys sorted.
pub fn insert_json(schema_fields: Document, non_schema: Option<NonSchemaFields>) -> Result<String> {
    let mut row = non_schema.map(NonSchemaFields::into_document).unwrap_or_default();
    row.extend(schema_fields);
    Ok(serde_json::to_string(&Value::Object(row))?)
}
