//! Document rewriting ahead of schema inference.

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::schema::{FieldEncodingKey, FieldEncodings, TIMESTAMP_FIELD};
use crate::Result;

pub type Document = Map<String, Value>;

/// A per-document rewrite applied after field names are encoded.
pub trait IngestTransformer: Send + Sync {
    fn transform(&self, document: Document) -> Result<Document>;
}

/// Leaves documents untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl IngestTransformer for PassThrough {
    fn transform(&self, document: Document) -> Result<Document> {
        Ok(document)
    }
}

/// Runs transformers in order, stopping at the first error.
#[derive(Clone, Default)]
pub struct TransformerChain {
    transformers: Vec<Arc<dyn IngestTransformer>>,
}

impl TransformerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, transformer: Arc<dyn IngestTransformer>) -> Self {
        self.transformers.push(transformer);
        self
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }
}

impl IngestTransformer for TransformerChain {
    fn transform(&self, document: Document) -> Result<Document> {
        self.transformers
            .iter()
            .try_fold(document, |doc, transformer| transformer.transform(doc))
    }
}

/// Joins the path of a nested field into one field name.
pub trait ColumnNameFormatter: Send + Sync {
    fn format(&self, namespace: &str, field: &str) -> String;
}

#[derive(Debug, Clone)]
pub struct DefaultColumnNameFormatter {
    separator: String,
}

impl DefaultColumnNameFormatter {
    pub fn new(separator: &str) -> Self {
        Self {
            separator: separator.to_string(),
        }
    }
}

impl Default for DefaultColumnNameFormatter {
    fn default() -> Self {
        Self::new(".")
    }
}

impl ColumnNameFormatter for DefaultColumnNameFormatter {
    fn format(&self, namespace: &str, field: &str) -> String {
        if namespace.is_empty() {
            field.to_string()
        } else {
            format!("{}{}{}", namespace, self.separator, field)
        }
    }
}

/// Turn arrays of objects into objects of arrays, recursively:
/// `{"a":[{"b":1},{"b":2}]}` becomes `{"a":{"b":[1,2]}}`.
///
/// Members missing from some elements are filled with `null` so positions
/// stay aligned.
pub fn rewrite_array_of_objects(document: Document) -> Document {
    document
        .into_iter()
        .map(|(key, value)| (key, rewrite_value(value)))
        .collect()
}

fn rewrite_value(value: Value) -> Value {
    match value {
        Value::Object(members) => Value::Object(rewrite_array_of_objects(members)),
        Value::Array(elements)
            if !elements.is_empty() && elements.iter().all(Value::is_object) =>
        {
            let mut keys: Vec<String> = Vec::new();
            for element in &elements {
                if let Value::Object(members) = element {
                    for key in members.keys() {
                        if !keys.contains(key) {
                            keys.push(key.clone());
                        }
                    }
                }
            }
            let mut rewritten = Map::new();
            for key in keys {
                let column: Vec<Value> = elements
                    .iter()
                    .map(|element| element.get(&key).cloned().unwrap_or(Value::Null))
                    .collect();
                rewritten.insert(key, rewrite_value(Value::Array(column)));
            }
            Value::Object(rewritten)
        }
        other => other,
    }
}

/// Flatten nested objects into top level fields named by `formatter`.
/// Empty objects stay as leaf values.
pub fn flatten(document: Document, formatter: &dyn ColumnNameFormatter) -> Document {
    let mut flat = Map::new();
    flatten_into(&mut flat, "", document, formatter);
    flat
}

fn flatten_into(
    flat: &mut Document,
    namespace: &str,
    members: Document,
    formatter: &dyn ColumnNameFormatter,
) {
    for (key, value) in members {
        let name = formatter.format(namespace, &key);
        match value {
            Value::Object(nested) if !nested.is_empty() => {
                flatten_into(flat, &name, nested, formatter)
            }
            other => {
                flat.insert(name, other);
            }
        }
    }
}

/// Encode one segment of a field name: lower case, every character that is
/// not ASCII alphanumeric becomes `_`. The timestamp field is kept verbatim.
pub fn encode_field_part(field: &str) -> String {
    if field.is_empty() || field == TIMESTAMP_FIELD {
        return field.to_string();
    }
    field
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Encode a field name into a column name; a leading digit gets a `_` prefix.
pub fn encode_field_name(field: &str) -> String {
    let encoded = encode_field_part(field);
    if encoded.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{}", encoded)
    } else {
        encoded
    }
}

/// Encoding of every top level field of `documents` for `table_name`.
pub fn populate_field_encodings(documents: &[Document], table_name: &str) -> FieldEncodings {
    let mut encodings = FieldEncodings::new();
    for document in documents {
        for field in document.keys() {
            encodings.insert(
                FieldEncodingKey::new(table_name, field),
                encode_field_name(field),
            );
        }
    }
    encodings
}

/// Rename fields to their encoded column names. Keys of nested objects are
/// encoded segment by segment.
pub fn encode_field_names(document: Document) -> Document {
    document
        .into_iter()
        .map(|(key, value)| (encode_field_name(&key), encode_nested(value)))
        .collect()
}

fn encode_nested(value: Value) -> Value {
    match value {
        Value::Object(members) => Value::Object(
            members
                .into_iter()
                .map(|(key, value)| (encode_field_part(&key), encode_nested(value)))
                .collect(),
        ),
        other => other,
    }
}
