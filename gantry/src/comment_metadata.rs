//! Column comment metadata.
//!
//! Encoded column names are lossy (`host.name` and `host-name` both become
//! `host_name`), so every column created by the ingest path carries the
//! original field name in its comment:
//!
//! ```text
//! quesmaMetadataV1:fieldName=host.name
//! ```
//!
//! Values are `application/x-www-form-urlencoded` after the marker. A comment
//! without the marker carries no metadata.

use std::collections::BTreeMap;
use url::form_urlencoded;

pub const MARKER: &str = "quesmaMetadataV1:";

/// Key holding the original (unencoded) field name.
pub const FIELD_NAME: &str = "fieldName";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentMetadata {
    values: BTreeMap<String, String>,
}

impl CommentMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata carrying only the original field name.
    pub fn for_field(original_name: &str) -> Self {
        let mut metadata = Self::new();
        metadata.insert(FIELD_NAME, original_name);
        metadata
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn field_name(&self) -> Option<&str> {
        self.get(FIELD_NAME)
    }

    /// Render as a column comment. Keys are emitted in sorted order.
    pub fn marshal(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.values {
            serializer.append_pair(key, value);
        }
        format!("{}{}", MARKER, serializer.finish())
    }

    /// Parse a column comment; `None` when the comment has no marker.
    pub fn parse(comment: &str) -> Option<Self> {
        let encoded = comment.strip_prefix(MARKER)?;
        let values = form_urlencoded::parse(encoded.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Some(Self { values })
    }
}
