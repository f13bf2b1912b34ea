use crate::{Error, Result};

const MAX_INDEX_NAME_BYTES: usize = 255;
const FORBIDDEN_CHARACTERS: &[char] = &[
    '\\', '/', '*', '?', '"', '<', '>', '|', ' ', ',', '#', ':',
];

/// Check an index name against the Elasticsearch naming rules.
pub fn validate_index_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| Err(Error::InvalidIndexName(format!("[{}] {}", name, reason)));

    if name.is_empty() {
        return invalid("must not be empty");
    }
    if name == "." || name == ".." {
        return invalid("must not be '.' or '..'");
    }
    if name.starts_with(['-', '_', '+']) {
        return invalid("must not start with '_', '-', or '+'");
    }
    if name.len() > MAX_INDEX_NAME_BYTES {
        return invalid("is too long, must be no longer than 255 bytes");
    }
    if name.chars().any(|c| c.is_uppercase()) {
        return invalid("must be lowercase");
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_CHARACTERS.contains(c)) {
        return invalid(&format!("must not contain '{}'", c));
    }
    Ok(())
}
