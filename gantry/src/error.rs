use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("table {0} not found")]
    TableNotFound(String),

    #[error("table {0} is closed")]
    TableClosed(String),

    #[error("Invalid index name: {0}")]
    InvalidIndexName(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Ingest error: {0}")]
    Ingest(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("error executing {phase} statement: {message}")]
    Execution {
        phase: StatementPhase,
        message: String,
    },

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Storage error: {0}")]
    Storage(#[from] gantry_storage::StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Routing failures carried inside a [`crate::resolver::Decision`].
///
/// These are end-user facing configuration or ambiguity errors; they are
/// never retried. The type is `Clone + Eq` so decisions stay comparable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("pattern is not allowed: [{0}]")]
    PatternNotAllowed(String),

    #[error("unsupported target '{target}' configured for index [{index}]")]
    UnsupportedTarget { index: String, target: String },

    #[error("too many backend connectors ({count}) configured for index [{index}]")]
    TooManyTargets { index: String, count: usize },

    #[error("target '{target}' configured twice for index [{index}]")]
    DuplicateTarget { index: String, target: String },

    #[error("common table [{0}] is not allowed to be queried directly")]
    CommonTableAccessed(String),

    #[error(
        "index pattern [{pattern}] resolved to both elasticsearch indices {elastic:?} and clickhouse tables {clickhouse:?}"
    )]
    AmbiguousPattern {
        pattern: String,
        elastic: Vec<String>,
        clickhouse: Vec<String>,
    },

    #[error(
        "index pattern [{pattern}] resolved to common table indexes and elasticsearch indices {elastic:?}, common tables for elastic are unsupported"
    )]
    CommonTableWithElastic { pattern: String, elastic: Vec<String> },

    #[error("index pattern [{pattern}] resolved to multiple clickhouse tables {tables:?}")]
    MultipleTables { pattern: String, tables: Vec<String> },

    #[error("index pattern [{pattern}] cannot be served: {reason}")]
    IncompatibleParts { pattern: String, reason: String },

    #[error("pipeline not found: {0}")]
    PipelineNotFound(String),
}

/// Which kind of statement failed while executing a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementPhase {
    Create,
    Alter,
    Insert,
}

impl fmt::Display for StatementPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatementPhase::Create => "create",
            StatementPhase::Alter => "alter",
            StatementPhase::Insert => "insert",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_carries_phase() {
        let err = Error::Execution {
            phase: StatementPhase::Alter,
            message: "Code: 44".to_string(),
        };
        assert_eq!(err.to_string(), "error executing alter statement: Code: 44");
    }

    #[test]
    fn test_resolve_error_is_transparent() {
        let err: Error = ResolveError::PatternNotAllowed("logs-*".to_string()).into();
        assert_eq!(err.to_string(), "pattern is not allowed: [logs-*]");
    }

    #[test]
    fn test_table_states_render_distinctly() {
        assert_eq!(
            Error::TableNotFound("logs".into()).to_string(),
            "table logs not found"
        );
        assert_eq!(
            Error::TableClosed("logs".into()).to_string(),
            "table logs is closed"
        );
    }
}
