//! Routing outcome of one (pipeline, index pattern) resolution.

use serde::{Serialize, Serializer};
use std::fmt;

use crate::error::ResolveError;

/// Backend chosen for a request. Consumers match exhaustively so a new
/// backend cannot be added without touching every routing site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "connector", rename_all = "snake_case")]
pub enum ConnectorDecision {
    Elastic {
        /// Request targets Elasticsearch/Kibana internals
        management_call: bool,
    },
    Clickhouse {
        table_name: String,
        indexes: Vec<String>,
        is_common_table: bool,
    },
}

impl ConnectorDecision {
    pub fn elastic() -> Self {
        ConnectorDecision::Elastic {
            management_call: false,
        }
    }

    /// Dedicated ClickHouse table serving one index.
    pub fn clickhouse(table_name: impl Into<String>, index: impl Into<String>) -> Self {
        ConnectorDecision::Clickhouse {
            table_name: table_name.into(),
            indexes: vec![index.into()],
            is_common_table: false,
        }
    }

    /// Shared table holding rows for `indexes`.
    pub fn common_table(indexes: Vec<String>) -> Self {
        ConnectorDecision::Clickhouse {
            table_name: crate::common_table::TABLE_NAME.to_string(),
            indexes,
            is_common_table: true,
        }
    }

    pub fn is_elastic(&self) -> bool {
        matches!(self, ConnectorDecision::Elastic { .. })
    }
}

impl fmt::Display for ConnectorDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorDecision::Elastic { management_call } => {
                if *management_call {
                    write!(f, "elastic(management)")
                } else {
                    write!(f, "elastic")
                }
            }
            ConnectorDecision::Clickhouse {
                table_name,
                indexes,
                is_common_table,
            } => {
                write!(f, "clickhouse(table={}, indexes={:?}", table_name, indexes)?;
                if *is_common_table {
                    write!(f, ", common")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Exactly one decision is produced per resolution.
///
/// `is_closed`, `is_empty` and `err` are mutually distinct outcomes: a closed
/// index, a pattern that matched nothing, and a configuration error must each
/// be rendered differently by callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub is_closed: bool,
    pub is_empty: bool,
    #[serde(serialize_with = "serialize_err", skip_serializing_if = "Option::is_none")]
    pub err: Option<ResolveError>,
    pub use_connectors: Vec<ConnectorDecision>,
    pub message: String,
    pub resolver_name: String,
    pub index_pattern: String,
}

fn serialize_err<S: Serializer>(err: &Option<ResolveError>, s: S) -> Result<S::Ok, S::Error> {
    match err {
        Some(e) => s.serialize_str(&e.to_string()),
        None => s.serialize_none(),
    }
}

impl Decision {
    pub fn connectors(connectors: Vec<ConnectorDecision>, message: impl Into<String>) -> Self {
        Self {
            use_connectors: connectors,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn error(err: ResolveError, message: impl Into<String>) -> Self {
        Self {
            err: Some(err),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self {
            is_closed: true,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn empty(message: impl Into<String>) -> Self {
        Self {
            is_empty: true,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn is_err(&self) -> bool {
        self.err.is_some()
    }

    /// The ClickHouse connector, if any.
    pub fn clickhouse(&self) -> Option<&ConnectorDecision> {
        self.use_connectors
            .iter()
            .find(|c| matches!(c, ConnectorDecision::Clickhouse { .. }))
    }

    pub(crate) fn with_origin(mut self, resolver_name: &str, index_pattern: &str) -> Self {
        self.resolver_name = resolver_name.to_string();
        self.index_pattern = index_pattern.to_string();
        self
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(err) = &self.err {
            return write!(f, "Error: {}", err);
        }
        if self.is_closed {
            return write!(f, "Closed");
        }
        if self.is_empty {
            return write!(f, "Empty");
        }
        let parts: Vec<String> = self.use_connectors.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join(", "))?;
        if !self.message.is_empty() {
            write!(f, " ({})", self.message)?;
        }
        Ok(())
    }
}
