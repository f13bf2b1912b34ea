pub mod comment_metadata;
pub mod common_table;
pub mod config;
pub mod discovery;
pub mod error;
pub mod ingest;
pub mod resolver;
pub mod schema;

pub use config::GatewayConfig;
pub use error::{Error, Result};
pub use ingest::{IngestBackends, IngestProcessor};
pub use resolver::{ConnectorDecision, Decision, Pipeline, TableResolver};
