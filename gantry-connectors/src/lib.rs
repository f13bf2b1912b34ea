//! HTTP connectors for gantry.
//!
//! - [`ClickhouseClient`]: executes ingest statements over the ClickHouse
//!   HTTP interface
//! - [`ClickhouseTableDiscovery`]: reads table definitions from
//!   `system.columns` and `system.tables`, merged with stored virtual tables
//! - [`ElasticClient`]: lists Elasticsearch indices via `_resolve/index`

pub mod clickhouse;
pub mod discovery;
pub mod elastic;
pub mod error;

pub use clickhouse::ClickhouseClient;
pub use discovery::ClickhouseTableDiscovery;
pub use elastic::ElasticClient;
pub use error::{ConnectorError, Result};
