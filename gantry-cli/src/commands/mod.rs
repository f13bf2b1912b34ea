pub mod init;
pub mod ingest;
pub mod resolve;
pub mod serve;

pub use init::run_init_config;
pub use ingest::run_ingest;
pub use resolve::run_resolve;
pub use serve::run_serve;
