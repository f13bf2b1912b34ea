//! Document storage for gantry virtual table snapshots.
//!
//! Indexes that share the common ClickHouse table keep their apparent schema
//! as a small JSON document, one per logical index. This crate provides the
//! [`VirtualTableStorage`] trait and two backends:
//!
//! - [`LocalStorage`]: one file per key under a directory
//! - [`MemoryStorage`]: volatile, for tests and dry runs
//!
//! # Quick Start
//!
//! ```no_run
//! use gantry_storage::{LocalStorage, VirtualTableStorage};
//!
//! # async fn example() -> gantry_storage::Result<()> {
//! let storage = LocalStorage::new("./data/virtual_tables");
//! storage.put("logs-web", r#"{"version":"1","columns":[]}"#).await?;
//!
//! for key in storage.list().await? {
//!     println!("{}", key);
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod local;
mod memory;
mod traits;

pub use error::{Result, StorageError};
pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use traits::VirtualTableStorage;
