//! Import of OpenAddresses extracts into a partitioned `city -> street -> house` database.
//!
//! Each file of an extract is normalized on its own by a worker thread, then loaded with a single
//! bulk operation per table. Foreign keys and indexes are only built once every file is loaded.

pub mod bulk;
pub mod config;
mod error;
pub mod hierarchy;
pub mod orchestrator;
pub mod partition;
pub mod pool;
pub mod status;
pub mod store;
pub mod summary;

pub use config::ImportConfig;
pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, Phase};
pub use store::{Store, StoreTarget};

#[cfg(test)]
mod tests;
