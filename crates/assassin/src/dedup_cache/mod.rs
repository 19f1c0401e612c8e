//! Cross-instance de-duplication
//!
//! A single operation, `set_if_absent` with expiry, used to elect one acting
//! instance per time window.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{DedupBackend, DedupConfig};
use crate::database::Database;

pub mod database;
pub mod memory;

pub use database::DatabaseDedupCache;
pub use memory::MemoryDedupCache;

#[async_trait]
pub trait DedupCache: Send + Sync {
    /// Store `key` unless a live entry exists; `true` when this call stored it
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;
}

/// Build the dedup cache selected by the configuration
pub fn from_config(config: &DedupConfig, database: &Database) -> Arc<dyn DedupCache> {
    match config.backend {
        DedupBackend::Database => Arc::new(DatabaseDedupCache::new(database.connection())),
        DedupBackend::Memory => Arc::new(MemoryDedupCache::new()),
    }
}
