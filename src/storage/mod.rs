//! Job and blacklist persistence
//!
//! The orchestrator awaits every `save_analysis` call before moving a job on,
//! so a crash leaves the last recorded status in storage.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{AnalysisJob, AnalysisStats, BlacklistEntry};

#[async_trait]
pub trait AnalysisRepository: Send + Sync {
    /// Idempotent upsert keyed by `job_id`
    async fn save_analysis(&self, job: &AnalysisJob) -> Result<()>;

    async fn get_analysis(&self, job_id: &str) -> Result<Option<AnalysisJob>>;

    /// Whether any job for `token_address` was recorded in the last `hours`
    async fn is_token_analyzed(&self, token_address: &str, hours: u32) -> Result<bool>;

    async fn is_blacklisted(&self, address: &str) -> Result<Option<BlacklistEntry>>;

    /// Insert or replace a blacklist entry (keyed by lowercase address)
    async fn add_to_blacklist(&self, entry: BlacklistEntry) -> Result<()>;

    /// Aggregates over jobs created in the last `window_hours`
    async fn get_stats(&self, window_hours: u32) -> Result<AnalysisStats>;
}
