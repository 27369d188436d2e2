//! Breakdown delivery
//!
//! The job orchestrator only needs [`Publisher::publish_breakdown`]: a message
//! id when the breakdown went out, `None` when it was held back (review queue,
//! dry run).

pub mod formatter;
pub mod telegram;

pub use telegram::{AdminCommand, TelegramPublisher};

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::types::{AnalysisJob, TokenBreakdown};

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish_breakdown(
        &self,
        breakdown: &TokenBreakdown,
        job: &AnalysisJob,
    ) -> Result<Option<i64>>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Logs the rendered message instead of sending it
#[derive(Debug, Default)]
pub struct DryRunPublisher;

#[async_trait]
impl Publisher for DryRunPublisher {
    async fn publish_breakdown(
        &self,
        breakdown: &TokenBreakdown,
        job: &AnalysisJob,
    ) -> Result<Option<i64>> {
        info!(
            job_id = %job.job_id,
            review = breakdown.requires_human_review,
            "Dry run, not publishing:\n{}",
            formatter::format_breakdown(breakdown)
        );
        Ok(None)
    }
}
