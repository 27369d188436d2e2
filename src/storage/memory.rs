//! In-memory repository for tests and dry runs

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::AnalysisRepository;
use crate::types::{AnalysisJob, AnalysisStats, AnalysisStatus, BlacklistEntry};

#[derive(Default)]
pub struct InMemoryRepository {
    jobs: RwLock<HashMap<String, AnalysisJob>>,
    /// Every status written per job, in save order
    history: RwLock<HashMap<String, Vec<AnalysisStatus>>>,
    blacklist: RwLock<HashMap<String, BlacklistEntry>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statuses persisted for `job_id`, oldest first
    pub async fn status_history(&self, job_id: &str) -> Vec<AnalysisStatus> {
        self.history
            .read()
            .await
            .get(job_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn all_jobs(&self) -> Vec<AnalysisJob> {
        self.jobs.read().await.values().cloned().collect()
    }

    pub async fn jobs_for_token(&self, token_address: &str) -> Vec<AnalysisJob> {
        let needle = token_address.to_lowercase();
        self.jobs
            .read()
            .await
            .values()
            .filter(|job| job.token_address.to_lowercase() == needle)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AnalysisRepository for InMemoryRepository {
    async fn save_analysis(&self, job: &AnalysisJob) -> Result<()> {
        self.jobs
            .write()
            .await
            .insert(job.job_id.clone(), job.clone());

        let mut history = self.history.write().await;
        let statuses = history.entry(job.job_id.clone()).or_default();
        if statuses.last() != Some(&job.status) {
            statuses.push(job.status);
        }
        Ok(())
    }

    async fn get_analysis(&self, job_id: &str) -> Result<Option<AnalysisJob>> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn is_token_analyzed(&self, token_address: &str, hours: u32) -> Result<bool> {
        let cutoff = Utc::now() - Duration::hours(i64::from(hours));
        let needle = token_address.to_lowercase();
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .any(|job| job.token_address.to_lowercase() == needle && job.created_at > cutoff))
    }

    async fn is_blacklisted(&self, address: &str) -> Result<Option<BlacklistEntry>> {
        Ok(self
            .blacklist
            .read()
            .await
            .get(&address.to_lowercase())
            .cloned())
    }

    async fn add_to_blacklist(&self, entry: BlacklistEntry) -> Result<()> {
        self.blacklist
            .write()
            .await
            .insert(entry.address.to_lowercase(), entry);
        Ok(())
    }

    async fn get_stats(&self, window_hours: u32) -> Result<AnalysisStats> {
        let cutoff = Utc::now() - Duration::hours(i64::from(window_hours));
        let jobs = self.jobs.read().await;

        let mut stats = AnalysisStats {
            window_hours,
            ..Default::default()
        };
        let mut times = Vec::new();
        let mut confidences = Vec::new();

        for job in jobs.values().filter(|job| job.created_at >= cutoff) {
            stats.total += 1;
            *stats
                .by_status
                .entry(job.status.as_str().to_string())
                .or_insert(0) += 1;

            if let Some(breakdown) = &job.breakdown {
                *stats
                    .by_rating
                    .entry(breakdown.risk_rating.as_str().to_string())
                    .or_insert(0) += 1;
                times.push(breakdown.processing_time_seconds);
                confidences.push(breakdown.overall_confidence);
            }
        }

        let mean = |values: &[f64]| {
            (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
        };
        stats.avg_processing_time_secs = mean(&times);
        stats.avg_confidence = mean(&confidences);

        Ok(stats)
    }
}
