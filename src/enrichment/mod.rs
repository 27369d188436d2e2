//! Enrichment pipeline
//!
//! Fans a token event out to three independent agents and joins the results.
//!
//! # Architecture
//! ```text
//!              ┌─→ DevResearcher ───┐
//! Contract ────┤                    ├─→ (contract, dev, metrics)
//!              └─→ MetricsFetcher ──┘
//! ```
//! Developer research needs the deployer address, so the contract analysis always
//! runs first in full mode. The fast mode skips developer research entirely and
//! runs contract + metrics concurrently.

pub mod contract_analyzer;
pub mod dev_osint;
pub mod onchain_metrics;

pub use contract_analyzer::GoPlusContractAnalyzer;
pub use dev_osint::TwitterDevResearcher;
pub use onchain_metrics::DexScreenerMetricsFetcher;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ThresholdConfig;
use crate::types::{AnalysisJob, AnalysisStatus, ContractAnalysis, DevProfile, OnChainMetrics, TokenEvent};
use crate::utils::{format_fdv, format_thousands};

/// Contract security analysis
#[async_trait]
pub trait ContractAnalyzer: Send + Sync {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn analyze(&self, event: &TokenEvent) -> Result<ContractAnalysis>;
}

/// Developer identity research
#[async_trait]
pub trait DevResearcher: Send + Sync {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn research(&self, event: &TokenEvent, contract: &ContractAnalysis) -> Result<DevProfile>;
}

/// Market and holder metrics
#[async_trait]
pub trait MetricsFetcher: Send + Sync {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch(
        &self,
        token_address: &str,
        pair_address: Option<&str>,
        chain_id: u64,
    ) -> Result<OnChainMetrics>;
}

/// Output of an enrichment pass. `dev_profile` is `None` in fast mode.
#[derive(Debug, Clone)]
pub struct Enrichment {
    pub contract: ContractAnalysis,
    pub dev_profile: Option<DevProfile>,
    pub metrics: OnChainMetrics,
}

pub struct EnrichmentPipeline {
    contract_analyzer: Arc<dyn ContractAnalyzer>,
    dev_researcher: Arc<dyn DevResearcher>,
    metrics_fetcher: Arc<dyn MetricsFetcher>,
    thresholds: ThresholdConfig,
}

impl EnrichmentPipeline {
    pub fn new(
        contract_analyzer: Arc<dyn ContractAnalyzer>,
        dev_researcher: Arc<dyn DevResearcher>,
        metrics_fetcher: Arc<dyn MetricsFetcher>,
        thresholds: ThresholdConfig,
    ) -> Self {
        Self {
            contract_analyzer,
            dev_researcher,
            metrics_fetcher,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    pub async fn initialize(&self) -> Result<()> {
        tokio::try_join!(
            self.contract_analyzer.initialize(),
            self.dev_researcher.initialize(),
            self.metrics_fetcher.initialize(),
        )?;
        info!("Enrichment agents initialized");
        Ok(())
    }

    /// Close every agent, logging (not propagating) individual failures
    pub async fn close(&self) {
        let (contract, dev, metrics) = tokio::join!(
            self.contract_analyzer.close(),
            self.dev_researcher.close(),
            self.metrics_fetcher.close(),
        );
        for (agent, result) in [("contract", contract), ("dev", dev), ("metrics", metrics)] {
            if let Err(e) = result {
                warn!(agent, error = %e, "Failed to close enrichment agent");
            }
        }
        info!("Enrichment agents closed");
    }

    /// Full enrichment: contract first, then dev research and metrics concurrently.
    ///
    /// With a job handle, each result is written into the job as it lands and the
    /// job is marked FAILED before an error is returned. A contract analysis
    /// already present on the job (from the fast pass) is reused.
    #[instrument(skip(self, event, job), fields(token = %event.token_address))]
    pub async fn enrich(
        &self,
        event: &TokenEvent,
        mut job: Option<&mut AnalysisJob>,
    ) -> Result<(ContractAnalysis, DevProfile, OnChainMetrics)> {
        if let Some(job) = job.as_deref_mut() {
            if job.status != AnalysisStatus::Enriching {
                job.advance(AnalysisStatus::Enriching)?;
            }
        }

        let result = self.run_full(event, job.as_deref_mut()).await;

        if let Err(e) = &result {
            error!(error = %e, "Enrichment failed");
            if let Some(job) = job {
                job.fail(e.to_string());
            }
        }
        result
    }

    async fn run_full(
        &self,
        event: &TokenEvent,
        mut job: Option<&mut AnalysisJob>,
    ) -> Result<(ContractAnalysis, DevProfile, OnChainMetrics)> {
        let prefetched = job.as_deref().and_then(|j| j.contract_analysis.clone());
        let contract = match prefetched {
            Some(contract) => {
                debug!("Reusing contract analysis from fast pass");
                contract
            }
            None => self.contract_analyzer.analyze(event).await?,
        };
        if let Some(job) = job.as_deref_mut() {
            job.contract_analysis = Some(contract.clone());
            job.updated_at = Utc::now();
        }

        let (dev, metrics) = tokio::try_join!(
            self.dev_researcher.research(event, &contract),
            self.metrics_fetcher.fetch(
                &event.token_address,
                event.pair_address.as_deref(),
                event.chain_id
            ),
        )?;

        if let Some(job) = job {
            job.dev_profile = Some(dev.clone());
            job.on_chain_metrics = Some(metrics.clone());
            job.updated_at = Utc::now();
        }

        info!(
            liquidity = metrics.liquidity_usd,
            holders = metrics.holder_count,
            anonymous = dev.is_anonymous,
            "Enrichment complete"
        );
        Ok((contract, dev, metrics))
    }

    /// Contract + metrics only. Used for the early skip check.
    #[instrument(skip(self, event), fields(token = %event.token_address))]
    pub async fn enrich_fast(&self, event: &TokenEvent) -> Result<Enrichment> {
        let (contract, metrics) = tokio::try_join!(
            self.contract_analyzer.analyze(event),
            self.metrics_fetcher.fetch(
                &event.token_address,
                event.pair_address.as_deref(),
                event.chain_id
            ),
        )?;

        Ok(Enrichment {
            contract,
            dev_profile: None,
            metrics,
        })
    }

    /// First violated threshold, checked in fixed order: liquidity, holders,
    /// concentration, age. `None` means the token passes.
    pub fn should_skip_token(&self, event: &TokenEvent, metrics: &OnChainMetrics) -> Option<String> {
        let t = &self.thresholds;

        let reason = if metrics.liquidity_usd < t.min_liquidity_usd {
            format!("Low liquidity: ${}", format_thousands(metrics.liquidity_usd))
        } else if metrics.holder_count < t.min_holders {
            format!("Low holder count: {}", metrics.holder_count)
        } else if metrics.top_10_holder_pct > t.max_top_holder_percent {
            format!("High concentration: {:.1}%", metrics.top_10_holder_pct)
        } else if metrics.token_age_hours > t.max_token_age_hours {
            if (t.max_token_age_hours - 168.0).abs() < f64::EPSILON {
                "Token too old (>1 week)".to_string()
            } else {
                format!("Token too old (>{:.0}h)", t.max_token_age_hours)
            }
        } else {
            return None;
        };

        debug!(token = %event.token_address, reason = %reason, "Skip threshold hit");
        Some(reason)
    }

    /// Re-fetch metrics right before publication so FDV and price are current
    #[instrument(skip(self, job), fields(job_id = %job.job_id))]
    pub async fn refresh_before_publish(&self, job: &mut AnalysisJob) -> Result<()> {
        let previous = job
            .on_chain_metrics
            .as_ref()
            .ok_or_else(|| anyhow!("No existing metrics to refresh"))?;
        let pair = previous.pair_address.clone().or_else(|| job.event.pair_address.clone());

        let fresh = self
            .metrics_fetcher
            .fetch(&job.token_address, pair.as_deref(), job.event.chain_id)
            .await?;

        debug!(
            old_fdv = previous.fdv_usd,
            new_fdv = fresh.fdv_usd,
            "Metrics refreshed before publish"
        );

        if let Some(breakdown) = job.breakdown.as_mut() {
            breakdown.fdv_usd = fresh.fdv_usd;
            breakdown.fdv_display = format_fdv(fresh.fdv_usd);
            breakdown.on_chain_metrics = Some(fresh.clone());
        }
        job.on_chain_metrics = Some(fresh);
        job.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedContract;
    #[async_trait]
    impl ContractAnalyzer for FixedContract {
        async fn analyze(&self, event: &TokenEvent) -> Result<ContractAnalysis> {
            Ok(ContractAnalysis {
                token_address: event.token_address.clone(),
                deployer_address: Some("0xdeployer".to_string()),
                ..Default::default()
            })
        }
    }

    struct FailingDev;
    #[async_trait]
    impl DevResearcher for FailingDev {
        async fn research(&self, _: &TokenEvent, _: &ContractAnalysis) -> Result<DevProfile> {
            Err(anyhow!("twitter unavailable"))
        }
    }

    struct CountingMetrics {
        calls: AtomicUsize,
        liquidity: f64,
    }
    #[async_trait]
    impl MetricsFetcher for CountingMetrics {
        async fn fetch(&self, token: &str, _: Option<&str>, _: u64) -> Result<OnChainMetrics> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(OnChainMetrics {
                token_address: token.to_string(),
                liquidity_usd: self.liquidity,
                fdv_usd: 1_000_000.0 * (n as f64 + 1.0),
                holder_count: 300,
                ..Default::default()
            })
        }
    }

    fn pipeline(thresholds: ThresholdConfig) -> EnrichmentPipeline {
        EnrichmentPipeline::new(
            Arc::new(FixedContract),
            Arc::new(FailingDev),
            Arc::new(CountingMetrics {
                calls: AtomicUsize::new(0),
                liquidity: 80_000.0,
            }),
            thresholds,
        )
    }

    fn event() -> TokenEvent {
        TokenEvent::new("0xabc", EventSource::Feed, 8453)
    }

    #[test]
    fn test_skip_reports_first_violation() {
        let p = pipeline(ThresholdConfig {
            min_liquidity_usd: 20_000.0,
            ..Default::default()
        });
        let metrics = OnChainMetrics {
            liquidity_usd: 5_000.0,
            holder_count: 10,
            ..Default::default()
        };
        assert_eq!(
            p.should_skip_token(&event(), &metrics),
            Some("Low liquidity: $5,000".to_string())
        );
    }

    #[test]
    fn test_skip_threshold_order() {
        let p = pipeline(ThresholdConfig::default());
        let mut metrics = OnChainMetrics {
            liquidity_usd: 50_000.0,
            holder_count: 10,
            top_10_holder_pct: 80.0,
            token_age_hours: 500.0,
            ..Default::default()
        };
        assert_eq!(
            p.should_skip_token(&event(), &metrics).as_deref(),
            Some("Low holder count: 10")
        );

        metrics.holder_count = 500;
        assert_eq!(
            p.should_skip_token(&event(), &metrics).as_deref(),
            Some("High concentration: 80.0%")
        );

        metrics.top_10_holder_pct = 15.0;
        assert_eq!(
            p.should_skip_token(&event(), &metrics).as_deref(),
            Some("Token too old (>1 week)")
        );

        metrics.token_age_hours = 2.0;
        assert_eq!(p.should_skip_token(&event(), &metrics), None);
    }

    #[tokio::test]
    async fn test_enrich_fast_skips_dev_research() {
        let p = pipeline(ThresholdConfig::default());
        let result = p.enrich_fast(&event()).await.unwrap();
        assert!(result.dev_profile.is_none());
        assert_eq!(result.metrics.liquidity_usd, 80_000.0);
    }

    #[tokio::test]
    async fn test_enrich_failure_marks_job_failed() {
        let p = pipeline(ThresholdConfig::default());
        let ev = event();
        let mut job = AnalysisJob::new(ev.clone());

        let err = p.enrich(&ev, Some(&mut job)).await.unwrap_err();
        assert!(err.to_string().contains("twitter unavailable"));
        assert_eq!(job.status, AnalysisStatus::Failed);
        assert!(job.contract_analysis.is_some());
        assert_eq!(job.error_message.as_deref(), Some("twitter unavailable"));
    }

    #[tokio::test]
    async fn test_refresh_requires_existing_metrics() {
        let p = pipeline(ThresholdConfig::default());
        let mut job = AnalysisJob::new(event());
        let err = p.refresh_before_publish(&mut job).await.unwrap_err();
        assert_eq!(err.to_string(), "No existing metrics to refresh");
    }

    #[tokio::test]
    async fn test_refresh_replaces_metrics() {
        let p = pipeline(ThresholdConfig::default());
        let mut job = AnalysisJob::new(event());
        job.on_chain_metrics = Some(OnChainMetrics {
            fdv_usd: 1.0,
            ..Default::default()
        });

        p.refresh_before_publish(&mut job).await.unwrap();
        assert_eq!(job.on_chain_metrics.unwrap().fdv_usd, 1_000_000.0);
    }
}
