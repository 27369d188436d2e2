//! Job orchestration for the analysis pipeline
//!
//! Deduplicated events are queued into a bounded channel and drained by a
//! fixed pool of workers. Each worker runs one job end to end:
//!
//! ```text
//! recency ─> blacklist ─> PENDING ─> fast screen ─┬─> REJECTED
//!                                                 └─> ENRICHING ─> SYNTHESIZING
//!     ─> AWAITING_APPROVAL | APPROVED ─> refresh metrics ─> publish ─> PUBLISHED
//! ```
//!
//! # Key Features
//! - Every status transition is persisted before the worker moves on
//! - A failing job is recorded as FAILED and never stops its worker
//! - The active-job map is cleaned up by a drop guard, whatever the outcome
//! - A full queue drops the newest event and counts it

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{AppConfig, WorkerConfig};
use crate::delivery::{DryRunPublisher, Publisher, TelegramPublisher};
use crate::detection::{
    DetectorOrchestrator, EventCallback, FeedPoller, InMemoryDedupStore, SocialPoller, TwitterSearch,
};
use crate::enrichment::{
    DexScreenerMetricsFetcher, Enrichment, EnrichmentPipeline, GoPlusContractAnalyzer,
    TwitterDevResearcher,
};
use crate::observability::PipelineMetrics;
use crate::storage::{AnalysisRepository, SqliteRepository};
use crate::synthesis::{BreakdownSynthesizer, LlmClient, Synthesizer};
use crate::types::{AnalysisJob, AnalysisStatus, StageOutcome, TokenBreakdown, TokenEvent};
use crate::validation::validate_evm_address;

/// Grace period for workers to finish their current job on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Collaborators shared by every worker
pub struct PipelineComponents {
    pub enrichment: Arc<EnrichmentPipeline>,
    pub synthesizer: Arc<dyn BreakdownSynthesizer>,
    pub publisher: Arc<dyn Publisher>,
    pub repository: Arc<dyn AnalysisRepository>,
    pub metrics: Option<PipelineMetrics>,
}

/// What happened to an event handed to [`JobOrchestrator::enqueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// Queue full or closed; the event was discarded
    Dropped,
}

#[derive(Debug, Default)]
struct JobCounters {
    detected: AtomicU64,
    analyzed: AtomicU64,
    published: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    skipped: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of the running counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestratorStats {
    pub tokens_detected: u64,
    pub tokens_analyzed: u64,
    pub tokens_published: u64,
    pub tokens_failed: u64,
    pub tokens_rejected: u64,
    pub tokens_skipped: u64,
    pub queue_dropped: u64,
    pub active_jobs: usize,
    pub queue_depth: usize,
}

/// In-flight job entry
#[derive(Debug, Clone)]
pub struct ActiveJob {
    pub job_id: String,
    pub token_address: String,
    pub started_at: Instant,
}

type ActiveJobs = Arc<StdMutex<HashMap<String, ActiveJob>>>;

/// Removes its job from the active map when dropped
struct ActiveJobGuard {
    active: ActiveJobs,
    job_id: String,
    metrics: Option<PipelineMetrics>,
}

impl ActiveJobGuard {
    fn register(active: &ActiveJobs, job: &AnalysisJob, metrics: Option<PipelineMetrics>) -> Self {
        if let Ok(mut map) = active.lock() {
            map.insert(
                job.job_id.clone(),
                ActiveJob {
                    job_id: job.job_id.clone(),
                    token_address: job.token_address.clone(),
                    started_at: Instant::now(),
                },
            );
        }
        if let Some(metrics) = &metrics {
            metrics.active_jobs.inc();
        }
        Self {
            active: active.clone(),
            job_id: job.job_id.clone(),
            metrics,
        }
    }
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        if let Ok(mut map) = self.active.lock() {
            map.remove(&self.job_id);
        }
        if let Some(metrics) = &self.metrics {
            metrics.active_jobs.dec();
        }
    }
}

/// Coordinates graceful shutdown of background tasks
pub struct ShutdownCoordinator {
    handles: Vec<JoinHandle<()>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
        }
    }

    pub fn add_handle(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait up to `grace` for each task, aborting any that overrun
    pub async fn shutdown(&mut self, grace: Duration) {
        info!("Waiting for {} background tasks", self.handles.len());
        for mut handle in self.handles.drain(..) {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                warn!("Background task did not stop within {:?}, aborting", grace);
                handle.abort();
            }
        }
        info!("All background tasks stopped");
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-job procedure, shared by the workers and manual analysis
struct JobRunner {
    components: PipelineComponents,
    recency_window_hours: u32,
    active: ActiveJobs,
    counters: JobCounters,
}

impl JobRunner {
    async fn persist(&self, job: &AnalysisJob) -> Result<()> {
        self.components.repository.save_analysis(job).await.map_err(|e| {
            error!(job_id = %job.job_id, status = %job.status, error = %e, "Failed to persist job");
            e
        })
    }

    /// Recency and blacklist gate. `Some(reason)` means the event is dropped
    /// without creating a job.
    async fn admission(&self, event: &TokenEvent) -> Result<Option<String>> {
        let address = event.normalized_address();
        let repository = &self.components.repository;

        if repository
            .is_token_analyzed(&address, self.recency_window_hours)
            .await?
        {
            return Ok(Some(format!(
                "analyzed within the last {}h",
                self.recency_window_hours
            )));
        }
        if let Some(entry) = repository.is_blacklisted(&address).await? {
            return Ok(Some(format!("blacklisted: {}", entry.reason)));
        }
        Ok(None)
    }

    /// Contract + metrics, then the skip thresholds
    async fn screen(&self, event: &TokenEvent) -> StageOutcome<Enrichment> {
        let enrichment = &self.components.enrichment;
        match enrichment.enrich_fast(event).await {
            Ok(fast) => match enrichment.should_skip_token(event, &fast.metrics) {
                Some(reason) => StageOutcome::Skipped(reason),
                None => StageOutcome::Completed(fast),
            },
            Err(e) => StageOutcome::Failed(format!("Fast enrichment failed: {:#}", e)),
        }
    }

    /// Run `event` through the pipeline. Returns the final job, or `None`
    /// when the admission gate dropped the event.
    #[instrument(skip(self, event), fields(token = %event.token_address, source = event.source.name()))]
    async fn process(&self, event: TokenEvent) -> Result<Option<AnalysisJob>> {
        if let Some(reason) = self.admission(&event).await? {
            info!("Skipping {}: {}", event.token_address, reason);
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        let mut job = AnalysisJob::new(event);
        let _guard = ActiveJobGuard::register(&self.active, &job, self.components.metrics.clone());
        let started = Instant::now();
        info!(job_id = %job.job_id, "Starting analysis");

        self.persist(&job).await?;

        if let Err(e) = self.run_stages(&mut job).await {
            error!(job_id = %job.job_id, error = %e, "Analysis failed");
            job.fail(format!("{:#}", e));
        }

        // A reviewer may have approved or rejected while the breakdown was
        // being handed over; their stored outcome wins.
        if job.status == AnalysisStatus::AwaitingApproval {
            if let Some(stored) = self.components.repository.get_analysis(&job.job_id).await? {
                if stored.status.is_terminal() {
                    debug!(job_id = %job.job_id, status = %stored.status, "Review already settled");
                    job = stored;
                }
            }
        }

        self.persist(&job).await?;
        self.record_outcome(&job, started.elapsed());
        Ok(Some(job))
    }

    async fn run_stages(&self, job: &mut AnalysisJob) -> Result<()> {
        let components = &self.components;
        let event = job.event.clone();

        let fast = match self.screen(&event).await {
            StageOutcome::Completed(fast) => fast,
            StageOutcome::Skipped(reason) => {
                info!(job_id = %job.job_id, "Rejected: {}", reason);
                job.reject(reason)?;
                return Ok(());
            }
            StageOutcome::Failed(reason) => return Err(anyhow!(reason)),
        };
        job.contract_analysis = Some(fast.contract);
        job.on_chain_metrics = Some(fast.metrics);

        job.advance(AnalysisStatus::Enriching)?;
        self.persist(job).await?;
        let (contract, dev, metrics) = components.enrichment.enrich(&event, Some(&mut *job)).await?;

        job.advance(AnalysisStatus::Synthesizing)?;
        self.persist(job).await?;
        components
            .synthesizer
            .synthesize(&contract, &dev, &metrics, Some(&mut *job))
            .await?;
        self.persist(job).await?;

        components
            .enrichment
            .refresh_before_publish(job)
            .await
            .context("Metrics refresh before publish failed")?;

        let breakdown = job
            .breakdown
            .clone()
            .ok_or_else(|| anyhow!("Synthesis produced no breakdown"))?;
        match components.publisher.publish_breakdown(&breakdown, job).await? {
            Some(message_id) => {
                job.mark_published(message_id)?;
                info!(job_id = %job.job_id, message_id, "Published {}", breakdown.symbol);
            }
            None => debug!(job_id = %job.job_id, status = %job.status, "Breakdown not published"),
        }
        Ok(())
    }

    fn record_outcome(&self, job: &AnalysisJob, elapsed: Duration) {
        let metrics = self.components.metrics.as_ref();
        if let Some(metrics) = metrics {
            metrics.analysis_duration.observe(elapsed.as_secs_f64());
        }

        if job.breakdown.is_some() {
            self.counters.analyzed.fetch_add(1, Ordering::Relaxed);
            if let Some(metrics) = metrics {
                metrics.jobs_analyzed.inc();
            }
        }

        match job.status {
            AnalysisStatus::Published => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = metrics {
                    metrics.jobs_published.inc();
                }
            }
            AnalysisStatus::Failed => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = metrics {
                    metrics.jobs_failed.inc();
                }
            }
            AnalysisStatus::Rejected => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = metrics {
                    metrics.jobs_rejected.inc();
                }
            }
            _ => {}
        }

        info!(
            job_id = %job.job_id,
            status = %job.status,
            "Job finished in {:.2}s",
            elapsed.as_secs_f64()
        );
    }
}

pub struct JobOrchestrator {
    runner: Arc<JobRunner>,
    chain_id: u64,
    worker_count: usize,
    stats_interval: Duration,
    sender: mpsc::Sender<TokenEvent>,
    receiver: Arc<Mutex<mpsc::Receiver<TokenEvent>>>,
    started: AtomicBool,
    cancel: CancellationToken,
    shutdown: Mutex<ShutdownCoordinator>,
}

impl JobOrchestrator {
    pub fn new(components: PipelineComponents, config: &WorkerConfig, chain_id: u64) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            runner: Arc::new(JobRunner {
                components,
                recency_window_hours: config.recency_window_hours,
                active: Arc::new(StdMutex::new(HashMap::new())),
                counters: JobCounters::default(),
            }),
            chain_id,
            worker_count: config.worker_count.max(1),
            stats_interval: Duration::from_secs(config.stats_interval_secs.max(1)),
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            shutdown: Mutex::new(ShutdownCoordinator::new()),
        }
    }

    /// Spawn the worker pool and the statistics reporter
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(anyhow!("Job orchestrator already started"));
        }

        let mut shutdown = self.shutdown.lock().await;
        for worker_id in 0..self.worker_count {
            let runner = self.runner.clone();
            let receiver = self.receiver.clone();
            let cancel = self.cancel.clone();
            shutdown.add_handle(tokio::spawn(worker_loop(worker_id, runner, receiver, cancel)));
        }

        let runner = self.runner.clone();
        let cancel = self.cancel.clone();
        let period = self.stats_interval;
        let sender = self.sender.clone();
        shutdown.add_handle(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => report_stats(&runner, &sender).await,
                }
            }
        }));

        info!("Job orchestrator started with {} workers", self.worker_count);
        Ok(())
    }

    /// Stop workers, waiting for in-flight jobs, then close the publisher
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping job orchestrator");
        self.cancel.cancel();
        self.shutdown.lock().await.shutdown(SHUTDOWN_GRACE).await;

        if let Err(e) = self.runner.components.publisher.close().await {
            warn!(error = %e, "Failed to close publisher");
        }
        info!("Job orchestrator stopped");
        Ok(())
    }

    /// Queue an event for the worker pool; drops it when the queue is full
    pub fn enqueue(&self, event: TokenEvent) -> EnqueueOutcome {
        self.runner.counters.detected.fetch_add(1, Ordering::Relaxed);

        match self.sender.try_send(event) {
            Ok(()) => EnqueueOutcome::Enqueued,
            Err(e) => {
                let (reason, event) = match e {
                    mpsc::error::TrySendError::Full(event) => ("queue full", event),
                    mpsc::error::TrySendError::Closed(event) => ("queue closed", event),
                };
                warn!(token = %event.token_address, "Dropping token event: {}", reason);
                self.runner.counters.dropped.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.runner.components.metrics {
                    metrics.queue_dropped.inc();
                }
                EnqueueOutcome::Dropped
            }
        }
    }

    /// Analyze one token immediately, bypassing the queue.
    ///
    /// Returns the breakdown unless the token was skipped, rejected or failed.
    pub async fn analyze_manual(
        &self,
        token_address: &str,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<Option<TokenBreakdown>> {
        let address = validate_evm_address(token_address)?;
        let event = TokenEvent::manual(address, metadata, self.chain_id);
        info!("Manual analysis requested: {}", event.token_address);

        let job = self.runner.process(event).await?;
        Ok(job.and_then(|job| match job.status {
            AnalysisStatus::Failed | AnalysisStatus::Rejected => None,
            _ => job.breakdown,
        }))
    }

    pub fn active_jobs(&self) -> Vec<ActiveJob> {
        self.runner
            .active
            .lock()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> OrchestratorStats {
        snapshot(&self.runner, &self.sender)
    }
}

#[async_trait]
impl EventCallback for JobOrchestrator {
    async fn on_event(&self, event: TokenEvent) -> Result<()> {
        self.enqueue(event);
        Ok(())
    }
}

async fn worker_loop(
    worker_id: usize,
    runner: Arc<JobRunner>,
    receiver: Arc<Mutex<mpsc::Receiver<TokenEvent>>>,
    cancel: CancellationToken,
) {
    debug!(worker_id, "Worker started");
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = async { receiver.lock().await.recv().await } => next,
        };
        let Some(event) = next else {
            break;
        };

        if let Err(e) = runner.process(event).await {
            error!(worker_id, error = %e, "Job processing error");
        }
    }
    debug!(worker_id, "Worker stopped");
}

fn snapshot(runner: &JobRunner, sender: &mpsc::Sender<TokenEvent>) -> OrchestratorStats {
    let c = &runner.counters;
    OrchestratorStats {
        tokens_detected: c.detected.load(Ordering::Relaxed),
        tokens_analyzed: c.analyzed.load(Ordering::Relaxed),
        tokens_published: c.published.load(Ordering::Relaxed),
        tokens_failed: c.failed.load(Ordering::Relaxed),
        tokens_rejected: c.rejected.load(Ordering::Relaxed),
        tokens_skipped: c.skipped.load(Ordering::Relaxed),
        queue_dropped: c.dropped.load(Ordering::Relaxed),
        active_jobs: runner.active.lock().map(|m| m.len()).unwrap_or(0),
        queue_depth: sender.max_capacity() - sender.capacity(),
    }
}

async fn report_stats(runner: &JobRunner, sender: &mpsc::Sender<TokenEvent>) {
    let stats = snapshot(runner, sender);
    info!(
        detected = stats.tokens_detected,
        analyzed = stats.tokens_analyzed,
        published = stats.tokens_published,
        failed = stats.tokens_failed,
        rejected = stats.tokens_rejected,
        skipped = stats.tokens_skipped,
        dropped = stats.queue_dropped,
        active = stats.active_jobs,
        queued = stats.queue_depth,
        "Pipeline stats"
    );

    match runner.components.repository.get_stats(24).await {
        Ok(stored) => info!(
            total = stored.total,
            avg_confidence = stored.avg_confidence.unwrap_or_default(),
            "Stored analyses (24h)"
        ),
        Err(e) => warn!(error = %e, "Failed to load stored stats"),
    }
}

/// Builds pipeline components from configuration
pub struct SystemInitializer;

impl SystemInitializer {
    pub async fn init_repository(config: &AppConfig) -> Result<Arc<dyn AnalysisRepository>> {
        let repository = SqliteRepository::new(&config.database_path, 5)
            .await
            .with_context(|| format!("Failed to open database {}", config.database_path))?;
        Ok(Arc::new(repository))
    }

    pub fn init_enrichment(config: &AppConfig) -> Result<Arc<EnrichmentPipeline>> {
        let providers = &config.providers;
        Ok(Arc::new(EnrichmentPipeline::new(
            Arc::new(GoPlusContractAnalyzer::new(providers)?),
            Arc::new(TwitterDevResearcher::new(providers)?),
            Arc::new(DexScreenerMetricsFetcher::new(providers)?),
            config.thresholds.clone(),
        )))
    }

    pub fn init_synthesizer(config: &AppConfig) -> Result<Arc<Synthesizer>> {
        let llm = LlmClient::from_config(&config.llm)?;
        info!("Language model provider: {}", llm.provider_name());
        Ok(Arc::new(Synthesizer::new(
            llm,
            config.synthesis.clone(),
            config.chain_id,
        )))
    }

    /// Telegram when configured and not a dry run, otherwise the dry-run
    /// publisher. The Telegram handle is returned for the admin command loop.
    pub fn init_publisher(
        config: &AppConfig,
        repository: Arc<dyn AnalysisRepository>,
        dry_run: bool,
    ) -> Result<(Arc<dyn Publisher>, Option<Arc<TelegramPublisher>>)> {
        let delivery = &config.delivery;
        let telegram_configured =
            delivery.telegram_bot_token.is_some() && delivery.telegram_channel_id.is_some();
        if dry_run || !telegram_configured {
            if dry_run {
                info!("Dry run: breakdowns will be logged, not published");
            } else {
                warn!("Telegram not configured, falling back to dry-run publisher");
            }
            let publisher: Arc<dyn Publisher> = Arc::new(DryRunPublisher);
            return Ok((publisher, None));
        }

        let telegram = Arc::new(TelegramPublisher::new(delivery)?.with_repository(repository));
        let publisher: Arc<dyn Publisher> = telegram.clone();
        Ok((publisher, Some(telegram)))
    }

    /// Detector with every enabled discovery source
    pub fn init_detection(
        config: &AppConfig,
        metrics: Option<PipelineMetrics>,
    ) -> Result<DetectorOrchestrator> {
        let detection = &config.detection;
        let mut detector = DetectorOrchestrator::with_store(
            detection,
            config.chain_id,
            Box::new(InMemoryDedupStore::new()),
            metrics,
        );

        if detection.enable_feed {
            detector.add_source(Arc::new(FeedPoller::new(
                detection,
                &config.providers,
                config.chain_id,
            )?));
        }
        if detection.enable_social {
            match TwitterSearch::new(&config.providers) {
                Ok(search) => detector.add_source(Arc::new(SocialPoller::new(
                    Arc::new(search),
                    detection,
                    config.chain_id,
                )?)),
                Err(e) => warn!(error = %e, "Social poller disabled"),
            }
        }
        Ok(detector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventSource;

    #[test]
    fn test_guard_removes_job_on_drop() {
        let active: ActiveJobs = Arc::new(StdMutex::new(HashMap::new()));
        let job = AnalysisJob::new(TokenEvent::new("0xabc", EventSource::Manual, 8453));

        {
            let _guard = ActiveJobGuard::register(&active, &job, None);
            assert!(active.lock().unwrap().contains_key(&job.job_id));
        }
        assert!(active.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_coordinator_aborts_stuck_tasks() {
        let mut coordinator = ShutdownCoordinator::new();
        coordinator.add_handle(tokio::spawn(async {}));
        coordinator.add_handle(tokio::spawn(std::future::pending::<()>()));
        assert_eq!(coordinator.len(), 2);

        coordinator.shutdown(Duration::from_millis(50)).await;
        assert!(coordinator.is_empty());
    }
}
