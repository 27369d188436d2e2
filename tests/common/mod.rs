//! Shared mocks for integration tests. No network access.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use token_analyst::config::{LlmConfig, SynthesisConfig, ThresholdConfig, WorkerConfig};
use token_analyst::delivery::Publisher;
use token_analyst::detection::{DiscoverySource, EventCallback, EventSink};
use token_analyst::enrichment::{ContractAnalyzer, DevResearcher, EnrichmentPipeline, MetricsFetcher};
use token_analyst::storage::{AnalysisRepository, InMemoryRepository};
use token_analyst::synthesis::llm::{DisabledProvider, LlmRequest};
use token_analyst::synthesis::{BreakdownSynthesizer, LlmClient, LlmError, LlmProvider, Synthesizer};
use token_analyst::types::{
    AnalysisJob, ContractAnalysis, DevProfile, EventSource, OnChainMetrics, TokenBreakdown,
    TokenEvent,
};
use token_analyst::{JobOrchestrator, PipelineComponents};

pub const CHAIN_ID: u64 = 8453;
pub const TOKEN_A: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const TOKEN_B: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

pub fn event(address: &str, source: EventSource) -> TokenEvent {
    TokenEvent::new(address, source, CHAIN_ID)
}

pub fn healthy_contract(address: &str) -> ContractAnalysis {
    ContractAnalysis {
        token_address: address.to_string(),
        symbol: Some("AAA".to_string()),
        name: Some("Triple A".to_string()),
        deployer_address: Some("0xdeployer".to_string()),
        is_renounced: true,
        ..Default::default()
    }
}

pub fn established_dev(address: &str) -> DevProfile {
    let mut dev = DevProfile::anonymous(address);
    dev.twitter_handle = Some("builder".to_string());
    dev.twitter_url = Some("https://twitter.com/builder".to_string());
    dev.twitter_followers = 5_000;
    dev.twitter_account_age_days = 400;
    dev.is_anonymous = false;
    dev
}

/// $80k liquidity, 300 holders, 20% top-10, 2h old
pub fn healthy_metrics(address: &str) -> OnChainMetrics {
    OnChainMetrics {
        token_address: address.to_string(),
        fdv_usd: 2_500_000.0,
        liquidity_usd: 80_000.0,
        holder_count: 300,
        top_10_holder_pct: 20.0,
        token_age_hours: 2.0,
        ..Default::default()
    }
}

pub struct MockContract {
    pub honeypot: bool,
}

#[async_trait]
impl ContractAnalyzer for MockContract {
    async fn analyze(&self, event: &TokenEvent) -> Result<ContractAnalysis> {
        let mut contract = healthy_contract(&event.token_address);
        if self.honeypot {
            contract.is_honeypot = true;
            contract.is_renounced = false;
            contract.honeypot_reason = Some("sell tax 99%".to_string());
        }
        Ok(contract)
    }
}

pub struct MockDev {
    pub fail: bool,
}

#[async_trait]
impl DevResearcher for MockDev {
    async fn research(&self, event: &TokenEvent, _contract: &ContractAnalysis) -> Result<DevProfile> {
        if self.fail {
            return Err(anyhow!("twitter lookup exploded"));
        }
        Ok(established_dev(&event.token_address))
    }
}

/// Call order per job: fast enrichment, full enrichment, pre-publish refresh
pub const REFRESH_CALL: usize = 3;

pub struct MockMetrics {
    pub template: OnChainMetrics,
    pub calls: AtomicUsize,
    /// 1-based call number from which every fetch fails
    pub fail_from_call: Option<usize>,
}

impl MockMetrics {
    pub fn new(template: OnChainMetrics) -> Self {
        Self {
            template,
            calls: AtomicUsize::new(0),
            fail_from_call: None,
        }
    }
}

#[async_trait]
impl MetricsFetcher for MockMetrics {
    async fn fetch(&self, token: &str, _pair: Option<&str>, _chain_id: u64) -> Result<OnChainMetrics> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_from_call.is_some_and(|n| call >= n) {
            return Err(anyhow!("dexscreener down"));
        }
        Ok(OnChainMetrics {
            token_address: token.to_string(),
            ..self.template.clone()
        })
    }
}

/// Returns a fixed completion
pub struct ScriptedProvider(pub String);

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn complete(&self, _request: &LlmRequest) -> Result<String, LlmError> {
        Ok(self.0.clone())
    }
}

/// Synthesis that always errors after the job reaches SYNTHESIZING
pub struct BrokenSynthesizer;

#[async_trait]
impl BreakdownSynthesizer for BrokenSynthesizer {
    async fn synthesize(
        &self,
        _contract: &ContractAnalysis,
        _dev: &DevProfile,
        _metrics: &OnChainMetrics,
        _job: Option<&mut AnalysisJob>,
    ) -> Result<TokenBreakdown> {
        Err(anyhow!("claim assembly panicked"))
    }
}

pub fn offline_llm() -> LlmClient {
    LlmClient::new(Arc::new(DisabledProvider::new("offline")), &LlmConfig::default())
}

pub fn scripted_llm(answer: &str) -> LlmClient {
    LlmClient::new(Arc::new(ScriptedProvider(answer.to_string())), &LlmConfig::default())
}

/// Records every breakdown; hands out message ids unless review is required
#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<(String, TokenBreakdown)>>,
    next_id: AtomicI64,
    pub fail: bool,
    /// Settles held breakdowns in storage before returning, like an admin
    /// answering the approval request straight away
    pub instant_reviewer: Option<Arc<InMemoryRepository>>,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish_breakdown(
        &self,
        breakdown: &TokenBreakdown,
        job: &AnalysisJob,
    ) -> Result<Option<i64>> {
        if self.fail {
            return Err(anyhow!("telegram is down"));
        }
        self.published
            .lock()
            .await
            .push((job.job_id.clone(), breakdown.clone()));
        if breakdown.requires_human_review {
            if let Some(repository) = &self.instant_reviewer {
                if let Some(mut stored) = repository.get_analysis(&job.job_id).await? {
                    stored.mark_published(999)?;
                    repository.save_analysis(&stored).await?;
                }
            }
            return Ok(None);
        }
        Ok(Some(self.next_id.fetch_add(1, Ordering::SeqCst) + 100))
    }
}

pub struct Harness {
    pub orchestrator: Arc<JobOrchestrator>,
    pub repository: Arc<InMemoryRepository>,
    pub publisher: Arc<RecordingPublisher>,
}

pub struct HarnessOptions {
    pub honeypot: bool,
    pub dev_fails: bool,
    pub publisher_fails: bool,
    pub refresh_fails: bool,
    pub synthesis_fails: bool,
    pub instant_review: bool,
    pub metrics: OnChainMetrics,
    pub require_human_approval: bool,
    pub llm: LlmClient,
    pub worker: WorkerConfig,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            honeypot: false,
            dev_fails: false,
            publisher_fails: false,
            refresh_fails: false,
            synthesis_fails: false,
            instant_review: false,
            metrics: healthy_metrics(TOKEN_A),
            require_human_approval: false,
            llm: offline_llm(),
            worker: WorkerConfig {
                worker_count: 2,
                queue_capacity: 16,
                recency_window_hours: 24,
                stats_interval_secs: 300,
            },
        }
    }
}

pub fn harness(options: HarnessOptions) -> Harness {
    let repository = Arc::new(InMemoryRepository::new());
    let mut publisher = if options.publisher_fails {
        RecordingPublisher::failing()
    } else {
        RecordingPublisher::default()
    };
    if options.instant_review {
        publisher.instant_reviewer = Some(repository.clone());
    }
    let publisher = Arc::new(publisher);

    let mut metrics = MockMetrics::new(options.metrics);
    if options.refresh_fails {
        metrics.fail_from_call = Some(REFRESH_CALL);
    }

    let enrichment = Arc::new(EnrichmentPipeline::new(
        Arc::new(MockContract {
            honeypot: options.honeypot,
        }),
        Arc::new(MockDev {
            fail: options.dev_fails,
        }),
        Arc::new(metrics),
        ThresholdConfig::default(),
    ));
    let synthesizer: Arc<dyn BreakdownSynthesizer> = if options.synthesis_fails {
        Arc::new(BrokenSynthesizer)
    } else {
        Arc::new(Synthesizer::new(
            options.llm,
            SynthesisConfig {
                require_human_approval: options.require_human_approval,
                ..Default::default()
            },
            CHAIN_ID,
        ))
    };

    let orchestrator = Arc::new(JobOrchestrator::new(
        PipelineComponents {
            enrichment,
            synthesizer,
            publisher: publisher.clone(),
            repository: repository.clone(),
            metrics: None,
        },
        &options.worker,
        CHAIN_ID,
    ));

    Harness {
        orchestrator,
        repository,
        publisher,
    }
}

/// Forwards every event it receives into a channel
pub struct ChannelCallback(pub mpsc::UnboundedSender<TokenEvent>);

#[async_trait]
impl EventCallback for ChannelCallback {
    async fn on_event(&self, event: TokenEvent) -> Result<()> {
        self.0
            .send(event)
            .map_err(|_| anyhow!("test receiver dropped"))
    }
}

pub struct FailingCallback {
    pub calls: AtomicUsize,
}

#[async_trait]
impl EventCallback for FailingCallback {
    async fn on_event(&self, _event: TokenEvent) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("callback failure"))
    }
}

/// Emits a fixed list of events with a delay before each, then idles
pub struct ScriptedSource {
    pub name: &'static str,
    pub script: Vec<(Duration, TokenEvent)>,
    pub fail_connect: bool,
}

#[async_trait]
impl DiscoverySource for ScriptedSource {
    fn name(&self) -> &str {
        self.name
    }

    async fn connect(&self) -> Result<()> {
        if self.fail_connect {
            return Err(anyhow!("{} unreachable", self.name));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn run(&self, sink: EventSink, cancel: CancellationToken) -> Result<()> {
        for (delay, event) in &self.script {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(*delay) => {}
            }
            sink.send(event.clone())
                .map_err(|_| anyhow!("detector queue closed"))?;
        }
        cancel.cancelled().await;
        Ok(())
    }
}
