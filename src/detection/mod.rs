//! Discovery fan-in with cross-source deduplication
//!
//! # Architecture
//! ```text
//! FeedPoller ───┐
//! SocialPoller ─┼─> unbounded mpsc ─> consumer ─> DedupStore ─> callbacks (in order)
//! manual ───────┘                                    ↑
//!                                               sweep task
//! ```
//!
//! A single consumer makes every dedup decision, so two events for the same
//! address can never both reach the callbacks inside one window. The sweep
//! evicts entries older than the window so a token re-triggers analysis once
//! the window has lapsed.

pub mod sources;

pub use sources::{FeedPoller, SocialPoller, SocialSearch, TwitterSearch};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::DetectionConfig;
use crate::observability::PipelineMetrics;
use crate::types::TokenEvent;
use crate::validation::validate_evm_address;

/// Grace period for source tasks to observe cancellation before they are aborted
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub type EventSink = mpsc::UnboundedSender<TokenEvent>;

/// Address → first-seen event, keyed by insertion time
pub trait DedupStore: Send + Sync {
    fn insert(&mut self, key: String, event: TokenEvent, seen_at: Instant);

    fn lookup(&self, key: &str) -> Option<&TokenEvent>;

    /// Remove entries inserted before `cutoff`; returns how many were removed
    fn evict_older_than(&mut self, cutoff: Instant) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDedupStore {
    entries: HashMap<String, (TokenEvent, Instant)>,
}

impl InMemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DedupStore for InMemoryDedupStore {
    fn insert(&mut self, key: String, event: TokenEvent, seen_at: Instant) {
        self.entries.insert(key, (event, seen_at));
    }

    fn lookup(&self, key: &str) -> Option<&TokenEvent> {
        self.entries.get(key).map(|(event, _)| event)
    }

    fn evict_older_than(&mut self, cutoff: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, (_, seen_at)| *seen_at >= cutoff);
        before - self.entries.len()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A discovery source: chain listener, feed poller or social poller.
///
/// `run` is long-running and pushes every event it finds into `sink` until
/// `cancel` fires.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn run(&self, sink: EventSink, cancel: CancellationToken) -> Result<()>;
}

/// Consumer of deduplicated events
#[async_trait]
pub trait EventCallback: Send + Sync {
    async fn on_event(&self, event: TokenEvent) -> Result<()>;
}

/// Snapshot of detector state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorStats {
    pub running: bool,
    pub unique_tokens_seen: usize,
    pub sources: usize,
    pub active_tasks: usize,
}

/// Shared between the orchestrator handle and its background tasks
struct Dispatcher {
    dedup: Mutex<Box<dyn DedupStore>>,
    callbacks: RwLock<Vec<Arc<dyn EventCallback>>>,
    metrics: Option<PipelineMetrics>,
}

impl Dispatcher {
    async fn dispatch(&self, event: TokenEvent) {
        let key = event.normalized_address();
        {
            let mut dedup = self.dedup.lock().await;
            if let Some(first) = dedup.lookup(&key) {
                debug!(
                    token = %event.token_address,
                    source = event.source.name(),
                    first_source = first.source.name(),
                    "Duplicate token event filtered"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.duplicates_filtered.inc();
                }
                return;
            }
            dedup.insert(key, event.clone(), Instant::now());
        }

        if let Some(metrics) = &self.metrics {
            metrics.tokens_detected.inc();
        }
        info!(
            "New unique token: {} ({}) from {}",
            event.token_symbol.as_deref().unwrap_or("UNKNOWN"),
            event.token_address,
            event.source.name()
        );

        let callbacks = self.callbacks.read().await.clone();
        for callback in callbacks {
            if let Err(e) = callback.on_event(event.clone()).await {
                error!(token = %event.token_address, error = %e, "Event callback failed");
            }
        }
    }

    async fn sweep(&self, window: Duration) {
        let Some(cutoff) = Instant::now().checked_sub(window) else {
            return;
        };
        let removed = self.dedup.lock().await.evict_older_than(cutoff);
        if removed > 0 {
            debug!("Evicted {} tokens from dedup cache", removed);
        }
    }
}

pub struct DetectorOrchestrator {
    chain_id: u64,
    dedup_window: Duration,
    sweep_interval: Duration,
    sources: Vec<Arc<dyn DiscoverySource>>,
    dispatcher: Arc<Dispatcher>,
    sender: EventSink,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<TokenEvent>>>,
    connected: Mutex<Vec<Arc<dyn DiscoverySource>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl DetectorOrchestrator {
    pub fn new(config: &DetectionConfig, chain_id: u64) -> Self {
        Self::with_store(config, chain_id, Box::new(InMemoryDedupStore::new()), None)
    }

    pub fn with_store(
        config: &DetectionConfig,
        chain_id: u64,
        store: Box<dyn DedupStore>,
        metrics: Option<PipelineMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            chain_id,
            dedup_window: Duration::from_secs(config.dedup_window_secs),
            sweep_interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
            sources: Vec::new(),
            dispatcher: Arc::new(Dispatcher {
                dedup: Mutex::new(store),
                callbacks: RwLock::new(Vec::new()),
                metrics,
            }),
            sender,
            receiver: Mutex::new(Some(receiver)),
            connected: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Add a source; takes effect on the next `start`
    pub fn add_source(&mut self, source: Arc<dyn DiscoverySource>) {
        self.sources.push(source);
    }

    pub async fn register_callback(&self, callback: Arc<dyn EventCallback>) {
        self.dispatcher.callbacks.write().await.push(callback);
    }

    /// Connect and run every source, then start the consumer and the sweep.
    /// A source that fails to connect is logged and left out.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        let mut receiver = self
            .receiver
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("Detector orchestrator already started"))?;

        info!("Starting detector orchestrator with {} sources", self.sources.len());
        let mut tasks = self.tasks.lock().await;

        for source in &self.sources {
            if let Err(e) = source.connect().await {
                error!(source = source.name(), error = %e, "Discovery source failed to connect");
                continue;
            }
            self.connected.lock().await.push(source.clone());

            let source = source.clone();
            let sink = self.sender.clone();
            let cancel = self.cancel.child_token();
            tasks.push(tokio::spawn(async move {
                info!(source = source.name(), "Discovery source running");
                if let Err(e) = source.run(sink, cancel).await {
                    error!(source = source.name(), error = %e, "Discovery source stopped with error");
                }
            }));
        }

        let dispatcher = self.dispatcher.clone();
        let cancel = self.cancel.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = receiver.recv() => match event {
                        Some(event) => dispatcher.dispatch(event).await,
                        None => break,
                    },
                }
            }
            debug!("Detector consumer stopped");
        }));

        let dispatcher = self.dispatcher.clone();
        let cancel = self.cancel.clone();
        let window = self.dedup_window;
        let mut interval = tokio::time::interval(self.sweep_interval);
        tasks.push(tokio::spawn(async move {
            // First tick completes immediately
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => dispatcher.sweep(window).await,
                }
            }
        }));

        info!("Detector orchestrator started");
        Ok(())
    }

    /// Cancel background tasks, wait for them, then disconnect sources
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping detector orchestrator");
        self.cancel.cancel();

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for mut task in tasks {
            if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                warn!("Detector task ignored cancellation, aborting");
                task.abort();
            }
        }

        let connected: Vec<_> = self.connected.lock().await.drain(..).collect();
        let results = join_all(connected.iter().map(|source| source.disconnect())).await;
        for (source, result) in connected.iter().zip(results) {
            if let Err(e) = result {
                warn!(source = source.name(), error = %e, "Failed to disconnect discovery source");
            }
        }

        info!("Detector orchestrator stopped");
        Ok(())
    }

    /// Queue an operator-supplied token as if a source had found it
    pub fn submit_manual_token(
        &self,
        token_address: &str,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<TokenEvent> {
        let address = validate_evm_address(token_address)?;
        let event = TokenEvent::manual(address, metadata, self.chain_id);
        self.sender
            .send(event.clone())
            .map_err(|_| anyhow!("Detector queue is closed"))?;
        info!("Manual token submitted: {}", event.token_address);
        Ok(event)
    }

    pub async fn stats(&self) -> DetectorStats {
        let tasks = self.tasks.lock().await;
        DetectorStats {
            running: !self.cancel.is_cancelled() && !tasks.is_empty(),
            unique_tokens_seen: self.dispatcher.dedup.lock().await.len(),
            sources: self.sources.len(),
            active_tasks: tasks.iter().filter(|t| !t.is_finished()).count(),
        }
    }
}
