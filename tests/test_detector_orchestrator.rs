//! Integration tests for detection fan-in and deduplication

mod common;

use common::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use token_analyst::config::DetectionConfig;
use token_analyst::detection::{DetectorOrchestrator, InMemoryDedupStore};
use token_analyst::observability::PipelineMetrics;
use token_analyst::types::{AnalysisStatus, EventSource, TokenEvent};

fn config() -> DetectionConfig {
    DetectionConfig {
        dedup_window_secs: 300,
        sweep_interval_secs: 60,
        ..Default::default()
    }
}

fn tagged(address: &str, source: EventSource, tag: &str) -> TokenEvent {
    let mut event = event(address, source);
    event.source_metadata.insert("tag".to_string(), tag.to_string());
    event
}

async fn collector(detector: &DetectorOrchestrator) -> mpsc::UnboundedReceiver<TokenEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    detector.register_callback(Arc::new(ChannelCallback(tx))).await;
    rx
}

#[tokio::test(start_paused = true)]
async fn test_cross_source_duplicate_is_filtered_until_window_lapses() {
    let mut detector = DetectorOrchestrator::new(&config(), CHAIN_ID);
    detector.add_source(Arc::new(ScriptedSource {
        name: "feed",
        script: vec![(Duration::from_secs(1), tagged(TOKEN_A, EventSource::Feed, "first"))],
        fail_connect: false,
    }));
    detector.add_source(Arc::new(ScriptedSource {
        name: "social",
        script: vec![
            (Duration::from_secs(2), tagged(TOKEN_A, EventSource::Social, "duplicate")),
            // 300s window plus one 60s sweep interval
            (Duration::from_secs(398), tagged(TOKEN_A, EventSource::Social, "rescan")),
        ],
        fail_connect: false,
    }));
    let mut rx = collector(&detector).await;
    detector.start().await.unwrap();

    let first = rx.recv().await.unwrap();
    assert_eq!(first.source, EventSource::Feed);
    assert_eq!(first.source_metadata["tag"], "first");

    // Nothing else inside the window
    assert!(tokio::time::timeout(Duration::from_secs(200), rx.recv())
        .await
        .is_err());

    let second = rx.recv().await.unwrap();
    assert_eq!(second.source, EventSource::Social);
    assert_eq!(second.source_metadata["tag"], "rescan");

    detector.stop().await.unwrap();
}

#[tokio::test]
async fn test_manual_duplicates_within_window() {
    let detector = DetectorOrchestrator::new(&config(), CHAIN_ID);
    let mut rx = collector(&detector).await;
    detector.start().await.unwrap();

    let upper = TOKEN_A.replace('a', "A");
    detector.submit_manual_token(TOKEN_A, None).unwrap();
    detector.submit_manual_token(&upper, None).unwrap();

    let received = rx.recv().await.unwrap();
    assert_eq!(received.source, EventSource::Manual);
    assert!(tokio::time::timeout(Duration::from_millis(200), rx.recv())
        .await
        .is_err());
    assert_eq!(detector.stats().await.unique_tokens_seen, 1);

    detector.stop().await.unwrap();
}

#[tokio::test]
async fn test_failing_callback_does_not_block_others() {
    let detector = DetectorOrchestrator::new(&config(), CHAIN_ID);
    let failing = Arc::new(FailingCallback {
        calls: AtomicUsize::new(0),
    });
    detector.register_callback(failing.clone()).await;
    let mut rx = collector(&detector).await;
    detector.start().await.unwrap();

    let mut metadata = HashMap::new();
    metadata.insert("dev_twitter".to_string(), "builder".to_string());
    detector.submit_manual_token(TOKEN_B, Some(metadata)).unwrap();

    let received = rx.recv().await.unwrap();
    assert_eq!(received.token_address, TOKEN_B);
    assert_eq!(received.source_metadata["dev_twitter"], "builder");
    assert_eq!(failing.calls.load(Ordering::SeqCst), 1);

    detector.stop().await.unwrap();
}

#[tokio::test]
async fn test_source_connect_failure_does_not_stop_others() {
    let mut detector = DetectorOrchestrator::new(&config(), CHAIN_ID);
    detector.add_source(Arc::new(ScriptedSource {
        name: "broken",
        script: vec![(Duration::ZERO, event(TOKEN_A, EventSource::Chain))],
        fail_connect: true,
    }));
    detector.add_source(Arc::new(ScriptedSource {
        name: "feed",
        script: vec![(Duration::from_millis(10), event(TOKEN_B, EventSource::Feed))],
        fail_connect: false,
    }));
    let mut rx = collector(&detector).await;
    detector.start().await.unwrap();

    let received = rx.recv().await.unwrap();
    assert_eq!(received.token_address, TOKEN_B);
    assert!(tokio::time::timeout(Duration::from_millis(200), rx.recv())
        .await
        .is_err());

    let stats = detector.stats().await;
    assert!(stats.running);
    assert_eq!(stats.sources, 2);

    detector.stop().await.unwrap();
    assert!(!detector.stats().await.running);
}

#[tokio::test]
async fn test_duplicates_are_counted() {
    let metrics = PipelineMetrics::new().unwrap();
    let detector = DetectorOrchestrator::with_store(
        &config(),
        CHAIN_ID,
        Box::new(InMemoryDedupStore::new()),
        Some(metrics.clone()),
    );
    let mut rx = collector(&detector).await;
    detector.start().await.unwrap();

    for _ in 0..3 {
        detector.submit_manual_token(TOKEN_A, None).unwrap();
    }
    rx.recv().await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), async {
        while metrics.duplicates_filtered.get() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(metrics.tokens_detected.get(), 1);
    assert!(metrics.gather_text().contains("duplicates_filtered_total 2"));
    detector.stop().await.unwrap();
}

#[tokio::test]
async fn test_detected_token_flows_into_job_orchestrator() {
    let h = harness(HarnessOptions::default());
    let detector = DetectorOrchestrator::new(&config(), CHAIN_ID);
    detector.register_callback(h.orchestrator.clone()).await;

    h.orchestrator.start().await.unwrap();
    detector.start().await.unwrap();
    detector.submit_manual_token(TOKEN_A, None).unwrap();

    let job = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let jobs = h.repository.jobs_for_token(TOKEN_A).await;
            if let Some(job) = jobs.into_iter().find(|j| j.status.is_terminal()) {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(job.status, AnalysisStatus::Published);
    assert_eq!(job.event.source, EventSource::Manual);

    detector.stop().await.unwrap();
    h.orchestrator.stop().await.unwrap();
}
