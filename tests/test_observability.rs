//! Integration tests for logging and pipeline metrics

use std::sync::Once;
use token_analyst::observability::{init_observability, ObservabilityConfig, PipelineMetrics};

static INIT: Once = Once::new();

/// Initialize observability only once for all tests
fn init_test_observability() {
    INIT.call_once(|| {
        let config = ObservabilityConfig {
            log_level: "debug".to_string(),
            ..Default::default()
        };

        // Ignore error if already initialized
        let _ = init_observability(config);
    });
}

#[test]
fn test_observability_config_default() {
    let config = ObservabilityConfig::default();
    assert_eq!(config.service_name, "token-analyst");
    assert_eq!(config.log_level, "info");
    assert!(config.with_source_location);
}

#[test]
fn test_second_init_is_an_error_not_a_panic() {
    init_test_observability();
    assert!(init_observability(ObservabilityConfig::default()).is_err());
}

#[test]
fn test_metrics_exposition() {
    let metrics = PipelineMetrics::new().unwrap();
    metrics.tokens_detected.inc();
    metrics.jobs_published.inc_by(2);
    metrics.active_jobs.set(3);
    metrics.analysis_duration.observe(1.5);

    let text = metrics.gather_text();
    assert!(text.contains("# TYPE tokens_detected_total counter"));
    assert!(text.contains("tokens_detected_total 1"));
    assert!(text.contains("jobs_published_total 2"));
    assert!(text.contains("active_jobs 3"));
    assert!(text.contains("analysis_duration_seconds_count 1"));
}

#[test]
fn test_registries_are_independent() {
    let a = PipelineMetrics::new().unwrap();
    let b = PipelineMetrics::new().unwrap();
    a.queue_dropped.inc();

    assert_eq!(a.queue_dropped.get(), 1);
    assert_eq!(b.queue_dropped.get(), 0);
}
