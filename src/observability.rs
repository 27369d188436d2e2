//! Observability module - structured logging and Prometheus metrics
//!
//! This module provides:
//! - A `tracing` subscriber with env-filter and file/line annotated output
//! - A dedicated Prometheus registry with the pipeline's counters and gauges
//!
//! # Usage
//! ```no_run
//! use token_analyst::observability::{init_observability, ObservabilityConfig, PipelineMetrics};
//!
//! init_observability(ObservabilityConfig::default()).expect("logging");
//! let metrics = PipelineMetrics::new().expect("metrics");
//! metrics.tokens_detected.inc();
//! println!("{}", metrics.gather_text());
//! ```

use anyhow::{Context, Result};
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Configuration for the logging layer
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Service name reported in the startup log
    pub service_name: String,
    /// Fallback filter when `RUST_LOG` is not set
    pub log_level: String,
    /// Include file and line in log lines
    pub with_source_location: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "token-analyst".to_string(),
            log_level: "info".to_string(),
            with_source_location: true,
        }
    }
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.log_level`. Calling this twice returns
/// an error rather than panicking.
pub fn init_observability(config: ObservabilityConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(config.with_source_location)
        .with_line_number(config.with_source_location);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    tracing::info!(
        service = %config.service_name,
        version = env!("CARGO_PKG_VERSION"),
        "Observability initialized"
    );

    Ok(())
}

/// Pipeline counters, registered on a private registry
#[derive(Clone)]
pub struct PipelineMetrics {
    registry: Registry,
    pub tokens_detected: IntCounter,
    pub duplicates_filtered: IntCounter,
    pub jobs_analyzed: IntCounter,
    pub jobs_published: IntCounter,
    pub jobs_failed: IntCounter,
    pub jobs_rejected: IntCounter,
    pub queue_dropped: IntCounter,
    pub active_jobs: IntGauge,
    pub analysis_duration: Histogram,
}

impl PipelineMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> Result<IntCounter> {
            let c = IntCounter::new(name, help)
                .with_context(|| format!("Failed to create counter {}", name))?;
            registry
                .register(Box::new(c.clone()))
                .with_context(|| format!("Failed to register counter {}", name))?;
            Ok(c)
        };

        let tokens_detected = counter("tokens_detected_total", "Unique tokens forwarded by detection")?;
        let duplicates_filtered =
            counter("duplicates_filtered_total", "Events suppressed by the dedup window")?;
        let jobs_analyzed = counter("jobs_analyzed_total", "Jobs that completed synthesis")?;
        let jobs_published = counter("jobs_published_total", "Breakdowns published")?;
        let jobs_failed = counter("jobs_failed_total", "Jobs that ended in FAILED")?;
        let jobs_rejected = counter("jobs_rejected_total", "Jobs rejected by skip thresholds")?;
        let queue_dropped = counter("queue_dropped_total", "Events dropped on a full job queue")?;

        let active_jobs = IntGauge::new("active_jobs", "Jobs currently in flight")
            .context("Failed to create active_jobs gauge")?;
        registry
            .register(Box::new(active_jobs.clone()))
            .context("Failed to register active_jobs gauge")?;

        let analysis_duration = Histogram::with_opts(
            HistogramOpts::new("analysis_duration_seconds", "End-to-end job duration")
                .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )
        .context("Failed to create analysis_duration histogram")?;
        registry
            .register(Box::new(analysis_duration.clone()))
            .context("Failed to register analysis_duration histogram")?;

        Ok(Self {
            registry,
            tokens_detected,
            duplicates_filtered,
            jobs_analyzed,
            jobs_published,
            jobs_failed,
            jobs_rejected,
            queue_dropped,
            active_jobs,
            analysis_duration,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Metrics in the Prometheus text exposition format
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }

        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.service_name, "token-analyst");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_metrics_register_and_encode() {
        let metrics = PipelineMetrics::new().unwrap();
        metrics.tokens_detected.inc();
        metrics.queue_dropped.inc_by(2);
        metrics.active_jobs.set(3);

        let text = metrics.gather_text();
        assert!(text.contains("tokens_detected_total 1"));
        assert!(text.contains("queue_dropped_total 2"));
        assert!(text.contains("active_jobs 3"));
    }

    #[test]
    fn test_independent_registries() {
        // Each instance owns its registry, so two can coexist in one process
        let a = PipelineMetrics::new().unwrap();
        let b = PipelineMetrics::new().unwrap();
        a.jobs_failed.inc();
        assert_eq!(b.jobs_failed.get(), 0);
    }
}
