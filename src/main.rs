//! Main entry point for the token-analyst service
//! Wires detection, enrichment, synthesis and delivery, then runs until ctrl-c.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use token_analyst::observability::{init_observability, ObservabilityConfig, PipelineMetrics};
use token_analyst::orchestrator::PipelineComponents;
use token_analyst::{AppConfig, JobOrchestrator, SystemInitializer};

fn config_path() -> String {
    let args: Vec<String> = std::env::args().collect();
    args.iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1).cloned())
        .unwrap_or_else(|| "config.toml".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path();
    let config = AppConfig::load_or_default(&path)?;

    if let Err(e) = init_observability(ObservabilityConfig {
        log_level: config.log_level.clone(),
        ..Default::default()
    }) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }
    tracing::info!("Starting token-analyst (config: {}, chain {})", path, config.chain_id);

    let metrics = PipelineMetrics::new()?;
    let repository = SystemInitializer::init_repository(&config).await?;
    let enrichment = SystemInitializer::init_enrichment(&config)?;
    enrichment
        .initialize()
        .await
        .context("Failed to initialize enrichment agents")?;
    let synthesizer = SystemInitializer::init_synthesizer(&config)?;
    let (publisher, telegram) =
        SystemInitializer::init_publisher(&config, repository.clone(), false)?;

    let orchestrator = Arc::new(JobOrchestrator::new(
        PipelineComponents {
            enrichment: enrichment.clone(),
            synthesizer,
            publisher,
            repository,
            metrics: Some(metrics.clone()),
        },
        &config.orchestrator,
        config.chain_id,
    ));
    let detector = SystemInitializer::init_detection(&config, Some(metrics.clone()))?;
    detector.register_callback(orchestrator.clone()).await;

    let admin_cancel = CancellationToken::new();
    let admin_task = telegram.map(|telegram| {
        tokio::spawn(telegram.run_admin_commands(admin_cancel.clone()))
    });

    orchestrator.start().await?;
    detector.start().await?;

    tracing::info!("All components started - awaiting shutdown signal");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down gracefully");

    detector.stop().await?;
    admin_cancel.cancel();
    if let Some(task) = admin_task {
        if let Err(e) = task.await {
            tracing::warn!("Admin command task ended abnormally: {}", e);
        }
    }
    orchestrator.stop().await?;
    enrichment.close().await;

    tracing::debug!("Final metrics:\n{}", metrics.gather_text());
    tracing::info!("Shutdown complete: {:?}", orchestrator.stats());
    Ok(())
}
