//! CLI for one-off token analysis
//!
//! Runs the full pipeline for a single address, outside the detection loop,
//! and prints the resulting breakdown as JSON.

use anyhow::{bail, Result};
use token_analyst::observability::{init_observability, ObservabilityConfig};
use token_analyst::orchestrator::PipelineComponents;
use token_analyst::{AppConfig, JobOrchestrator, SystemInitializer};

struct CliArgs {
    address: String,
    config_path: String,
    dry_run: bool,
}

fn parse_args(args: &[String]) -> Result<CliArgs> {
    let mut address = None;
    let mut config_path = "config.toml".to_string();
    let mut dry_run = false;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => match iter.next() {
                Some(path) => config_path = path.clone(),
                None => bail!("--config requires a path"),
            },
            "--dry-run" => dry_run = true,
            other if other.starts_with("--") => bail!("Unknown option: {}", other),
            other => address = Some(other.to_string()),
        }
    }

    match address {
        Some(address) => Ok(CliArgs {
            address,
            config_path,
            dry_run,
        }),
        None => bail!("Missing token address"),
    }
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} <0xaddress> [--config path] [--dry-run]", program);
    eprintln!();
    eprintln!("Example: {} 0x4200000000000000000000000000000000000006 --dry-run", program);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("analyze_cli");

    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage(program);
            std::process::exit(2);
        }
    };

    let config = AppConfig::load_or_default(&cli.config_path)?;
    if let Err(e) = init_observability(ObservabilityConfig {
        log_level: "warn".to_string(),
        with_source_location: false,
        ..Default::default()
    }) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let repository = SystemInitializer::init_repository(&config).await?;
    let enrichment = SystemInitializer::init_enrichment(&config)?;
    enrichment.initialize().await?;
    let (publisher, _) =
        SystemInitializer::init_publisher(&config, repository.clone(), cli.dry_run)?;

    let orchestrator = JobOrchestrator::new(
        PipelineComponents {
            enrichment: enrichment.clone(),
            synthesizer: SystemInitializer::init_synthesizer(&config)?,
            publisher,
            repository,
            metrics: None,
        },
        &config.orchestrator,
        config.chain_id,
    );

    let result = orchestrator.analyze_manual(&cli.address, None).await;
    enrichment.close().await;

    match result? {
        Some(breakdown) => println!("{}", serde_json::to_string_pretty(&breakdown)?),
        None => {
            eprintln!(
                "No breakdown for {}: skipped, rejected or failed (see logs)",
                cli.address
            );
            std::process::exit(1);
        }
    }
    Ok(())
}
