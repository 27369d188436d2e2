//! token-analyst - multi-source token discovery, enrichment and risk synthesis
//!
//! Detection sources feed a deduplicating fan-in; each unique token is
//! enriched (contract security, developer OSINT, market metrics), scored,
//! summarized into pro/con claims and published, with an optional human
//! approval step.

pub mod config;
pub mod delivery;
pub mod detection;
pub mod enrichment;
pub mod http_client;
pub mod observability;
pub mod orchestrator;
pub mod storage;
pub mod synthesis;
pub mod types;
pub mod utils;
pub mod validation;

// Re-export main types for convenience
pub use config::AppConfig;
pub use detection::{DetectorOrchestrator, DiscoverySource, EventCallback};
pub use orchestrator::{
    EnqueueOutcome, JobOrchestrator, PipelineComponents, ShutdownCoordinator, SystemInitializer,
};
pub use types::{AnalysisJob, AnalysisStatus, RiskRating, TokenBreakdown, TokenEvent};
