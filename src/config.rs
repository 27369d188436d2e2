//! Application configuration
//!
//! Loaded from a TOML file with secrets overridden from the environment. Every
//! section has sensible defaults so a partial file (or no file) still works.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::DEFAULT_CHAIN_ID;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub chain_id: u64,
    pub database_path: String,
    pub log_level: String,
    pub thresholds: ThresholdConfig,
    pub synthesis: SynthesisConfig,
    pub llm: LlmConfig,
    pub detection: DetectionConfig,
    pub orchestrator: WorkerConfig,
    pub providers: ProviderConfig,
    pub delivery: DeliveryConfig,
}

/// Skip thresholds applied after fast enrichment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub min_liquidity_usd: f64,
    pub min_holders: u64,
    /// Maximum top-10 holder concentration (%)
    pub max_top_holder_percent: f64,
    pub max_token_age_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Breakdowns below this confidence always go to review
    pub confidence_threshold: f64,
    /// Global review mode. Automatic publication requires turning this off.
    pub require_human_approval: bool,
    /// Claims below this confidence count as low confidence
    pub low_confidence_claim: f64,
    /// Dev red flag count that forces review
    pub max_review_red_flags: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    Anthropic,
    Openai,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProviderKind,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub timeout_secs: u64,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_url: String,
    pub openai_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub dedup_window_secs: u64,
    pub sweep_interval_secs: u64,
    pub enable_feed: bool,
    pub feed_url: String,
    pub feed_poll_interval_secs: u64,
    pub enable_social: bool,
    pub social_query: String,
    pub social_poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub recency_window_hours: u32,
    pub stats_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub goplus_url: String,
    pub honeypot_url: String,
    pub dexscreener_url: String,
    pub basescan_url: String,
    pub basescan_api_key: Option<String>,
    pub twitter_url: String,
    pub twitter_bearer_token: Option<String>,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    pub dev_cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub telegram_api_url: String,
    pub telegram_bot_token: Option<String>,
    pub telegram_channel_id: Option<String>,
    pub telegram_admin_chat_id: Option<String>,
    pub rate_limit_per_minute: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            database_path: "token_analyst.db".to_string(),
            log_level: "info".to_string(),
            thresholds: ThresholdConfig::default(),
            synthesis: SynthesisConfig::default(),
            llm: LlmConfig::default(),
            detection: DetectionConfig::default(),
            orchestrator: WorkerConfig::default(),
            providers: ProviderConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            min_liquidity_usd: 5_000.0,
            min_holders: 50,
            max_top_holder_percent: 30.0,
            max_token_age_hours: 168.0,
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            require_human_approval: true,
            low_confidence_claim: 0.6,
            max_review_red_flags: 2,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::Anthropic,
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 2048,
            temperature: 0.3,
            timeout_secs: 60,
            anthropic_api_key: None,
            openai_api_key: None,
            anthropic_url: "https://api.anthropic.com".to_string(),
            openai_url: "https://api.openai.com".to_string(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 300,
            sweep_interval_secs: 60,
            enable_feed: true,
            feed_url: "https://www.moltbook.com/api/v1/agents".to_string(),
            feed_poll_interval_secs: 30,
            enable_social: false,
            social_query: "\"contract\" base 0x -is:retweet".to_string(),
            social_poll_interval_secs: 60,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: 3,
            queue_capacity: 1000,
            recency_window_hours: 24,
            stats_interval_secs: 300,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            goplus_url: "https://api.gopluslabs.io/api/v1".to_string(),
            honeypot_url: "https://api.honeypot.is/v2".to_string(),
            dexscreener_url: "https://api.dexscreener.com/latest".to_string(),
            basescan_url: "https://api.basescan.org/api".to_string(),
            basescan_api_key: None,
            twitter_url: "https://api.twitter.com/2".to_string(),
            twitter_bearer_token: None,
            rate_limit_per_minute: 60,
            request_timeout_secs: 10,
            dev_cache_ttl_secs: 3600,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            telegram_api_url: "https://api.telegram.org".to_string(),
            telegram_bot_token: None,
            telegram_channel_id: None,
            telegram_admin_chat_id: None,
            rate_limit_per_minute: 20,
        }
    }
}

impl AppConfig {
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Load `path` when it exists, otherwise defaults plus environment overrides
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            return Self::from_toml_file(path);
        }
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Secrets come from the environment, never from the committed file
    pub fn apply_env_overrides(&mut self) {
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

        if let Some(v) = env("ANTHROPIC_API_KEY") {
            self.llm.anthropic_api_key = Some(v);
        }
        if let Some(v) = env("OPENAI_API_KEY") {
            self.llm.openai_api_key = Some(v);
        }
        if let Some(v) = env("TELEGRAM_BOT_TOKEN") {
            self.delivery.telegram_bot_token = Some(v);
        }
        if let Some(v) = env("TELEGRAM_CHANNEL_ID") {
            self.delivery.telegram_channel_id = Some(v);
        }
        if let Some(v) = env("TELEGRAM_ADMIN_CHAT_ID") {
            self.delivery.telegram_admin_chat_id = Some(v);
        }
        if let Some(v) = env("BASESCAN_API_KEY") {
            self.providers.basescan_api_key = Some(v);
        }
        if let Some(v) = env("TWITTER_BEARER_TOKEN") {
            self.providers.twitter_bearer_token = Some(v);
        }
        if let Some(v) = env("DATABASE_PATH") {
            self.database_path = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        use crate::validation::validate_api_url;

        for url in [
            &self.providers.goplus_url,
            &self.providers.honeypot_url,
            &self.providers.dexscreener_url,
            &self.providers.basescan_url,
            &self.providers.twitter_url,
            &self.llm.anthropic_url,
            &self.llm.openai_url,
            &self.delivery.telegram_api_url,
            &self.detection.feed_url,
        ] {
            validate_api_url(url)?;
        }

        if !(0.0..=1.0).contains(&self.synthesis.confidence_threshold) {
            anyhow::bail!(
                "confidence_threshold must be within [0, 1], got {}",
                self.synthesis.confidence_threshold
            );
        }
        if self.orchestrator.worker_count == 0 {
            anyhow::bail!("worker_count must be at least 1");
        }
        if self.orchestrator.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be at least 1");
        }
        if self.providers.rate_limit_per_minute == 0 || self.delivery.rate_limit_per_minute == 0 {
            anyhow::bail!("rate limits must be non-zero");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.synthesis.require_human_approval);
        assert_eq!(config.detection.dedup_window_secs, 300);
        assert_eq!(config.detection.sweep_interval_secs, 60);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "chain_id = 1\n[thresholds]\nmin_liquidity_usd = 20000.0\n[orchestrator]\nworker_count = 5"
        )
        .unwrap();

        let config = AppConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.chain_id, 1);
        assert_eq!(config.thresholds.min_liquidity_usd, 20000.0);
        assert_eq!(config.thresholds.min_holders, 50);
        assert_eq!(config.orchestrator.worker_count, 5);
        assert_eq!(config.orchestrator.queue_capacity, 1000);
    }

    #[test]
    fn test_rejects_plain_http_provider() {
        let mut config = AppConfig::default();
        config.providers.goplus_url = "http://api.gopluslabs.io".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_workers() {
        let mut config = AppConfig::default();
        config.orchestrator.worker_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_round_trip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.toml");
        AppConfig::default().to_toml_file(&path).unwrap();
        let loaded = AppConfig::from_toml_file(&path).unwrap();
        assert_eq!(loaded.llm.model, "claude-sonnet-4-20250514");
    }
}
