//! Core data model shared by every pipeline stage
//!
//! Events flow in from discovery sources as [`TokenEvent`], are tracked through the
//! pipeline as an [`AnalysisJob`], and leave as a [`TokenBreakdown`].
//!
//! # Job lifecycle
//! ```text
//! PENDING → ENRICHING → SYNTHESIZING → AWAITING_APPROVAL ─┐
//!    │          │             │      → APPROVED ──────────┴→ PUBLISHED
//!    ↓          ↓             ↓
//! REJECTED   FAILED        FAILED
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Base mainnet
pub const DEFAULT_CHAIN_ID: u64 = 8453;

/// DexScreener/explorer slug for a chain id
pub fn chain_slug(chain_id: u64) -> &'static str {
    match chain_id {
        1 => "ethereum",
        56 => "bsc",
        137 => "polygon",
        42161 => "arbitrum",
        10 => "optimism",
        _ => "base",
    }
}

/// Where a token event originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    /// On-chain pair creation
    Chain,
    /// Periodic launch feed poller
    Feed,
    /// Social media mention
    Social,
    /// Operator submission
    Manual,
}

impl EventSource {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Chain => "chain",
            Self::Feed => "feed",
            Self::Social => "social",
            Self::Manual => "manual",
        }
    }
}

/// A newly discovered token. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenEvent {
    /// Token contract address as reported by the source
    pub token_address: String,
    /// Liquidity pair address, when the source knows it
    pub pair_address: Option<String>,
    /// Detection source
    pub source: EventSource,
    /// When the source saw the token
    pub detected_at: DateTime<Utc>,
    /// EVM chain id
    pub chain_id: u64,
    /// Symbol hint from the source
    pub token_symbol: Option<String>,
    /// Name hint from the source
    pub token_name: Option<String>,
    /// Free-form source metadata (e.g. `dev_twitter`)
    pub source_metadata: HashMap<String, String>,
}

impl TokenEvent {
    pub fn new(token_address: impl Into<String>, source: EventSource, chain_id: u64) -> Self {
        Self {
            token_address: token_address.into(),
            pair_address: None,
            source,
            detected_at: Utc::now(),
            chain_id,
            token_symbol: None,
            token_name: None,
            source_metadata: HashMap::new(),
        }
    }

    /// Synthetic event for operator-triggered analysis
    pub fn manual(
        token_address: impl Into<String>,
        metadata: Option<HashMap<String, String>>,
        chain_id: u64,
    ) -> Self {
        let mut event = Self::new(token_address, EventSource::Manual, chain_id);
        event.source_metadata = metadata.unwrap_or_default();
        event
    }

    /// Lowercased address used as the identity key across sources
    pub fn normalized_address(&self) -> String {
        self.token_address.to_lowercase()
    }
}

/// Deterministic job identifier: first 16 hex chars of sha256("{address}:{timestamp}").
pub fn job_id(token_address: &str, detected_at: &DateTime<Utc>) -> String {
    let input = format!(
        "{}:{}",
        token_address.to_lowercase(),
        detected_at.to_rfc3339_opts(SecondsFormat::Micros, true)
    );
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Contract security and deployer data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractAnalysis {
    pub token_address: String,
    pub deployer_address: Option<String>,
    pub name: Option<String>,
    pub symbol: Option<String>,
    /// Share of supply held by the deployer (%)
    pub deployer_balance_pct: f64,
    pub has_mint_function: bool,
    pub has_blacklist: bool,
    pub has_proxy: bool,
    pub is_honeypot: bool,
    pub honeypot_reason: Option<String>,
    pub is_renounced: bool,
    /// Number of earlier tokens deployed by the same address
    pub deployer_prior_tokens: u32,
}

/// Developer identity research
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevProfile {
    pub token_address: String,
    pub twitter_handle: Option<String>,
    pub twitter_url: Option<String>,
    pub twitter_followers: u64,
    pub twitter_verified: bool,
    pub twitter_account_age_days: u32,
    /// On-chain proof that the handle controls the deployer
    pub attribution_verified: bool,
    /// 0-100
    pub reputation_score: f64,
    pub prior_projects: u32,
    pub is_anonymous: bool,
    pub red_flags: Vec<String>,
}

impl DevProfile {
    /// Profile for a token with no discoverable developer
    pub fn anonymous(token_address: impl Into<String>) -> Self {
        Self {
            token_address: token_address.into(),
            twitter_handle: None,
            twitter_url: None,
            twitter_followers: 0,
            twitter_verified: false,
            twitter_account_age_days: 0,
            attribution_verified: false,
            reputation_score: 0.0,
            prior_projects: 0,
            is_anonymous: true,
            red_flags: Vec::new(),
        }
    }
}

/// Market and holder data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OnChainMetrics {
    pub token_address: String,
    pub pair_address: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub price_usd: f64,
    pub fdv_usd: f64,
    pub market_cap_usd: f64,
    pub liquidity_usd: f64,
    pub volume_24h_usd: f64,
    pub price_change_24h: f64,
    pub holder_count: u64,
    /// Share of supply held by the ten largest holders (%)
    pub top_10_holder_pct: f64,
    pub token_age_hours: f64,
}

/// One pro or con statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub text: String,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub source: String,
    pub is_pro: bool,
}

impl Claim {
    pub fn pro(text: impl Into<String>, confidence: f64, source: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
            source: source.into(),
            is_pro: true,
        }
    }

    pub fn con(text: impl Into<String>, confidence: f64, source: impl Into<String>) -> Self {
        Self {
            is_pro: false,
            ..Self::pro(text, confidence, source)
        }
    }
}

/// Four ordered risk tiers, lowest risk first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskRating {
    Green,
    Yellow,
    Orange,
    Red,
}

impl RiskRating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Orange => "orange",
            Self::Red => "red",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Green => "\u{1F7E9}",
            Self::Yellow => "\u{1F7E8}",
            Self::Orange => "\u{1F7E7}",
            Self::Red => "\u{1F7E5}",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "green" => Some(Self::Green),
            "yellow" => Some(Self::Yellow),
            "orange" => Some(Self::Orange),
            "red" => Some(Self::Red),
            _ => None,
        }
    }
}

impl fmt::Display for RiskRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_uppercase())
    }
}

/// Synthesized output for a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBreakdown {
    pub token_address: String,
    pub analyzed_at: DateTime<Utc>,
    pub symbol: String,
    pub name: String,
    pub fdv_usd: f64,
    /// e.g. "$2.5M"
    pub fdv_display: String,
    pub risk_rating: RiskRating,
    pub primary_reason: String,
    pub overall_confidence: f64,
    pub overall_assessment: Option<String>,
    pub dev_twitter_url: Option<String>,
    pub dev_twitter_handle: Option<String>,
    pub pros: Vec<Claim>,
    pub cons: Vec<Claim>,
    pub requires_human_review: bool,
    pub human_review_reasons: Vec<String>,
    pub dexscreener_url: String,
    pub contract_url: String,
    pub processing_time_seconds: f64,
    pub contract_analysis: Option<ContractAnalysis>,
    pub dev_profile: Option<DevProfile>,
    pub on_chain_metrics: Option<OnChainMetrics>,
}

impl TokenBreakdown {
    pub fn claims(&self) -> impl Iterator<Item = &Claim> {
        self.pros.iter().chain(self.cons.iter())
    }
}

/// Job status state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Pending,
    Enriching,
    Synthesizing,
    AwaitingApproval,
    Approved,
    Published,
    Rejected,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Enriching => "enriching",
            Self::Synthesizing => "synthesizing",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Approved => "approved",
            Self::Published => "published",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let status = match value {
            "pending" => Self::Pending,
            "enriching" => Self::Enriching,
            "synthesizing" => Self::Synthesizing,
            "awaiting_approval" => Self::AwaitingApproval,
            "approved" => Self::Approved,
            "published" => Self::Published,
            "rejected" => Self::Rejected,
            "failed" => Self::Failed,
            _ => return None,
        };
        Some(status)
    }

    /// PUBLISHED, REJECTED and FAILED are final
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Published | Self::Rejected | Self::Failed)
    }

    /// Forward edges of the lifecycle plus the FAILED/REJECTED side exits
    pub fn can_transition_to(&self, next: AnalysisStatus) -> bool {
        use AnalysisStatus::*;

        if next == Failed {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Pending, Enriching)
                | (Pending, Rejected)
                | (Enriching, Synthesizing)
                | (Synthesizing, AwaitingApproval)
                | (Synthesizing, Approved)
                | (AwaitingApproval, Approved)
                | (AwaitingApproval, Published)
                | (Approved, Published)
        )
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal job transition {from} -> {to}")]
pub struct TransitionError {
    pub from: AnalysisStatus,
    pub to: AnalysisStatus,
}

/// One run of the pipeline for a single token address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub job_id: String,
    pub token_address: String,
    pub status: AnalysisStatus,
    pub event: TokenEvent,
    pub contract_analysis: Option<ContractAnalysis>,
    pub dev_profile: Option<DevProfile>,
    pub on_chain_metrics: Option<OnChainMetrics>,
    pub breakdown: Option<TokenBreakdown>,
    pub error_message: Option<String>,
    pub telegram_message_id: Option<i64>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisJob {
    pub fn new(event: TokenEvent) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id(&event.token_address, &event.detected_at),
            token_address: event.token_address.clone(),
            status: AnalysisStatus::Pending,
            event,
            contract_analysis: None,
            dev_profile: None,
            on_chain_metrics: None,
            breakdown: None,
            error_message: None,
            telegram_message_id: None,
            published_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, refusing edges the lifecycle does not allow
    pub fn advance(&mut self, next: AnalysisStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record a failure. No-op on an already terminal job.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = AnalysisStatus::Failed;
        self.error_message = Some(message.into());
        self.updated_at = Utc::now();
    }

    pub fn reject(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.advance(AnalysisStatus::Rejected)?;
        self.error_message = Some(reason.into());
        Ok(())
    }

    pub fn mark_published(&mut self, message_id: i64) -> Result<(), TransitionError> {
        self.advance(AnalysisStatus::Published)?;
        self.telegram_message_id = Some(message_id);
        self.published_at = Some(Utc::now());
        Ok(())
    }
}

/// Result of a single pipeline stage
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    /// Stage produced a value
    Completed(T),
    /// Threshold or policy rejection, not an error
    Skipped(String),
    /// Stage failed with a reason
    Failed(String),
}

impl<T> StageOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            _ => None,
        }
    }
}

/// Blacklisted address or developer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub address: String,
    pub reason: String,
    pub added_at: DateTime<Utc>,
    /// Admin id or "system"
    pub added_by: String,
    /// "contract", "wallet" or "dev_twitter"
    pub category: String,
}

/// Aggregate analysis statistics over a time window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisStats {
    pub window_hours: u32,
    pub total: u64,
    pub by_status: HashMap<String, u64>,
    pub by_rating: HashMap<String, u64>,
    pub avg_processing_time_secs: Option<f64>,
    pub avg_confidence: Option<f64>,
}
