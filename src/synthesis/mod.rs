//! Breakdown synthesis
//!
//! # Architecture
//! ```text
//! enrichment ─┬─> RiskScorer ──────────────┐
//!             └─> LlmClient ─(fails)─> rule fallback ─┴─> TokenBreakdown ─> review gate
//! ```
//!
//! The language model only contributes pro/con claims, an assessment and a
//! confidence score. The risk rating always comes from the deterministic scorer.
//! Any provider failure, unparsable answer or answer without claims is replaced
//! by the rule-based fallback, so synthesis itself does not fail on model errors.

pub mod llm;
pub mod prompts;
pub mod scorer;

pub use llm::{LlmClient, LlmError, LlmProvider};
pub use scorer::{RiskScore, RiskScorer};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::time::Instant;
use tracing::{info, instrument, warn};

use crate::config::SynthesisConfig;
use crate::types::{
    chain_slug, AnalysisJob, AnalysisStatus, Claim, ContractAnalysis, DevProfile,
    OnChainMetrics, RiskRating, TokenBreakdown,
};
use crate::utils::{format_fdv, format_thousands};
use prompts::{synthesis_prompt, SYNTHESIS_SYSTEM_PROMPT};

/// Confidence reported by the rule-based fallback
pub const FALLBACK_CONFIDENCE: f64 = 0.70;
const FALLBACK_ASSESSMENT: &str = "Automated analysis based on available data";
const MAX_PROS: usize = 5;
const MAX_CONS: usize = 4;
/// Red flags copied into fallback cons
const FALLBACK_RED_FLAGS: usize = 2;

fn default_claim_confidence() -> f64 {
    0.7
}

fn default_claim_source() -> String {
    "analysis".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct RawClaim {
    #[serde(default)]
    text: String,
    #[serde(default = "default_claim_confidence")]
    confidence: f64,
    #[serde(default = "default_claim_source")]
    source: String,
}

/// Claims and assessment, from the model or from the fallback rules
#[derive(Debug, Clone, Default, Deserialize)]
struct ClaimSet {
    #[serde(default)]
    pros: Vec<RawClaim>,
    #[serde(default)]
    cons: Vec<RawClaim>,
    #[serde(default)]
    overall_assessment: Option<String>,
    #[serde(default)]
    confidence_score: Option<f64>,
}

impl ClaimSet {
    fn from_model(value: Value) -> Option<Self> {
        let set: ClaimSet = serde_json::from_value(value).ok()?;
        let has_claims = set.pros.iter().chain(set.cons.iter()).any(|c| !c.text.is_empty());
        has_claims.then_some(set)
    }

    fn into_claims(self) -> (Vec<Claim>, Vec<Claim>, Option<String>, Option<f64>) {
        let convert = |raw: Vec<RawClaim>, is_pro: bool| -> Vec<Claim> {
            raw.into_iter()
                .filter(|c| !c.text.trim().is_empty())
                .map(|c| {
                    if is_pro {
                        Claim::pro(c.text, c.confidence, c.source)
                    } else {
                        Claim::con(c.text, c.confidence, c.source)
                    }
                })
                .collect()
        };
        (
            convert(self.pros, true),
            convert(self.cons, false),
            self.overall_assessment,
            self.confidence_score.map(|c| c.clamp(0.0, 1.0)),
        )
    }
}

fn raw(text: String, confidence: f64, source: &str) -> RawClaim {
    RawClaim {
        text,
        confidence,
        source: source.to_string(),
    }
}

/// Deterministic claims derived from fixed thresholds
fn fallback_claims(contract: &ContractAnalysis, dev: &DevProfile, metrics: &OnChainMetrics) -> ClaimSet {
    let mut pros = Vec::new();
    let mut cons = Vec::new();

    if metrics.liquidity_usd >= 50_000.0 {
        pros.push(raw(
            format!("Strong liquidity (${})", format_thousands(metrics.liquidity_usd)),
            0.95,
            "DexScreener",
        ));
    } else if metrics.liquidity_usd < 10_000.0 {
        cons.push(raw(
            format!("Low liquidity (${})", format_thousands(metrics.liquidity_usd)),
            0.95,
            "DexScreener",
        ));
    }

    if metrics.holder_count >= 200 {
        pros.push(raw(
            format!("Good holder base ({})", metrics.holder_count),
            0.90,
            "GoPlus",
        ));
    } else if metrics.holder_count < 50 {
        cons.push(raw(
            format!("Very few holders ({})", metrics.holder_count),
            0.90,
            "GoPlus",
        ));
    }

    if contract.is_renounced {
        pros.push(raw(
            "Contract ownership renounced".to_string(),
            0.95,
            "Contract analysis",
        ));
    }
    if contract.is_honeypot {
        cons.push(raw(
            "HONEYPOT - Cannot sell tokens".to_string(),
            0.99,
            "Honeypot checker",
        ));
    }
    if contract.has_mint_function {
        cons.push(raw(
            "Has mint function (supply can increase)".to_string(),
            0.90,
            "Contract analysis",
        ));
    }

    if dev.twitter_verified {
        pros.push(raw("Verified Twitter account".to_string(), 0.95, "Twitter"));
    }
    if dev.twitter_followers >= 10_000 {
        pros.push(raw(
            format!(
                "Large following ({})",
                format_thousands(dev.twitter_followers as f64)
            ),
            0.90,
            "Twitter",
        ));
    }
    if dev.is_anonymous {
        cons.push(raw("Anonymous developer".to_string(), 0.85, "OSINT"));
    }
    for flag in dev.red_flags.iter().take(FALLBACK_RED_FLAGS) {
        cons.push(raw(flag.clone(), 0.80, "OSINT"));
    }

    pros.truncate(MAX_PROS);
    cons.truncate(MAX_CONS);

    ClaimSet {
        pros,
        cons,
        overall_assessment: Some(FALLBACK_ASSESSMENT.to_string()),
        confidence_score: Some(FALLBACK_CONFIDENCE),
    }
}

/// Block explorer token page for a chain
pub fn explorer_token_url(chain_id: u64, token_address: &str) -> String {
    let host = match chain_id {
        1 => "etherscan.io",
        56 => "bscscan.com",
        137 => "polygonscan.com",
        42161 => "arbiscan.io",
        10 => "optimistic.etherscan.io",
        _ => "basescan.org",
    };
    format!("https://{}/token/{}", host, token_address)
}

/// Turns enrichment results into a reviewed breakdown
#[async_trait]
pub trait BreakdownSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        contract: &ContractAnalysis,
        dev: &DevProfile,
        metrics: &OnChainMetrics,
        job: Option<&mut AnalysisJob>,
    ) -> Result<TokenBreakdown>;
}

pub struct Synthesizer {
    llm: LlmClient,
    scorer: RiskScorer,
    config: SynthesisConfig,
    chain_id: u64,
}

impl Synthesizer {
    pub fn new(llm: LlmClient, config: SynthesisConfig, chain_id: u64) -> Self {
        Self {
            llm,
            scorer: RiskScorer::new(),
            config,
            chain_id,
        }
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    /// Score, generate claims and gate for review.
    ///
    /// With a job handle the job moves to SYNTHESIZING on entry and to
    /// AWAITING_APPROVAL or APPROVED on exit, or to FAILED if a transition is
    /// refused.
    #[instrument(skip_all, fields(token = %contract.token_address))]
    pub async fn synthesize(
        &self,
        contract: &ContractAnalysis,
        dev: &DevProfile,
        metrics: &OnChainMetrics,
        mut job: Option<&mut AnalysisJob>,
    ) -> Result<TokenBreakdown> {
        let started = Instant::now();

        if let Some(job) = job.as_deref_mut() {
            if job.status != AnalysisStatus::Synthesizing {
                if let Err(e) = job.advance(AnalysisStatus::Synthesizing) {
                    job.fail(e.to_string());
                    return Err(e.into());
                }
            }
        }

        let risk = self.scorer.calculate(contract, dev, metrics);
        let claims = self.generate_claims(contract, dev, metrics).await;
        let mut breakdown = self.build_breakdown(contract, dev, metrics, &risk, claims);

        breakdown.human_review_reasons = self.review_reasons(&breakdown, &risk);
        breakdown.requires_human_review = !breakdown.human_review_reasons.is_empty();
        breakdown.processing_time_seconds = started.elapsed().as_secs_f64();

        if let Some(job) = job {
            let next = if breakdown.requires_human_review {
                AnalysisStatus::AwaitingApproval
            } else {
                AnalysisStatus::Approved
            };
            job.breakdown = Some(breakdown.clone());
            if let Err(e) = job.advance(next) {
                job.fail(e.to_string());
                return Err(e.into());
            }
        }

        info!(
            "Synthesis complete: {} ({}) in {:.2}s",
            breakdown.symbol, breakdown.risk_rating, breakdown.processing_time_seconds
        );
        Ok(breakdown)
    }

    async fn generate_claims(
        &self,
        contract: &ContractAnalysis,
        dev: &DevProfile,
        metrics: &OnChainMetrics,
    ) -> ClaimSet {
        let prompt = synthesis_prompt(contract, dev, metrics);

        match self
            .llm
            .generate_structured(&prompt, Some(SYNTHESIS_SYSTEM_PROMPT), None)
            .await
        {
            Ok(value) => match ClaimSet::from_model(value) {
                Some(set) => set,
                None => {
                    warn!("Language model answer had no usable claims, using fallback");
                    fallback_claims(contract, dev, metrics)
                }
            },
            Err(e) => {
                warn!(error = %e, "Language model analysis failed, using fallback");
                fallback_claims(contract, dev, metrics)
            }
        }
    }

    fn build_breakdown(
        &self,
        contract: &ContractAnalysis,
        dev: &DevProfile,
        metrics: &OnChainMetrics,
        risk: &RiskScore,
        claims: ClaimSet,
    ) -> TokenBreakdown {
        let (pros, cons, assessment, confidence) = claims.into_claims();
        let address = &contract.token_address;

        TokenBreakdown {
            token_address: address.clone(),
            analyzed_at: Utc::now(),
            symbol: contract.symbol.clone().unwrap_or_else(|| "UNKNOWN".to_string()),
            name: contract
                .name
                .clone()
                .unwrap_or_else(|| "Unknown Token".to_string()),
            fdv_usd: metrics.fdv_usd,
            fdv_display: format_fdv(metrics.fdv_usd),
            risk_rating: risk.rating,
            primary_reason: risk.primary_reason.clone(),
            overall_confidence: confidence.unwrap_or(risk.confidence),
            overall_assessment: assessment,
            dev_twitter_url: dev.twitter_url.clone(),
            dev_twitter_handle: dev.twitter_handle.clone(),
            pros,
            cons,
            requires_human_review: false,
            human_review_reasons: Vec::new(),
            dexscreener_url: format!(
                "https://dexscreener.com/{}/{}",
                chain_slug(self.chain_id),
                address
            ),
            contract_url: explorer_token_url(self.chain_id, address),
            processing_time_seconds: 0.0,
            contract_analysis: Some(contract.clone()),
            dev_profile: Some(dev.clone()),
            on_chain_metrics: Some(metrics.clone()),
        }
    }

    /// Ordered reasons a human must look at this breakdown; empty means auto-approve
    pub fn review_reasons(&self, breakdown: &TokenBreakdown, risk: &RiskScore) -> Vec<String> {
        let mut reasons = Vec::new();

        if breakdown.overall_confidence < self.config.confidence_threshold {
            reasons.push(format!(
                "Low confidence score: {:.2}",
                breakdown.overall_confidence
            ));
        }

        if risk.rating == RiskRating::Red {
            reasons.push(format!("RED rating: {}", risk.primary_reason));
        }

        let low_confidence = breakdown
            .claims()
            .filter(|c| c.confidence < self.config.low_confidence_claim)
            .count();
        if low_confidence > 2 {
            reasons.push(format!("Low confidence claims: {}", low_confidence));
        }

        let red_flags = breakdown
            .dev_profile
            .as_ref()
            .map(|d| d.red_flags.as_slice())
            .unwrap_or_default();
        if red_flags.len() >= self.config.max_review_red_flags {
            reasons.push(format!(
                "Dev red flags: {}",
                red_flags.iter().take(2).cloned().collect::<Vec<_>>().join(", ")
            ));
        }

        if reasons.is_empty() && self.config.require_human_approval {
            reasons.push("Human approval required for all analyses".to_string());
        }

        reasons
    }
}

#[async_trait]
impl BreakdownSynthesizer for Synthesizer {
    async fn synthesize(
        &self,
        contract: &ContractAnalysis,
        dev: &DevProfile,
        metrics: &OnChainMetrics,
        job: Option<&mut AnalysisJob>,
    ) -> Result<TokenBreakdown> {
        Synthesizer::synthesize(self, contract, dev, metrics, job).await
    }
}
