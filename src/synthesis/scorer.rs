//! Deterministic risk scoring
//!
//! Four weighted component scores (0-100, higher is safer) are combined into an
//! overall score. The rating comes from the overall score and the number of
//! negative factors, with hard RED overrides for honeypots, known scammers and
//! five or more negatives.
//!
//! # Bands
//! | Component | GREEN | YELLOW | ORANGE |
//! |---|---|---|---|
//! | Liquidity (USD) | ≥ 50k | ≥ 10k | ≥ 5k |
//! | Holders | ≥ 200 | ≥ 100 | ≥ 50 |
//! | Top-10 concentration | ≤ 10% | ≤ 20% | ≤ 30% |

use serde::{Deserialize, Serialize};

use crate::types::{ContractAnalysis, DevProfile, OnChainMetrics, RiskRating};
use crate::utils::format_thousands;

pub const LIQUIDITY_GREEN: f64 = 50_000.0;
pub const LIQUIDITY_YELLOW: f64 = 10_000.0;
pub const LIQUIDITY_ORANGE: f64 = 5_000.0;

pub const HOLDERS_GREEN: u64 = 200;
pub const HOLDERS_YELLOW: u64 = 100;
pub const HOLDERS_ORANGE: u64 = 50;

pub const CONCENTRATION_GREEN: f64 = 10.0;
pub const CONCENTRATION_YELLOW: f64 = 20.0;
pub const CONCENTRATION_ORANGE: f64 = 30.0;

/// Negative factor count that forces RED
const MAX_NEGATIVE_FACTORS: usize = 5;

/// Component weights, summing to 1.0
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub liquidity: f64,
    pub holders: f64,
    pub contract: f64,
    pub dev: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            liquidity: 0.25,
            holders: 0.20,
            contract: 0.30,
            dev: 0.25,
        }
    }
}

/// Scored rating with the factors that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    pub rating: RiskRating,
    /// 0-100, higher is safer
    pub overall_score: f64,
    /// Data completeness, 0.5-1.0
    pub confidence: f64,
    pub liquidity_score: f64,
    pub holder_score: f64,
    pub contract_score: f64,
    pub dev_score: f64,
    pub primary_reason: String,
    pub positive_factors: Vec<String>,
    pub negative_factors: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RiskScorer {
    weights: ScoreWeights,
}

impl RiskScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weights(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    pub fn calculate(
        &self,
        contract: &ContractAnalysis,
        dev: &DevProfile,
        metrics: &OnChainMetrics,
    ) -> RiskScore {
        let liquidity_score = score_liquidity(metrics.liquidity_usd);
        let holder_score = score_holders(metrics);
        let contract_score = score_contract(contract);
        let dev_score = score_dev(dev);

        let overall_score = liquidity_score * self.weights.liquidity
            + holder_score * self.weights.holders
            + contract_score * self.weights.contract
            + dev_score * self.weights.dev;

        let (positive_factors, negative_factors) = collect_factors(contract, dev, metrics);
        let rating = determine_rating(overall_score, contract, &negative_factors);

        RiskScore {
            rating,
            overall_score,
            confidence: data_confidence(contract, dev, metrics),
            liquidity_score,
            holder_score,
            contract_score,
            dev_score,
            primary_reason: primary_reason(rating, contract, dev, metrics),
            positive_factors,
            negative_factors,
        }
    }
}

fn score_liquidity(liquidity: f64) -> f64 {
    if liquidity >= LIQUIDITY_GREEN {
        (80.0 + (liquidity - LIQUIDITY_GREEN) / 5_000.0).min(100.0)
    } else if liquidity >= LIQUIDITY_YELLOW {
        50.0 + (liquidity - LIQUIDITY_YELLOW) / (LIQUIDITY_GREEN - LIQUIDITY_YELLOW) * 30.0
    } else if liquidity >= LIQUIDITY_ORANGE {
        20.0 + (liquidity - LIQUIDITY_ORANGE) / (LIQUIDITY_YELLOW - LIQUIDITY_ORANGE) * 30.0
    } else {
        (liquidity / LIQUIDITY_ORANGE * 20.0).max(0.0)
    }
}

/// Holder count (0-50) plus concentration (0-50)
fn score_holders(metrics: &OnChainMetrics) -> f64 {
    let holders = metrics.holder_count as f64;
    let (green, yellow, orange) = (
        HOLDERS_GREEN as f64,
        HOLDERS_YELLOW as f64,
        HOLDERS_ORANGE as f64,
    );

    let count_score = if holders >= green {
        50.0
    } else if holders >= yellow {
        30.0 + (holders - yellow) / (green - yellow) * 20.0
    } else if holders >= orange {
        10.0 + (holders - orange) / (yellow - orange) * 20.0
    } else {
        holders / orange * 10.0
    };

    let pct = metrics.top_10_holder_pct;
    let concentration_score = if pct <= CONCENTRATION_GREEN {
        50.0
    } else if pct <= CONCENTRATION_YELLOW {
        30.0 + (CONCENTRATION_YELLOW - pct) / (CONCENTRATION_YELLOW - CONCENTRATION_GREEN) * 20.0
    } else if pct <= CONCENTRATION_ORANGE {
        10.0 + (CONCENTRATION_ORANGE - pct) / (CONCENTRATION_ORANGE - CONCENTRATION_YELLOW) * 20.0
    } else {
        ((100.0 - pct) / (100.0 - CONCENTRATION_ORANGE) * 10.0).max(0.0)
    };

    count_score + concentration_score
}

fn score_contract(contract: &ContractAnalysis) -> f64 {
    if contract.is_honeypot {
        return 0.0;
    }

    let mut score: f64 = 100.0;
    if contract.has_mint_function {
        score -= 25.0;
    }
    if contract.has_blacklist {
        score -= 20.0;
    }
    if contract.has_proxy {
        score -= 15.0;
    }
    if !contract.is_renounced {
        score -= 10.0;
    }

    if contract.deployer_balance_pct > 10.0 {
        score -= 15.0;
    } else if contract.deployer_balance_pct > 5.0 {
        score -= 10.0;
    }

    // Serial deployers
    if contract.deployer_prior_tokens > 10 {
        score -= 20.0;
    } else if contract.deployer_prior_tokens > 5 {
        score -= 10.0;
    }

    score.max(0.0)
}

fn score_dev(dev: &DevProfile) -> f64 {
    let mut score: f64 = 50.0;

    if dev.attribution_verified {
        score += 25.0;
    }
    if dev.twitter_verified {
        score += 15.0;
    }
    score += match dev.twitter_followers {
        f if f >= 10_000 => 15.0,
        f if f >= 1_000 => 10.0,
        f if f >= 500 => 5.0,
        _ => 0.0,
    };
    score += match dev.twitter_account_age_days {
        d if d >= 365 => 10.0,
        d if d >= 180 => 5.0,
        _ => 0.0,
    };
    if dev.reputation_score >= 80.0 {
        score += 10.0;
    } else if dev.reputation_score >= 60.0 {
        score += 5.0;
    }

    if dev.is_anonymous {
        score -= 20.0;
    }
    for flag in &dev.red_flags {
        let flag = flag.to_lowercase();
        score -= if flag.contains("scammer") || flag.contains("rug") {
            40.0
        } else if flag.contains("fake") {
            15.0
        } else {
            10.0
        };
    }

    score.clamp(0.0, 100.0)
}

fn collect_factors(
    contract: &ContractAnalysis,
    dev: &DevProfile,
    metrics: &OnChainMetrics,
) -> (Vec<String>, Vec<String>) {
    let mut positive = Vec::new();
    let mut negative = Vec::new();

    if metrics.liquidity_usd >= LIQUIDITY_GREEN {
        positive.push(format!(
            "Strong liquidity (${})",
            format_thousands(metrics.liquidity_usd)
        ));
    } else if metrics.liquidity_usd < LIQUIDITY_ORANGE {
        negative.push(format!(
            "Low liquidity (${})",
            format_thousands(metrics.liquidity_usd)
        ));
    }

    if metrics.holder_count >= HOLDERS_GREEN {
        positive.push(format!("Good holder base ({})", metrics.holder_count));
    } else if metrics.holder_count < HOLDERS_ORANGE {
        negative.push(format!("Few holders ({})", metrics.holder_count));
    }

    if metrics.top_10_holder_pct <= CONCENTRATION_GREEN {
        positive.push("Well-distributed holdings".to_string());
    } else if metrics.top_10_holder_pct > CONCENTRATION_ORANGE {
        negative.push(format!(
            "High concentration ({:.1}%)",
            metrics.top_10_holder_pct
        ));
    }

    if contract.is_honeypot {
        negative.push("HONEYPOT DETECTED".to_string());
    }
    if contract.is_renounced {
        positive.push("Contract renounced".to_string());
    }
    if contract.has_mint_function {
        negative.push("Has mint function".to_string());
    }
    if contract.has_blacklist {
        negative.push("Has blacklist".to_string());
    }
    if contract.has_proxy {
        negative.push("Proxy contract (upgradeable)".to_string());
    }

    if dev.attribution_verified {
        positive.push("Dev identity verified on-chain".to_string());
    }
    if dev.twitter_verified {
        positive.push("Verified Twitter".to_string());
    }
    if dev.twitter_followers >= 10_000 {
        positive.push(format!(
            "Strong following ({})",
            format_thousands(dev.twitter_followers as f64)
        ));
    }
    if dev.is_anonymous {
        negative.push("Anonymous developer".to_string());
    }
    for flag in &dev.red_flags {
        negative.push(format!("Dev red flag: {}", flag));
    }

    (positive, negative)
}

fn determine_rating(
    overall_score: f64,
    contract: &ContractAnalysis,
    negative_factors: &[String],
) -> RiskRating {
    if contract.is_honeypot
        || negative_factors
            .iter()
            .any(|f| f.to_lowercase().contains("scammer"))
        || negative_factors.len() >= MAX_NEGATIVE_FACTORS
    {
        return RiskRating::Red;
    }

    let negatives = negative_factors.len();
    if overall_score >= 75.0 && negatives <= 1 {
        RiskRating::Green
    } else if overall_score >= 55.0 && negatives <= 2 {
        RiskRating::Yellow
    } else if overall_score >= 35.0 {
        RiskRating::Orange
    } else {
        RiskRating::Red
    }
}

fn primary_reason(
    rating: RiskRating,
    contract: &ContractAnalysis,
    dev: &DevProfile,
    metrics: &OnChainMetrics,
) -> String {
    let reason = match rating {
        RiskRating::Red => {
            if contract.is_honeypot {
                "Honeypot detected - cannot sell tokens"
            } else if dev
                .red_flags
                .iter()
                .any(|f| f.to_lowercase().contains("scammer"))
            {
                "Developer associated with known scams"
            } else {
                "Multiple critical risk factors"
            }
        }
        RiskRating::Green => {
            if dev.attribution_verified {
                "Verified developer with good metrics"
            } else if metrics.liquidity_usd >= LIQUIDITY_GREEN {
                "Strong liquidity and healthy distribution"
            } else {
                "Overall positive risk assessment"
            }
        }
        RiskRating::Yellow => {
            if dev.is_anonymous {
                "Anonymous developer - proceed with caution"
            } else if metrics.liquidity_usd < LIQUIDITY_GREEN {
                "Moderate liquidity - watch for changes"
            } else {
                "Some concerns but tradeable"
            }
        }
        RiskRating::Orange => {
            if metrics.liquidity_usd < LIQUIDITY_YELLOW {
                "Low liquidity - high slippage risk"
            } else if metrics.token_age_hours < 6.0 {
                "Very early stage - high volatility expected"
            } else {
                "Multiple risk factors - exercise caution"
            }
        }
    };
    reason.to_string()
}

/// Completeness of the input data
fn data_confidence(contract: &ContractAnalysis, dev: &DevProfile, metrics: &OnChainMetrics) -> f64 {
    let present = [
        contract.symbol.is_some(),
        contract.deployer_address.is_some(),
        dev.twitter_handle.is_some(),
        dev.attribution_verified,
        metrics.liquidity_usd > 0.0,
        metrics.holder_count > 0,
    ];
    let filled = present.iter().filter(|p| **p).count() as f64;
    (0.5 + filled * 0.1).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy() -> (ContractAnalysis, DevProfile, OnChainMetrics) {
        let contract = ContractAnalysis {
            token_address: "0xabc".to_string(),
            symbol: Some("GOOD".to_string()),
            deployer_address: Some("0xdev".to_string()),
            is_renounced: true,
            ..Default::default()
        };
        let mut dev = DevProfile::anonymous("0xabc");
        dev.twitter_handle = Some("builder".to_string());
        dev.twitter_followers = 5_000;
        dev.twitter_account_age_days = 400;
        dev.is_anonymous = false;
        let metrics = OnChainMetrics {
            token_address: "0xabc".to_string(),
            liquidity_usd: 80_000.0,
            holder_count: 300,
            top_10_holder_pct: 20.0,
            token_age_hours: 2.0,
            ..Default::default()
        };
        (contract, dev, metrics)
    }

    #[test]
    fn test_healthy_token_is_green() {
        let (contract, dev, metrics) = healthy();
        let score = RiskScorer::new().calculate(&contract, &dev, &metrics);

        assert_eq!(score.liquidity_score, 86.0);
        assert_eq!(score.holder_score, 80.0);
        assert_eq!(score.contract_score, 100.0);
        assert_eq!(score.dev_score, 70.0);
        assert!(score.negative_factors.is_empty());
        assert_eq!(score.rating, RiskRating::Green);
        assert_eq!(score.primary_reason, "Strong liquidity and healthy distribution");
        assert!(score
            .positive_factors
            .contains(&"Strong liquidity ($80,000)".to_string()));
    }

    #[test]
    fn test_honeypot_forces_red() {
        let (mut contract, dev, metrics) = healthy();
        contract.is_honeypot = true;
        let score = RiskScorer::new().calculate(&contract, &dev, &metrics);

        assert_eq!(score.contract_score, 0.0);
        assert_eq!(score.rating, RiskRating::Red);
        assert_eq!(score.primary_reason, "Honeypot detected - cannot sell tokens");
    }

    #[test]
    fn test_known_scammer_forces_red() {
        let (contract, mut dev, metrics) = healthy();
        dev.red_flags = vec!["Known scammer/rugger".to_string()];
        let score = RiskScorer::new().calculate(&contract, &dev, &metrics);

        assert_eq!(score.rating, RiskRating::Red);
        assert_eq!(score.primary_reason, "Developer associated with known scams");
    }

    #[test]
    fn test_many_negatives_force_red() {
        let (mut contract, mut dev, mut metrics) = healthy();
        contract.has_mint_function = true;
        contract.has_blacklist = true;
        contract.has_proxy = true;
        dev.is_anonymous = true;
        metrics.holder_count = 10;
        let score = RiskScorer::new().calculate(&contract, &dev, &metrics);

        assert!(score.negative_factors.len() >= 5);
        assert_eq!(score.rating, RiskRating::Red);
        assert_eq!(score.primary_reason, "Multiple critical risk factors");
    }

    #[test]
    fn test_liquidity_bands() {
        assert_eq!(score_liquidity(0.0), 0.0);
        assert_eq!(score_liquidity(2_500.0), 10.0);
        assert_eq!(score_liquidity(5_000.0), 20.0);
        assert_eq!(score_liquidity(10_000.0), 50.0);
        assert_eq!(score_liquidity(50_000.0), 80.0);
        assert_eq!(score_liquidity(1_000_000.0), 100.0);
    }

    #[test]
    fn test_confidence_tracks_completeness() {
        let empty = RiskScorer::new().calculate(
            &ContractAnalysis::default(),
            &DevProfile::anonymous("0xabc"),
            &OnChainMetrics::default(),
        );
        assert_eq!(empty.confidence, 0.5);

        let (contract, dev, metrics) = healthy();
        let full = RiskScorer::new().calculate(&contract, &dev, &metrics);
        assert!((full.confidence - 1.0).abs() < 1e-9);
    }
}
