//! Prompt templates for breakdown synthesis

use crate::types::{ContractAnalysis, DevProfile, OnChainMetrics};
use crate::utils::format_thousands;

pub const SYNTHESIS_SYSTEM_PROMPT: &str = "You are a careful crypto token analyst. \
You only state facts present in the data you are given and answer with JSON only.";

/// Fill the synthesis template from every enrichment field
pub fn synthesis_prompt(
    contract: &ContractAnalysis,
    dev: &DevProfile,
    metrics: &OnChainMetrics,
) -> String {
    let red_flags = if dev.red_flags.is_empty() {
        "None".to_string()
    } else {
        dev.red_flags.join(", ")
    };

    format!(
        r#"You are generating a token breakdown report for a crypto trading community.

## INPUT DATA
Token Address: {token_address}
Symbol: {symbol}
Name: {name}
Chain: Base (Ethereum L2)

### Contract Analysis
- Deployer Address: {deployer}
- Deployer Holding: {deployer_pct:.1}%
- Is Honeypot: {is_honeypot}
- Has Mint Function: {has_mint}
- Has Blacklist: {has_blacklist}
- Owner Renounced: {is_renounced}
- Has Proxy: {has_proxy}
- Deployer Prior Tokens: {prior_tokens}

### Developer Profile
- Twitter: {dev_twitter}
- Followers: {followers}
- Account Age: {account_age} days
- Verified: {verified}
- Attribution Verified: {attribution}
- Prior Projects: {prior_projects}
- Red Flags: {red_flags}
- Is Anonymous: {is_anonymous}

### On-Chain Metrics
- FDV: ${fdv}
- Market Cap: ${market_cap}
- Liquidity: ${liquidity}
- 24h Volume: ${volume}
- Holders: {holders}
- Top 10 Holder %: {top_10:.1}%
- Token Age: {age:.1} hours
- Price Change 24h: {price_change:+.1}%

## TASK
Generate exactly 3-5 PROs and 2-4 CONs for this token.

## RULES
1. Each point MUST be factual and based on the data provided above
2. Each point should be concise (one sentence)
3. Include source attribution in parentheses when possible
4. Do NOT hallucinate or make up information
5. If you can't verify something, explicitly say "unverified"
6. Focus on what traders care about: risk, opportunity, and credibility

## OUTPUT FORMAT
Return ONLY valid JSON in this exact format:
{{
    "pros": [
        {{"text": "Point text here", "confidence": 0.95, "source": "data source"}}
    ],
    "cons": [
        {{"text": "Point text here", "confidence": 0.85, "source": "data source"}}
    ],
    "overall_assessment": "One sentence summary",
    "confidence_score": 0.75
}}
"#,
        token_address = contract.token_address,
        symbol = contract.symbol.as_deref().unwrap_or("UNKNOWN"),
        name = contract.name.as_deref().unwrap_or("Unknown Token"),
        deployer = contract.deployer_address.as_deref().unwrap_or("Unknown"),
        deployer_pct = contract.deployer_balance_pct,
        is_honeypot = contract.is_honeypot,
        has_mint = contract.has_mint_function,
        has_blacklist = contract.has_blacklist,
        is_renounced = contract.is_renounced,
        has_proxy = contract.has_proxy,
        prior_tokens = contract.deployer_prior_tokens,
        dev_twitter = dev.twitter_url.as_deref().unwrap_or("Anonymous"),
        followers = dev.twitter_followers,
        account_age = dev.twitter_account_age_days,
        verified = dev.twitter_verified,
        attribution = dev.attribution_verified,
        prior_projects = dev.prior_projects,
        red_flags = red_flags,
        is_anonymous = dev.is_anonymous,
        fdv = format_thousands(metrics.fdv_usd),
        market_cap = format_thousands(metrics.market_cap_usd),
        liquidity = format_thousands(metrics.liquidity_usd),
        volume = format_thousands(metrics.volume_24h_usd),
        holders = metrics.holder_count,
        top_10 = metrics.top_10_holder_pct,
        age = metrics.token_age_hours,
        price_change = metrics.price_change_24h,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_carries_enrichment_fields() {
        let contract = ContractAnalysis {
            token_address: "0xabc".to_string(),
            symbol: Some("PEPE".to_string()),
            is_honeypot: true,
            ..Default::default()
        };
        let mut dev = DevProfile::anonymous("0xabc");
        dev.red_flags = vec!["Very low follower count (<100)".to_string()];
        let metrics = OnChainMetrics {
            liquidity_usd: 80_000.0,
            price_change_24h: 12.34,
            ..Default::default()
        };

        let prompt = synthesis_prompt(&contract, &dev, &metrics);
        assert!(prompt.contains("Symbol: PEPE"));
        assert!(prompt.contains("Name: Unknown Token"));
        assert!(prompt.contains("Is Honeypot: true"));
        assert!(prompt.contains("Twitter: Anonymous"));
        assert!(prompt.contains("Red Flags: Very low follower count (<100)"));
        assert!(prompt.contains("Liquidity: $80,000"));
        assert!(prompt.contains("Price Change 24h: +12.3%"));
        assert!(prompt.contains("\"confidence_score\": 0.75"));
    }
}
