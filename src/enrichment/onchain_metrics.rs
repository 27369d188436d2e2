//! On-chain market metrics from DEX Screener and GoPlus holder data
//!
//! # Key Features
//! - Best-pair selection: explicit pair first, then the most liquid pair on the chain
//! - Token age derived from the pair creation time
//! - Holder count and top-10 concentration from GoPlus holder data
//!
//! DEX Screener is the primary source and its failure fails the fetch; holder
//! data is best-effort.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use tracing::{debug, info, instrument};

use super::MetricsFetcher;
use crate::config::ProviderConfig;
use crate::http_client::RateLimitedClient;
use crate::types::{chain_slug, OnChainMetrics};

/// DEX Screener token lookup response
#[derive(Debug, Clone, Deserialize)]
struct DexScreenerTokensResponse {
    #[serde(default)]
    pairs: Option<Vec<DexScreenerPair>>,
}

/// DEX Screener pair data
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DexScreenerPair {
    chain_id: String,
    pair_address: String,
    price_usd: Option<String>,
    fdv: Option<f64>,
    market_cap: Option<f64>,
    liquidity: Option<DexScreenerLiquidity>,
    volume: Option<DexScreenerWindow>,
    price_change: Option<DexScreenerWindow>,
    /// Unix millis
    pair_created_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DexScreenerLiquidity {
    usd: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct DexScreenerWindow {
    h24: Option<f64>,
}

impl DexScreenerPair {
    fn liquidity_usd(&self) -> f64 {
        self.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0)
    }
}

#[derive(Debug, Deserialize)]
struct GoPlusHolderResponse {
    #[serde(default)]
    result: HashMap<String, GoPlusHolderData>,
}

#[derive(Debug, Default, Deserialize)]
struct GoPlusHolderData {
    #[serde(default, deserialize_with = "number_from_string")]
    holder_count: Option<f64>,
    #[serde(default)]
    holders: Vec<GoPlusHolder>,
}

#[derive(Debug, Deserialize)]
struct GoPlusHolder {
    /// Fraction of supply
    #[serde(default, deserialize_with = "number_from_string")]
    percent: Option<f64>,
}

/// GoPlus returns numbers as strings
fn number_from_string<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => s.parse().ok(),
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        _ => None,
    })
}

/// Explicit pair if present, otherwise the most liquid pair on `chain`, otherwise any pair
fn select_pair<'a>(
    pairs: &'a [DexScreenerPair],
    chain: &str,
    pair_address: Option<&str>,
) -> Option<&'a DexScreenerPair> {
    if let Some(wanted) = pair_address {
        if let Some(pair) = pairs
            .iter()
            .find(|p| p.pair_address.eq_ignore_ascii_case(wanted))
        {
            return Some(pair);
        }
    }

    let by_liquidity = |a: &&DexScreenerPair, b: &&DexScreenerPair| {
        a.liquidity_usd()
            .partial_cmp(&b.liquidity_usd())
            .unwrap_or(std::cmp::Ordering::Equal)
    };

    pairs
        .iter()
        .filter(|p| p.chain_id == chain)
        .max_by(by_liquidity)
        .or_else(|| pairs.first())
}

fn apply_pair(metrics: &mut OnChainMetrics, pair: &DexScreenerPair, now_ms: i64) {
    metrics.pair_address = Some(pair.pair_address.clone());
    metrics.price_usd = pair
        .price_usd
        .as_deref()
        .and_then(|p| p.parse().ok())
        .unwrap_or(0.0);
    metrics.fdv_usd = pair.fdv.unwrap_or(0.0);
    metrics.market_cap_usd = pair.market_cap.unwrap_or(0.0);
    metrics.liquidity_usd = pair.liquidity_usd();
    metrics.volume_24h_usd = pair.volume.as_ref().and_then(|v| v.h24).unwrap_or(0.0);
    metrics.price_change_24h = pair
        .price_change
        .as_ref()
        .and_then(|v| v.h24)
        .unwrap_or(0.0);
    if let Some(created) = pair.pair_created_at {
        metrics.token_age_hours = ((now_ms - created).max(0) as f64) / 3_600_000.0;
    }
}

fn apply_holders(metrics: &mut OnChainMetrics, data: &GoPlusHolderData) {
    metrics.holder_count = data
        .holder_count
        .map(|n| n.max(0.0) as u64)
        .unwrap_or(data.holders.len() as u64);

    let mut shares: Vec<f64> = data.holders.iter().filter_map(|h| h.percent).collect();
    shares.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    metrics.top_10_holder_pct = shares.iter().take(10).sum::<f64>() * 100.0;
}

pub struct DexScreenerMetricsFetcher {
    dexscreener: RateLimitedClient,
    goplus: RateLimitedClient,
    dexscreener_url: String,
    goplus_url: String,
}

impl DexScreenerMetricsFetcher {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            dexscreener: RateLimitedClient::new(
                "dexscreener",
                config.request_timeout_secs,
                config.rate_limit_per_minute,
            )?,
            goplus: RateLimitedClient::new(
                "goplus-holders",
                config.request_timeout_secs,
                config.rate_limit_per_minute,
            )?,
            dexscreener_url: config.dexscreener_url.trim_end_matches('/').to_string(),
            goplus_url: config.goplus_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_holders(&self, token_address: &str, chain_id: u64) -> Result<GoPlusHolderData> {
        let url = format!("{}/token_security/{}", self.goplus_url, chain_id);
        let response: GoPlusHolderResponse = self
            .goplus
            .get_json(&url, &[("contract_addresses", token_address.to_string())], &[])
            .await?;

        let lower = token_address.to_lowercase();
        response
            .result
            .into_iter()
            .find(|(key, _)| key.to_lowercase() == lower)
            .map(|(_, data)| data)
            .ok_or_else(|| anyhow!("No holder data for {}", token_address))
    }
}

#[async_trait]
impl MetricsFetcher for DexScreenerMetricsFetcher {
    async fn initialize(&self) -> Result<()> {
        info!("On-chain metrics fetcher initialized");
        Ok(())
    }

    #[instrument(skip(self), fields(token = %token_address))]
    async fn fetch(
        &self,
        token_address: &str,
        pair_address: Option<&str>,
        chain_id: u64,
    ) -> Result<OnChainMetrics> {
        let url = format!("{}/dex/tokens/{}", self.dexscreener_url, token_address);

        let (pairs, holders) = tokio::join!(
            self.dexscreener
                .get_json::<DexScreenerTokensResponse>(&url, &[], &[]),
            self.fetch_holders(token_address, chain_id),
        );

        let pairs = pairs?.pairs.unwrap_or_default();
        let pair = select_pair(&pairs, chain_slug(chain_id), pair_address)
            .ok_or_else(|| anyhow!("No trading pairs found for {}", token_address))?;

        let now = Utc::now();
        let mut metrics = OnChainMetrics {
            token_address: token_address.to_string(),
            fetched_at: Some(now),
            ..Default::default()
        };
        apply_pair(&mut metrics, pair, now.timestamp_millis());

        match holders {
            Ok(data) => apply_holders(&mut metrics, &data),
            Err(e) => debug!(error = %e, "Holder data unavailable"),
        }

        info!(
            fdv = metrics.fdv_usd,
            liquidity = metrics.liquidity_usd,
            holders = metrics.holder_count,
            "Metrics fetched"
        );
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs() -> Vec<DexScreenerPair> {
        serde_json::from_str::<DexScreenerTokensResponse>(
            r#"{"pairs":[
                {"chainId":"ethereum","pairAddress":"0xeth","liquidity":{"usd":900000.0}},
                {"chainId":"base","pairAddress":"0xsmall","liquidity":{"usd":1000.0}},
                {"chainId":"base","pairAddress":"0xbig","priceUsd":"0.0012","fdv":2500000.0,
                 "marketCap":2000000.0,"liquidity":{"usd":80000.0},"volume":{"h24":150000.0},
                 "priceChange":{"h24":-12.5},"pairCreatedAt":1700000000000}
            ]}"#,
        )
        .unwrap()
        .pairs
        .unwrap()
    }

    #[test]
    fn test_select_pair_prefers_liquid_pair_on_chain() {
        let pairs = pairs();
        let pair = select_pair(&pairs, "base", None).unwrap();
        assert_eq!(pair.pair_address, "0xbig");
    }

    #[test]
    fn test_select_pair_honours_explicit_pair() {
        let pairs = pairs();
        let pair = select_pair(&pairs, "base", Some("0xSMALL")).unwrap();
        assert_eq!(pair.pair_address, "0xsmall");
    }

    #[test]
    fn test_apply_pair_fields_and_age() {
        let pairs = pairs();
        let pair = select_pair(&pairs, "base", None).unwrap();
        let mut metrics = OnChainMetrics::default();
        apply_pair(&mut metrics, pair, 1_700_000_000_000 + 2 * 3_600_000);

        assert_eq!(metrics.liquidity_usd, 80_000.0);
        assert_eq!(metrics.fdv_usd, 2_500_000.0);
        assert_eq!(metrics.price_usd, 0.0012);
        assert_eq!(metrics.price_change_24h, -12.5);
        assert!((metrics.token_age_hours - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_apply_holders_top_ten() {
        let data: GoPlusHolderData = serde_json::from_str(
            r#"{"holder_count":"321","holders":[
                {"percent":"0.05"},{"percent":"0.10"},{"percent":"0.01"}
            ]}"#,
        )
        .unwrap();
        let mut metrics = OnChainMetrics::default();
        apply_holders(&mut metrics, &data);

        assert_eq!(metrics.holder_count, 321);
        assert!((metrics.top_10_holder_pct - 16.0).abs() < 1e-9);
    }
}
