//! Contract security analysis backed by GoPlus and honeypot.is
//!
//! GoPlus supplies token metadata, owner and permission flags; honeypot.is runs
//! a buy/sell simulation. The two lookups run concurrently and either may fail
//! on its own. The analysis only errors when both are unavailable, since a
//! token with no security data would otherwise look clean.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

use super::ContractAnalyzer;
use crate::config::ProviderConfig;
use crate::http_client::RateLimitedClient;
use crate::types::{ContractAnalysis, TokenEvent};

/// Sell tax (%) above which a token is treated as a honeypot
const MAX_SELL_TAX_PCT: f64 = 10.0;

/// Owner addresses that mean ownership was given up
const RENOUNCED_OWNERS: [&str; 2] = [
    "0x0000000000000000000000000000000000000000",
    "0x000000000000000000000000000000000000dead",
];

#[derive(Debug, Deserialize)]
struct GoPlusResponse {
    #[serde(default)]
    result: HashMap<String, GoPlusToken>,
}

/// GoPlus encodes flags as "0"/"1" strings
#[derive(Debug, Default, Deserialize)]
struct GoPlusToken {
    token_name: Option<String>,
    token_symbol: Option<String>,
    creator_address: Option<String>,
    /// Fraction of supply, e.g. "0.05"
    creator_percent: Option<String>,
    owner_address: Option<String>,
    is_mintable: Option<String>,
    is_blacklisted: Option<String>,
    is_proxy: Option<String>,
    is_honeypot: Option<String>,
    cannot_sell_all: Option<String>,
}

impl GoPlusToken {
    fn flag(value: &Option<String>) -> bool {
        value.as_deref() == Some("1")
    }

    fn is_renounced(&self) -> bool {
        match self.owner_address.as_deref().map(str::to_lowercase) {
            None => false,
            Some(owner) if owner.is_empty() => true,
            Some(owner) => RENOUNCED_OWNERS.contains(&owner.as_str()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HoneypotResponse {
    honeypot_result: Option<HoneypotResult>,
    simulation_result: Option<SimulationResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HoneypotResult {
    #[serde(default)]
    is_honeypot: bool,
    honeypot_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimulationResult {
    sell_tax: Option<f64>,
}

pub struct GoPlusContractAnalyzer {
    client: RateLimitedClient,
    goplus_url: String,
    honeypot_url: String,
    basescan_url: String,
    basescan_api_key: Option<String>,
}

impl GoPlusContractAnalyzer {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            client: RateLimitedClient::new(
                "goplus",
                config.request_timeout_secs,
                config.rate_limit_per_minute,
            )?,
            goplus_url: config.goplus_url.trim_end_matches('/').to_string(),
            honeypot_url: config.honeypot_url.trim_end_matches('/').to_string(),
            basescan_url: config.basescan_url.clone(),
            basescan_api_key: config.basescan_api_key.clone(),
        })
    }

    async fn fetch_goplus(&self, address: &str, chain_id: u64) -> Result<GoPlusToken> {
        let url = format!("{}/token_security/{}", self.goplus_url, chain_id);
        let response: GoPlusResponse = self
            .client
            .get_json(&url, &[("contract_addresses", address.to_string())], &[])
            .await?;

        let lower = address.to_lowercase();
        response
            .result
            .into_iter()
            .find(|(key, _)| key.to_lowercase() == lower)
            .map(|(_, token)| token)
            .ok_or_else(|| anyhow!("GoPlus has no data for {}", address))
    }

    async fn fetch_honeypot(&self, address: &str, chain_id: u64) -> Result<HoneypotResponse> {
        let url = format!("{}/IsHoneypot", self.honeypot_url);
        self.client
            .get_json(
                &url,
                &[
                    ("address", address.to_string()),
                    ("chainId", chain_id.to_string()),
                ],
                &[],
            )
            .await
    }

    /// Contract creations among the deployer's last 100 transactions, capped at 10
    async fn count_prior_deployments(&self, deployer: &str) -> Result<u32> {
        let Some(api_key) = &self.basescan_api_key else {
            debug!("Basescan API key not configured, skipping prior deployment lookup");
            return Ok(0);
        };

        let response: Value = self
            .client
            .get_json(
                &self.basescan_url,
                &[
                    ("module", "account".to_string()),
                    ("action", "txlist".to_string()),
                    ("address", deployer.to_string()),
                    ("sort", "desc".to_string()),
                    ("page", "1".to_string()),
                    ("offset", "100".to_string()),
                    ("apikey", api_key.clone()),
                ],
                &[],
            )
            .await?;

        let count = response["result"]
            .as_array()
            .map(|txs| {
                txs.iter()
                    .filter(|tx| {
                        tx["to"].as_str().map_or(true, str::is_empty)
                            && tx["contractAddress"].as_str().map_or(false, |c| !c.is_empty())
                    })
                    .count()
            })
            .unwrap_or(0);

        Ok(count.min(10) as u32)
    }
}

/// Merge provider responses into an analysis
fn build_analysis(
    token_address: &str,
    goplus: Option<&GoPlusToken>,
    honeypot: Option<&HoneypotResponse>,
) -> ContractAnalysis {
    let mut analysis = ContractAnalysis {
        token_address: token_address.to_string(),
        ..Default::default()
    };

    if let Some(token) = goplus {
        analysis.name = token.token_name.clone().filter(|s| !s.is_empty());
        analysis.symbol = token.token_symbol.clone().filter(|s| !s.is_empty());
        analysis.deployer_address = token.creator_address.clone().filter(|s| !s.is_empty());
        analysis.deployer_balance_pct = token
            .creator_percent
            .as_deref()
            .and_then(|p| p.parse::<f64>().ok())
            .map(|fraction| fraction * 100.0)
            .unwrap_or(0.0);
        analysis.has_mint_function = GoPlusToken::flag(&token.is_mintable);
        analysis.has_blacklist = GoPlusToken::flag(&token.is_blacklisted);
        analysis.has_proxy = GoPlusToken::flag(&token.is_proxy);
        analysis.is_renounced = token.is_renounced();

        if GoPlusToken::flag(&token.is_honeypot) {
            analysis.is_honeypot = true;
            analysis.honeypot_reason = Some("Flagged by GoPlus".to_string());
        }
        if GoPlusToken::flag(&token.cannot_sell_all) {
            analysis.is_honeypot = true;
            analysis.honeypot_reason = Some("Cannot sell all tokens".to_string());
        }
    }

    if let Some(sim) = honeypot {
        if let Some(result) = &sim.honeypot_result {
            if result.is_honeypot {
                analysis.is_honeypot = true;
                analysis.honeypot_reason = Some(
                    result
                        .honeypot_reason
                        .clone()
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "Failed sell simulation".to_string()),
                );
            }
        }
        let sell_tax = sim
            .simulation_result
            .as_ref()
            .and_then(|s| s.sell_tax)
            .unwrap_or(0.0);
        if sell_tax > MAX_SELL_TAX_PCT {
            analysis.is_honeypot = true;
            analysis.honeypot_reason = Some(format!("High sell tax: {}%", sell_tax));
        }
    }

    analysis
}

#[async_trait]
impl ContractAnalyzer for GoPlusContractAnalyzer {
    async fn initialize(&self) -> Result<()> {
        info!("Contract analyzer initialized");
        Ok(())
    }

    #[instrument(skip(self, event), fields(token = %event.token_address))]
    async fn analyze(&self, event: &TokenEvent) -> Result<ContractAnalysis> {
        let (goplus, honeypot) = tokio::join!(
            self.fetch_goplus(&event.token_address, event.chain_id),
            self.fetch_honeypot(&event.token_address, event.chain_id),
        );

        if let Err(e) = &goplus {
            warn!(error = %e, "GoPlus lookup failed");
        }
        if let Err(e) = &honeypot {
            warn!(error = %e, "Honeypot simulation failed");
        }
        if goplus.is_err() && honeypot.is_err() {
            return Err(anyhow!(
                "No contract security data available for {}",
                event.token_address
            ));
        }

        let mut analysis = build_analysis(
            &event.token_address,
            goplus.as_ref().ok(),
            honeypot.as_ref().ok(),
        );

        if analysis.symbol.is_none() {
            analysis.symbol = event.token_symbol.clone();
        }
        if analysis.name.is_none() {
            analysis.name = event.token_name.clone();
        }

        if let Some(deployer) = analysis.deployer_address.clone() {
            match self.count_prior_deployments(&deployer).await {
                Ok(count) => analysis.deployer_prior_tokens = count,
                Err(e) => debug!(error = %e, "Prior deployment lookup failed"),
            }
        }

        info!(
            symbol = analysis.symbol.as_deref().unwrap_or("?"),
            honeypot = analysis.is_honeypot,
            deployer_pct = analysis.deployer_balance_pct,
            "Contract analysis complete"
        );
        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn goplus(json: &str) -> GoPlusToken {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_goplus_flags_and_percent() {
        let token = goplus(
            r#"{"token_name":"Test","token_symbol":"TST","creator_address":"0xdev",
                "creator_percent":"0.0725","owner_address":"0x0000000000000000000000000000000000000000",
                "is_mintable":"1","is_blacklisted":"0","is_proxy":"1"}"#,
        );
        let analysis = build_analysis("0xabc", Some(&token), None);

        assert_eq!(analysis.symbol.as_deref(), Some("TST"));
        assert!((analysis.deployer_balance_pct - 7.25).abs() < 1e-9);
        assert!(analysis.has_mint_function);
        assert!(!analysis.has_blacklist);
        assert!(analysis.has_proxy);
        assert!(analysis.is_renounced);
        assert!(!analysis.is_honeypot);
    }

    #[test]
    fn test_high_sell_tax_is_honeypot() {
        let sim: HoneypotResponse = serde_json::from_str(
            r#"{"honeypotResult":{"isHoneypot":false},"simulationResult":{"sellTax":25.0}}"#,
        )
        .unwrap();
        let analysis = build_analysis("0xabc", None, Some(&sim));

        assert!(analysis.is_honeypot);
        assert_eq!(analysis.honeypot_reason.as_deref(), Some("High sell tax: 25%"));
    }

    #[test]
    fn test_live_owner_is_not_renounced() {
        let token = goplus(r#"{"owner_address":"0x1234567890123456789012345678901234567890"}"#);
        assert!(!token.is_renounced());

        let missing = goplus("{}");
        assert!(!missing.is_renounced());
    }
}
