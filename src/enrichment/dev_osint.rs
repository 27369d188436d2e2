//! Developer OSINT via the Twitter/X API
//!
//! The developer handle comes from source metadata (`dev_twitter` or `twitter`).
//! Profiles are cached for `dev_cache_ttl_secs` since the same developer often
//! launches several tokens in a row. Missing credentials or API failures degrade
//! to an anonymous profile rather than failing the job.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use super::DevResearcher;
use crate::config::ProviderConfig;
use crate::http_client::RateLimitedClient;
use crate::types::{ContractAnalysis, DevProfile, TokenEvent};

const MIN_ACCOUNT_AGE_DAYS: u32 = 30;
const MIN_FOLLOWERS: u64 = 100;
const MAX_PRIOR_DEPLOYMENTS: u32 = 5;
const CONTROVERSY_MENTIONS: usize = 3;

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    data: Option<TwitterUser>,
}

#[derive(Debug, Clone, Deserialize)]
struct TwitterUser {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    verified: bool,
    #[serde(default)]
    public_metrics: PublicMetrics,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PublicMetrics {
    #[serde(default)]
    followers_count: u64,
    #[serde(default)]
    following_count: u64,
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

/// Strip URL prefixes, `@` and suffixes; `None` unless a valid 1-15 char handle remains
pub fn clean_twitter_handle(raw: &str) -> Option<String> {
    let url_prefix = Regex::new(r"^https?://(www\.)?(twitter|x)\.com/").ok()?;
    let trimmed = raw.trim();
    let stripped = url_prefix.replace(trimmed, "");
    let handle = stripped
        .trim_start_matches('@')
        .split(['/', '?'])
        .next()
        .unwrap_or("");

    let valid = !handle.is_empty()
        && handle.len() <= 15
        && handle.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then(|| handle.to_string())
}

/// Follower/following ratio scaled into 0-1
fn engagement_rate(metrics: &PublicMetrics) -> f64 {
    if metrics.followers_count == 0 {
        return 0.0;
    }
    let ratio = metrics.followers_count as f64 / metrics.following_count.max(1) as f64;
    (ratio / 10.0).min(1.0)
}

struct RedFlagInputs<'a> {
    profile: &'a DevProfile,
    has_profile_data: bool,
    engagement: f64,
    known_scammer: bool,
    controversy: bool,
    contract: &'a ContractAnalysis,
}

fn red_flags(inputs: &RedFlagInputs<'_>) -> Vec<String> {
    let mut flags = Vec::new();
    let profile = inputs.profile;

    if inputs.has_profile_data {
        if profile.twitter_account_age_days < MIN_ACCOUNT_AGE_DAYS {
            flags.push("Twitter account less than 30 days old".to_string());
        }
        if profile.twitter_followers < MIN_FOLLOWERS {
            flags.push("Very low follower count (<100)".to_string());
        }
    }
    if inputs.known_scammer {
        flags.push("Known scammer/rugger".to_string());
    }
    if inputs.contract.deployer_prior_tokens > MAX_PRIOR_DEPLOYMENTS {
        flags.push(format!(
            "Deployer has {} prior token deployments",
            inputs.contract.deployer_prior_tokens
        ));
    }
    if profile.twitter_followers > 10_000 && inputs.engagement < 0.01 {
        flags.push("Possible fake followers (low engagement)".to_string());
    }
    if inputs.controversy {
        flags.push("Controversy/scam mentions found".to_string());
    }
    flags
}

/// 0-100 reputation from profile signals and red flags
fn reputation(profile: &DevProfile) -> f64 {
    let mut score: f64 = 50.0;

    if profile.twitter_verified {
        score += 15.0;
    }
    score += match profile.twitter_account_age_days {
        d if d > 365 => 10.0,
        d if d > 180 => 5.0,
        _ => 0.0,
    };
    score += match profile.twitter_followers {
        f if f > 10_000 => 15.0,
        f if f > 1_000 => 10.0,
        f if f > 500 => 5.0,
        _ => 0.0,
    };
    if profile.attribution_verified {
        score += 20.0;
    }
    if !profile.is_anonymous {
        score += 5.0;
    }

    for flag in &profile.red_flags {
        let flag = flag.to_lowercase();
        score -= if flag.contains("scammer") {
            50.0
        } else if flag.contains("fake followers") {
            15.0
        } else if flag.contains("less than") {
            10.0
        } else {
            5.0
        };
    }

    score.clamp(0.0, 100.0)
}

pub struct TwitterDevResearcher {
    client: RateLimitedClient,
    base_url: String,
    bearer_token: Option<String>,
    profile_cache: Cache<String, Option<TwitterUser>>,
    known_scammers: Arc<RwLock<HashSet<String>>>,
}

impl TwitterDevResearcher {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            client: RateLimitedClient::new(
                "twitter",
                config.request_timeout_secs,
                config.rate_limit_per_minute,
            )?,
            base_url: config.twitter_url.trim_end_matches('/').to_string(),
            bearer_token: config.twitter_bearer_token.clone(),
            profile_cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(config.dev_cache_ttl_secs))
                .build(),
            known_scammers: Arc::new(RwLock::new(HashSet::new())),
        })
    }

    pub async fn add_known_scammer(&self, handle: &str) {
        self.known_scammers
            .write()
            .await
            .insert(handle.to_lowercase());
    }

    fn auth_headers(&self) -> Option<Vec<(&'static str, String)>> {
        self.bearer_token
            .as_ref()
            .map(|token| vec![("Authorization", format!("Bearer {}", token))])
    }

    async fn fetch_user(&self, handle: &str) -> Result<Option<TwitterUser>> {
        let Some(headers) = self.auth_headers() else {
            return Ok(None);
        };
        let url = format!("{}/users/by/username/{}", self.base_url, handle);
        let envelope: UserEnvelope = self
            .client
            .get_json(
                &url,
                &[(
                    "user.fields",
                    "created_at,name,public_metrics,verified".to_string(),
                )],
                &headers,
            )
            .await?;
        Ok(envelope.data)
    }

    /// Cached profile lookup. Errors are not cached.
    async fn profile(&self, handle: &str) -> Option<TwitterUser> {
        let key = handle.to_lowercase();
        if let Some(cached) = self.profile_cache.get(&key).await {
            debug!(handle, "Twitter profile cache hit");
            return cached;
        }

        match self.fetch_user(handle).await {
            Ok(user) => {
                self.profile_cache.insert(key, user.clone()).await;
                user
            }
            Err(e) => {
                warn!(handle, error = %e, "Twitter profile lookup failed");
                None
            }
        }
    }

    async fn has_controversy(&self, handle: &str) -> bool {
        let Some(headers) = self.auth_headers() else {
            return false;
        };
        let url = format!("{}/tweets/search/recent", self.base_url);
        let result: Result<SearchEnvelope> = self
            .client
            .get_json(
                &url,
                &[
                    ("query", format!("@{} (scam OR rug OR fraud OR fake)", handle)),
                    ("max_results", "10".to_string()),
                ],
                &headers,
            )
            .await;

        match result {
            Ok(search) => search.data.len() >= CONTROVERSY_MENTIONS,
            Err(e) => {
                debug!(handle, error = %e, "Controversy search failed");
                false
            }
        }
    }
}

#[async_trait]
impl DevResearcher for TwitterDevResearcher {
    async fn initialize(&self) -> Result<()> {
        if self.bearer_token.is_none() {
            warn!("Twitter bearer token not configured, dev research limited to metadata");
        }
        info!("Dev OSINT researcher initialized");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.profile_cache.invalidate_all();
        Ok(())
    }

    #[instrument(skip(self, event, contract), fields(token = %event.token_address))]
    async fn research(&self, event: &TokenEvent, contract: &ContractAnalysis) -> Result<DevProfile> {
        let mut profile = DevProfile::anonymous(&event.token_address);

        let handle = event
            .source_metadata
            .get("dev_twitter")
            .or_else(|| event.source_metadata.get("twitter"))
            .and_then(|raw| clean_twitter_handle(raw));

        let Some(handle) = handle else {
            profile.red_flags = red_flags(&RedFlagInputs {
                profile: &profile,
                has_profile_data: false,
                engagement: 0.0,
                known_scammer: false,
                controversy: false,
                contract,
            });
            profile.reputation_score = reputation(&profile);
            info!("No developer handle found");
            return Ok(profile);
        };

        profile.twitter_url = Some(format!("https://twitter.com/{}", handle));
        profile.twitter_handle = Some(handle.clone());

        let (user, controversy) = tokio::join!(self.profile(&handle), self.has_controversy(&handle));

        let mut engagement = 0.0;
        if let Some(user) = &user {
            profile.twitter_followers = user.public_metrics.followers_count;
            profile.twitter_verified = user.verified;
            profile.twitter_account_age_days = user
                .created_at
                .map(|created| (Utc::now() - created).num_days().max(0) as u32)
                .unwrap_or(0);
            engagement = engagement_rate(&user.public_metrics);
            debug!(name = user.name.as_deref().unwrap_or(""), "Twitter profile loaded");
        }

        profile.is_anonymous = profile.twitter_followers < MIN_FOLLOWERS;
        let known_scammer = self
            .known_scammers
            .read()
            .await
            .contains(&handle.to_lowercase());

        profile.red_flags = red_flags(&RedFlagInputs {
            profile: &profile,
            has_profile_data: user.is_some(),
            engagement,
            known_scammer,
            controversy,
            contract,
        });
        profile.reputation_score = reputation(&profile);

        info!(
            handle = %handle,
            followers = profile.twitter_followers,
            red_flags = profile.red_flags.len(),
            "Dev research complete"
        );
        Ok(profile)
    }
}
