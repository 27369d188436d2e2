//! Polling discovery sources
//!
//! - [`FeedPoller`] reads a launch feed of newly deployed agent tokens
//! - [`SocialPoller`] scans recent social posts for contract addresses
//!
//! Both remember the addresses they have already emitted, so the detector
//! orchestrator only sees cross-source repeats.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{DiscoverySource, EventSink};
use crate::config::{DetectionConfig, ProviderConfig};
use crate::http_client::RateLimitedClient;
use crate::types::{EventSource, TokenEvent};
use crate::validation::is_evm_address;

const FEED_PAGE_SIZE: u32 = 50;
const SOCIAL_MAX_RESULTS: u32 = 25;

/// Sleep for `period` unless cancelled first; returns false on cancellation
async fn pause(period: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(period) => true,
    }
}

/// Send unseen events; returns how many were forwarded
async fn forward_new(
    events: Vec<TokenEvent>,
    seen: &Mutex<HashSet<String>>,
    sink: &EventSink,
) -> Result<usize> {
    let mut seen = seen.lock().await;
    let mut forwarded = 0;
    for event in events {
        if !seen.insert(event.normalized_address()) {
            continue;
        }
        sink.send(event)
            .map_err(|_| anyhow::anyhow!("Detector queue closed"))?;
        forwarded += 1;
    }
    Ok(forwarded)
}

fn string_field(entry: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| entry.get(*key))
        .filter_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .next()
}

fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    }
}

/// Feed entries live at the top level, under `agents` or under `data`
fn feed_entries(body: &Value) -> &[Value] {
    let list = match body {
        Value::Array(_) => Some(body),
        Value::Object(map) => map.get("agents").or_else(|| map.get("data")),
        _ => None,
    };
    list.and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Convert one feed entry into an event; `None` without a valid address
fn parse_feed_entry(entry: &Value, chain_id: u64) -> Option<TokenEvent> {
    let mut address = string_field(entry, &["contract_address", "token_address", "address"])?;
    if !address.starts_with("0x") {
        address = format!("0x{}", address);
    }
    if !is_evm_address(&address) {
        debug!(address, "Skipping feed entry with invalid address");
        return None;
    }

    let mut event = TokenEvent::new(address, EventSource::Feed, chain_id);
    event.pair_address = string_field(entry, &["pair_address"]);
    event.token_symbol = string_field(entry, &["symbol", "ticker"]);
    event.token_name = string_field(entry, &["name"]);
    if let Some(created) = parse_timestamp(entry.get("created_at").or_else(|| entry.get("deployed_at"))) {
        event.detected_at = created;
    }

    let metadata: HashMap<String, String> = [
        ("feed_id", string_field(entry, &["id"])),
        ("dev_twitter", string_field(entry, &["twitter", "dev_twitter"])),
        ("description", string_field(entry, &["description"])),
        ("website", string_field(entry, &["website"])),
        ("telegram", string_field(entry, &["telegram"])),
    ]
    .into_iter()
    .filter_map(|(key, value)| value.map(|v| (key.to_string(), v)))
    .collect();
    event.source_metadata = metadata;

    Some(event)
}

pub struct FeedPoller {
    client: RateLimitedClient,
    feed_url: String,
    poll_interval: Duration,
    chain_id: u64,
    seen: Mutex<HashSet<String>>,
}

impl FeedPoller {
    pub fn new(config: &DetectionConfig, providers: &ProviderConfig, chain_id: u64) -> Result<Self> {
        Ok(Self {
            client: RateLimitedClient::new(
                "feed",
                providers.request_timeout_secs,
                providers.rate_limit_per_minute,
            )?,
            feed_url: config.feed_url.clone(),
            poll_interval: Duration::from_secs(config.feed_poll_interval_secs.max(1)),
            chain_id,
            seen: Mutex::new(HashSet::new()),
        })
    }

    /// Fetch one page of the feed and parse every entry
    pub async fn poll_once(&self) -> Result<Vec<TokenEvent>> {
        let body: Value = self
            .client
            .get_json(
                &self.feed_url,
                &[
                    ("page", "1".to_string()),
                    ("limit", FEED_PAGE_SIZE.to_string()),
                    ("sort", "created_desc".to_string()),
                ],
                &[("Accept", "application/json".to_string())],
            )
            .await
            .context("Feed poll failed")?;

        Ok(feed_entries(&body)
            .iter()
            .filter_map(|entry| parse_feed_entry(entry, self.chain_id))
            .collect())
    }
}

#[async_trait]
impl DiscoverySource for FeedPoller {
    fn name(&self) -> &str {
        "feed"
    }

    async fn connect(&self) -> Result<()> {
        info!("Feed poller ready: {}", self.feed_url);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        info!("Feed poller disconnected");
        Ok(())
    }

    async fn run(&self, sink: EventSink, cancel: CancellationToken) -> Result<()> {
        info!("Starting feed poller (interval: {:?})", self.poll_interval);
        loop {
            match self.poll_once().await {
                Ok(events) => {
                    let forwarded = forward_new(events, &self.seen, &sink).await?;
                    if forwarded > 0 {
                        info!("Feed poller found {} new tokens", forwarded);
                    }
                }
                Err(e) => warn!(error = %e, "Feed poll failed"),
            }
            if !pause(self.poll_interval, &cancel).await {
                break;
            }
        }
        info!("Feed poller stopped");
        Ok(())
    }
}

/// A post returned by a social search
#[derive(Debug, Clone, PartialEq)]
pub struct SocialPost {
    pub id: String,
    pub text: String,
    pub author: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait SocialSearch: Send + Sync {
    async fn search_recent(&self, query: &str) -> Result<Vec<SocialPost>>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<Tweet>,
    #[serde(default)]
    includes: Option<Includes>,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    id: String,
    text: String,
    author_id: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<TweetAuthor>,
}

#[derive(Debug, Deserialize)]
struct TweetAuthor {
    id: String,
    username: String,
}

/// Twitter/X API v2 recent search
pub struct TwitterSearch {
    client: RateLimitedClient,
    base_url: String,
    bearer_token: String,
}

impl TwitterSearch {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let bearer_token = config
            .twitter_bearer_token
            .clone()
            .context("TWITTER_BEARER_TOKEN is not configured")?;
        Ok(Self {
            client: RateLimitedClient::new(
                "twitter-search",
                config.request_timeout_secs,
                config.rate_limit_per_minute,
            )?,
            base_url: config.twitter_url.trim_end_matches('/').to_string(),
            bearer_token,
        })
    }
}

#[async_trait]
impl SocialSearch for TwitterSearch {
    async fn search_recent(&self, query: &str) -> Result<Vec<SocialPost>> {
        let url = format!("{}/tweets/search/recent", self.base_url);
        let response: SearchResponse = self
            .client
            .get_json(
                &url,
                &[
                    ("query", query.to_string()),
                    ("max_results", SOCIAL_MAX_RESULTS.to_string()),
                    ("tweet.fields", "created_at,author_id".to_string()),
                    ("expansions", "author_id".to_string()),
                    ("user.fields", "username".to_string()),
                ],
                &[("Authorization", format!("Bearer {}", self.bearer_token))],
            )
            .await?;

        let authors: HashMap<String, String> = response
            .includes
            .map(|i| i.users.into_iter().map(|u| (u.id, u.username)).collect())
            .unwrap_or_default();

        Ok(response
            .data
            .into_iter()
            .map(|tweet| SocialPost {
                author: tweet
                    .author_id
                    .as_ref()
                    .and_then(|id| authors.get(id).cloned()),
                id: tweet.id,
                text: tweet.text,
                created_at: tweet.created_at,
            })
            .collect())
    }
}

pub struct SocialPoller {
    search: Arc<dyn SocialSearch>,
    query: String,
    poll_interval: Duration,
    chain_id: u64,
    address_pattern: Regex,
    symbol_pattern: Regex,
    seen: Mutex<HashSet<String>>,
}

impl SocialPoller {
    pub fn new(search: Arc<dyn SocialSearch>, config: &DetectionConfig, chain_id: u64) -> Result<Self> {
        let query = if config.social_query.contains("-is:retweet") {
            config.social_query.clone()
        } else {
            format!("{} -is:retweet", config.social_query)
        };
        Ok(Self {
            search,
            query,
            poll_interval: Duration::from_secs(config.social_poll_interval_secs.max(1)),
            chain_id,
            address_pattern: Regex::new(r"0x[a-fA-F0-9]{40}").context("address pattern")?,
            symbol_pattern: Regex::new(r"\$([A-Z]{2,10})\b").context("symbol pattern")?,
            seen: Mutex::new(HashSet::new()),
        })
    }

    /// First contract address in the post, with a `$TICKER` hint when present
    pub fn extract_event(&self, post: &SocialPost) -> Option<TokenEvent> {
        let address = self.address_pattern.find(&post.text)?.as_str();

        let mut event = TokenEvent::new(address, EventSource::Social, self.chain_id);
        event.token_symbol = self
            .symbol_pattern
            .captures(&post.text)
            .map(|c| c[1].to_string());
        if let Some(created) = post.created_at {
            event.detected_at = created;
        }
        event
            .source_metadata
            .insert("post_id".to_string(), post.id.clone());
        event
            .source_metadata
            .insert("post_text".to_string(), post.text.clone());
        if let Some(author) = &post.author {
            event
                .source_metadata
                .insert("author_username".to_string(), author.clone());
        }
        Some(event)
    }

    pub async fn poll_once(&self) -> Result<Vec<TokenEvent>> {
        let posts = self.search.search_recent(&self.query).await?;
        Ok(posts.iter().filter_map(|p| self.extract_event(p)).collect())
    }
}

#[async_trait]
impl DiscoverySource for SocialPoller {
    fn name(&self) -> &str {
        "social"
    }

    async fn connect(&self) -> Result<()> {
        info!("Social poller ready, query: {}", self.query);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn run(&self, sink: EventSink, cancel: CancellationToken) -> Result<()> {
        info!("Starting social poller (interval: {:?})", self.poll_interval);
        loop {
            match self.poll_once().await {
                Ok(events) => {
                    let forwarded = forward_new(events, &self.seen, &sink).await?;
                    if forwarded > 0 {
                        info!("Social poller found {} new tokens", forwarded);
                    }
                }
                Err(e) => warn!(error = %e, "Social search failed"),
            }
            if !pause(self.poll_interval, &cancel).await {
                break;
            }
        }
        info!("Social poller stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ADDRESS: &str = "0x1234567890abcdef1234567890abcdef12345678";

    #[test]
    fn test_feed_entries_accepts_all_layouts() {
        let entry = json!({"contract_address": ADDRESS});
        assert_eq!(feed_entries(&json!([entry.clone()])).len(), 1);
        assert_eq!(feed_entries(&json!({"agents": [entry.clone()]})).len(), 1);
        assert_eq!(feed_entries(&json!({"data": [entry]})).len(), 1);
        assert!(feed_entries(&json!({"unexpected": true})).is_empty());
    }

    #[test]
    fn test_parse_feed_entry() {
        let entry = json!({
            "id": 42,
            "token_address": ADDRESS.trim_start_matches("0x"),
            "ticker": "MOLT",
            "name": "Molt Agent",
            "twitter": "@molt_dev",
            "created_at": "2024-05-01T12:00:00Z"
        });
        let event = parse_feed_entry(&entry, 8453).unwrap();

        assert_eq!(event.token_address, ADDRESS);
        assert_eq!(event.source, EventSource::Feed);
        assert_eq!(event.token_symbol.as_deref(), Some("MOLT"));
        assert_eq!(event.source_metadata["dev_twitter"], "@molt_dev");
        assert_eq!(event.source_metadata["feed_id"], "42");
        assert_eq!(event.detected_at.to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }

    #[test]
    fn test_parse_feed_entry_requires_valid_address() {
        assert!(parse_feed_entry(&json!({"name": "no address"}), 8453).is_none());
        assert!(parse_feed_entry(&json!({"address": "0x123"}), 8453).is_none());
    }

    struct StaticSearch(Vec<SocialPost>);

    #[async_trait]
    impl SocialSearch for StaticSearch {
        async fn search_recent(&self, _query: &str) -> Result<Vec<SocialPost>> {
            Ok(self.0.clone())
        }
    }

    fn post(text: &str) -> SocialPost {
        SocialPost {
            id: "1".to_string(),
            text: text.to_string(),
            author: Some("caller".to_string()),
            created_at: None,
        }
    }

    #[tokio::test]
    async fn test_social_poller_extracts_addresses() {
        let search = Arc::new(StaticSearch(vec![
            post(&format!("$PEPE just launched on base {}", ADDRESS)),
            post("gm, no contract here"),
        ]));
        let poller = SocialPoller::new(search, &DetectionConfig::default(), 8453).unwrap();

        let events = poller.poll_once().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token_address, ADDRESS);
        assert_eq!(events[0].token_symbol.as_deref(), Some("PEPE"));
        assert_eq!(events[0].source_metadata["author_username"], "caller");
    }

    #[tokio::test]
    async fn test_forward_new_skips_seen() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let seen = Mutex::new(HashSet::new());
        let event = TokenEvent::new(ADDRESS, EventSource::Social, 8453);

        assert_eq!(forward_new(vec![event.clone()], &seen, &tx).await.unwrap(), 1);
        assert_eq!(forward_new(vec![event], &seen, &tx).await.unwrap(), 0);
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }
}
