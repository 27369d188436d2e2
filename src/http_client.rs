//! Rate-limited JSON HTTP client shared by provider integrations.
//!
//! Every outbound request waits on a `governor` quota, runs under the
//! provider's retry policy and fails on non-2xx responses.

use anyhow::{anyhow, Context, Result};
use governor::{
    clock::DefaultClock,
    state::{direct::NotKeyed, InMemoryState},
    Quota, RateLimiter,
};
use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::utils::retry::{call_with_policy, RetryPolicy};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Clone)]
pub struct RateLimitedClient {
    name: &'static str,
    http: Client,
    limiter: Arc<DirectLimiter>,
    retry: RetryPolicy,
}

impl RateLimitedClient {
    /// # Arguments
    /// * `name` - Provider name used in errors and logs
    /// * `timeout_secs` - Per-request timeout
    /// * `requests_per_minute` - Quota shared by all requests on this client
    pub fn new(name: &'static str, timeout_secs: u64, requests_per_minute: u32) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("token-analyst/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        let rate = NonZeroU32::new(requests_per_minute)
            .ok_or_else(|| anyhow!("{} rate limit must be non-zero", name))?;

        Ok(Self {
            name,
            http,
            limiter: Arc::new(RateLimiter::direct(Quota::per_minute(rate))),
            retry: RetryPolicy::with_timeout_secs(timeout_secs),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// GET `url` and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<T> {
        call_with_policy(&self.retry, || async move {
            let request = self.http.get(url).query(query);
            self.send(request, headers).await
        })
        .await
    }

    /// POST a JSON body to `url` and decode the JSON response
    pub async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
        headers: &[(&str, String)],
    ) -> Result<T> {
        call_with_policy(&self.retry, || async move {
            let request = self.http.post(url).json(body);
            self.send(request, headers).await
        })
        .await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        mut request: RequestBuilder,
        headers: &[(&str, String)],
    ) -> Result<T> {
        self.limiter.until_ready().await;

        for (key, value) in headers {
            request = request.header(*key, value);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", self.name))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "{} API error: {} {}",
                self.name,
                status,
                body.chars().take(200).collect::<String>()
            ));
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to decode {} response", self.name))
    }
}
