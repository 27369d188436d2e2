//! Telegram Bot API publisher with a human approval queue
//!
//! # Key Features
//! - Auto-approved breakdowns go straight to the channel via `sendMessage`
//! - Breakdowns that need review are posted to the admin chat and held in a
//!   pending map keyed by job id until `/approve <job_id>` or `/reject <job_id>`
//! - Admin commands are read with `getUpdates` long polling
//! - All calls share one `governor` quota (Telegram limits bots per chat)
//!
//! Error strings are passed through `sanitize_for_logging` since request URLs
//! carry the bot token.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::formatter::{format_approval_request, format_breakdown, format_stats};
use super::Publisher;
use crate::config::DeliveryConfig;
use crate::http_client::RateLimitedClient;
use crate::storage::AnalysisRepository;
use crate::types::{AnalysisJob, AnalysisStatus, TokenBreakdown};
use crate::validation::sanitize_for_logging;

/// Long-poll timeout for getUpdates (seconds)
const UPDATE_POLL_TIMEOUT: u64 = 25;

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    chat: Chat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Serialize)]
struct GetUpdates {
    offset: i64,
    timeout: u64,
    allowed_updates: Vec<&'static str>,
}

/// A breakdown waiting for an admin decision
#[derive(Debug, Clone)]
pub struct PendingApproval {
    pub job_id: String,
    pub breakdown: TokenBreakdown,
    pub submitted_at: DateTime<Utc>,
    pub admin_message_id: Option<i64>,
}

/// Commands accepted from the admin chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Approve(String),
    Reject { job_id: String, reason: String },
    Pending,
    Stats,
}

impl AdminCommand {
    /// Parse `/approve <id>`, `/reject <id> [reason]`, `/pending`, `/stats`.
    /// A `@botname` suffix on the command is ignored.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split_whitespace();
        let command = parts.next()?.split('@').next()?;
        match command {
            "/approve" => parts.next().map(|id| Self::Approve(id.to_string())),
            "/reject" => {
                let job_id = parts.next()?.to_string();
                let reason = parts.collect::<Vec<_>>().join(" ");
                Some(Self::Reject {
                    job_id,
                    reason: if reason.is_empty() {
                        "Rejected by admin".to_string()
                    } else {
                        reason
                    },
                })
            }
            "/pending" => Some(Self::Pending),
            "/stats" => Some(Self::Stats),
            _ => None,
        }
    }
}

pub struct TelegramPublisher {
    client: RateLimitedClient,
    /// `{api_url}/bot{token}`
    api_base: String,
    channel_id: String,
    admin_chat_id: Option<String>,
    pending: RwLock<HashMap<String, PendingApproval>>,
    repository: Option<Arc<dyn AnalysisRepository>>,
    update_offset: AtomicI64,
}

impl TelegramPublisher {
    pub fn new(config: &DeliveryConfig) -> Result<Self> {
        let token = config
            .telegram_bot_token
            .as_deref()
            .ok_or_else(|| anyhow!("TELEGRAM_BOT_TOKEN is not configured"))?;
        let channel_id = config
            .telegram_channel_id
            .clone()
            .ok_or_else(|| anyhow!("TELEGRAM_CHANNEL_ID is not configured"))?;

        Ok(Self {
            client: RateLimitedClient::new(
                "telegram",
                UPDATE_POLL_TIMEOUT + 10,
                config.rate_limit_per_minute,
            )?,
            api_base: format!(
                "{}/bot{}",
                config.telegram_api_url.trim_end_matches('/'),
                token
            ),
            channel_id,
            admin_chat_id: config.telegram_admin_chat_id.clone(),
            pending: RwLock::new(HashMap::new()),
            repository: None,
            update_offset: AtomicI64::new(0),
        })
    }

    /// Persist approve/reject outcomes on the stored job
    pub fn with_repository(mut self, repository: Arc<dyn AnalysisRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    async fn call<B: Serialize + Sync, T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}/{}", self.api_base, method);
        let response: TelegramResponse<T> = self
            .client
            .post_json(&url, body, &[])
            .await
            .map_err(|e| anyhow!(sanitize_for_logging(&format!("{:#}", e))))?;

        if !response.ok {
            return Err(anyhow!(
                "Telegram {} failed: {}",
                method,
                response.description.unwrap_or_default()
            ));
        }
        response
            .result
            .ok_or_else(|| anyhow!("Telegram {} returned no result", method))
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<i64> {
        let sent: SentMessage = self
            .call(
                "sendMessage",
                &SendMessage {
                    chat_id,
                    text,
                    parse_mode: "MarkdownV2",
                    disable_web_page_preview: false,
                },
            )
            .await?;
        Ok(sent.message_id)
    }

    pub async fn pending_approvals(&self) -> Vec<PendingApproval> {
        let mut pending: Vec<_> = self.pending.read().await.values().cloned().collect();
        pending.sort_by_key(|p| p.submitted_at);
        pending
    }

    /// Hold a breakdown for review and notify the admin chat
    pub async fn submit_for_approval(
        &self,
        breakdown: &TokenBreakdown,
        job_id: &str,
    ) -> Result<()> {
        let admin_message_id = match &self.admin_chat_id {
            Some(admin) => Some(
                self.send(admin, &format_approval_request(breakdown, job_id))
                    .await
                    .context("Failed to send approval request")?,
            ),
            None => {
                warn!(job_id, "No admin chat configured, approval request kept locally");
                None
            }
        };

        self.pending.write().await.insert(
            job_id.to_string(),
            PendingApproval {
                job_id: job_id.to_string(),
                breakdown: breakdown.clone(),
                submitted_at: Utc::now(),
                admin_message_id,
            },
        );
        info!(job_id, symbol = %breakdown.symbol, "Breakdown awaiting approval");
        Ok(())
    }

    /// Publish a pending breakdown. `None` when the job is not pending.
    pub async fn approve(&self, job_id: &str) -> Result<Option<i64>> {
        let Some(pending) = self.pending.write().await.remove(job_id) else {
            warn!(job_id, "Approval not found");
            return Ok(None);
        };

        let message_id = match self
            .send(&self.channel_id, &format_breakdown(&pending.breakdown))
            .await
        {
            Ok(id) => id,
            Err(e) => {
                // Keep it pending so the admin can retry
                self.pending
                    .write()
                    .await
                    .insert(job_id.to_string(), pending);
                return Err(e);
            }
        };

        info!(job_id, message_id, "Approved breakdown published");
        if let Err(e) = self.record_published(job_id, message_id).await {
            error!(job_id, message_id, error = %e, "Breakdown is live but the job record was not updated");
        }
        Ok(Some(message_id))
    }

    /// Mark the stored job as PUBLISHED once its breakdown has been sent
    async fn record_published(&self, job_id: &str, message_id: i64) -> Result<()> {
        let Some(repository) = &self.repository else {
            return Ok(());
        };
        let Some(mut job) = repository.get_analysis(job_id).await? else {
            warn!(job_id, "Approved job has no stored record");
            return Ok(());
        };
        job.mark_published(message_id)?;
        repository.save_analysis(&job).await
    }

    /// Discard a pending breakdown. Returns false when the job is not pending.
    ///
    /// The stored job cannot move back to REJECTED from review, so it is
    /// closed as FAILED with the reviewer's reason.
    pub async fn reject(&self, job_id: &str, reason: &str) -> Result<bool> {
        if self.pending.write().await.remove(job_id).is_none() {
            warn!(job_id, "Approval not found");
            return Ok(false);
        }

        if let Some(repository) = &self.repository {
            if let Some(mut job) = repository.get_analysis(job_id).await? {
                if job.status == AnalysisStatus::AwaitingApproval {
                    job.fail(format!("Rejected by reviewer: {}", reason));
                    repository.save_analysis(&job).await?;
                }
            }
        }

        info!(job_id, reason, "Breakdown rejected");
        Ok(true)
    }

    async fn reply(&self, chat_id: &str, text: &str) {
        if let Err(e) = self.send(chat_id, text).await {
            warn!(error = %e, "Failed to reply to admin command");
        }
    }

    async fn handle_command(&self, chat_id: &str, command: AdminCommand) -> Result<()> {
        match command {
            AdminCommand::Approve(job_id) => {
                let text = match self.approve(&job_id).await? {
                    Some(id) => format!("Published {} as message {}", job_id, id),
                    None => format!("No pending approval for {}", job_id),
                };
                self.reply(chat_id, &super::formatter::escape_markdown(&text))
                    .await;
            }
            AdminCommand::Reject { job_id, reason } => {
                let text = if self.reject(&job_id, &reason).await? {
                    format!("Rejected {}", job_id)
                } else {
                    format!("No pending approval for {}", job_id)
                };
                self.reply(chat_id, &super::formatter::escape_markdown(&text))
                    .await;
            }
            AdminCommand::Pending => {
                let pending = self.pending_approvals().await;
                let text = if pending.is_empty() {
                    "No pending approvals".to_string()
                } else {
                    pending
                        .iter()
                        .map(|p| format!("{} ${} ({})", p.job_id, p.breakdown.symbol, p.breakdown.risk_rating))
                        .collect::<Vec<_>>()
                        .join("\n")
                };
                self.reply(chat_id, &super::formatter::escape_markdown(&text))
                    .await;
            }
            AdminCommand::Stats => {
                let Some(repository) = &self.repository else {
                    return Ok(());
                };
                let stats = repository.get_stats(24).await?;
                self.reply(chat_id, &format_stats(&stats)).await;
            }
        }
        Ok(())
    }

    async fn poll_updates(&self, admin_chat: &str) -> Result<()> {
        let updates: Vec<Update> = self
            .call(
                "getUpdates",
                &GetUpdates {
                    offset: self.update_offset.load(Ordering::SeqCst),
                    timeout: UPDATE_POLL_TIMEOUT,
                    allowed_updates: vec!["message"],
                },
            )
            .await?;

        for update in updates {
            self.update_offset
                .fetch_max(update.update_id + 1, Ordering::SeqCst);

            let Some(message) = update.message else {
                continue;
            };
            let chat_id = message.chat.id.to_string();
            if chat_id != admin_chat {
                debug!(chat_id, "Ignoring message outside admin chat");
                continue;
            }
            let Some(command) = message.text.as_deref().and_then(AdminCommand::parse) else {
                continue;
            };
            if let Err(e) = self.handle_command(&chat_id, command).await {
                error!(error = %e, "Admin command failed");
            }
        }
        Ok(())
    }

    /// Process admin commands until cancelled
    pub async fn run_admin_commands(self: Arc<Self>, cancel: CancellationToken) {
        let Some(admin_chat) = self.admin_chat_id.clone() else {
            info!("No admin chat configured, approval commands disabled");
            return;
        };
        info!("Listening for admin commands");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.poll_updates(&admin_chat) => {
                    if let Err(e) = result {
                        warn!(error = %e, "getUpdates failed");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {}
                        }
                    }
                }
            }
        }
        info!("Admin command listener stopped");
    }
}

#[async_trait]
impl Publisher for TelegramPublisher {
    async fn publish_breakdown(
        &self,
        breakdown: &TokenBreakdown,
        job: &AnalysisJob,
    ) -> Result<Option<i64>> {
        if breakdown.requires_human_review {
            self.submit_for_approval(breakdown, &job.job_id).await?;
            return Ok(None);
        }

        let message_id = self
            .send(&self.channel_id, &format_breakdown(breakdown))
            .await
            .context("Failed to publish breakdown")?;

        info!(
            job_id = %job.job_id,
            message_id,
            "Published breakdown for ${}",
            breakdown.symbol
        );
        Ok(Some(message_id))
    }

    async fn close(&self) -> Result<()> {
        let pending = self.pending.read().await.len();
        if pending > 0 {
            warn!(pending, "Shutting down with breakdowns still awaiting approval");
        }
        Ok(())
    }
}
