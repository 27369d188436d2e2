//! SQLite repository
//!
//! Connection-pooled SQLite storage for analysis jobs and the blacklist.
//! Queryable columns are stored alongside a JSON snapshot of the full job.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use std::time::Duration;
use tracing::{debug, info};

use super::AnalysisRepository;
use crate::types::{AnalysisJob, AnalysisStats, BlacklistEntry};

pub struct SqliteRepository {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteRepository {
    /// Open (or create) the database at `db_path`
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite database file
    /// * `pool_size` - Maximum number of connections in the pool
    pub async fn new(db_path: &str, pool_size: u32) -> Result<Self> {
        info!(
            "Initializing SqliteRepository at: {} with pool size: {}",
            db_path, pool_size
        );

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await
            .context("Failed to connect to SQLite database")?;

        let repo = Self {
            pool,
            db_path: db_path.to_string(),
        };
        repo.initialize_schema().await?;

        Ok(repo)
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS token_analyses (
                job_id TEXT PRIMARY KEY,
                token_address TEXT NOT NULL,
                status TEXT NOT NULL,
                source TEXT NOT NULL,
                symbol TEXT,
                risk_rating TEXT,
                confidence_score REAL,
                processing_time_seconds REAL,
                fdv_usd REAL,
                liquidity_usd REAL,
                error_message TEXT,
                telegram_message_id INTEGER,
                published_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                job_json TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create token_analyses table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blacklist (
                identifier TEXT PRIMARY KEY,
                category TEXT NOT NULL,
                reason TEXT NOT NULL,
                added_by TEXT NOT NULL,
                added_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create blacklist table")?;

        let indexes = vec![
            "CREATE INDEX IF NOT EXISTS idx_analyses_token ON token_analyses(token_address);",
            "CREATE INDEX IF NOT EXISTS idx_analyses_created ON token_analyses(created_at);",
            "CREATE INDEX IF NOT EXISTS idx_analyses_status ON token_analyses(status);",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql)
                .execute(&self.pool)
                .await
                .context(format!("Failed to create index: {}", index_sql))?;
        }

        info!("Analysis schema initialized with indexes");
        Ok(())
    }

    fn row_to_blacklist(row: &sqlx::sqlite::SqliteRow) -> Result<BlacklistEntry> {
        let added_at: i64 = row.try_get("added_at")?;
        Ok(BlacklistEntry {
            address: row.try_get("identifier")?,
            reason: row.try_get("reason")?,
            added_by: row.try_get("added_by")?,
            category: row.try_get("category")?,
            added_at: from_millis(added_at),
        })
    }
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

fn cutoff_millis(hours: u32) -> i64 {
    (Utc::now() - ChronoDuration::hours(i64::from(hours))).timestamp_millis()
}

#[async_trait]
impl AnalysisRepository for SqliteRepository {
    async fn save_analysis(&self, job: &AnalysisJob) -> Result<()> {
        let job_json = serde_json::to_string(job).context("Failed to serialize job")?;
        let breakdown = job.breakdown.as_ref();

        sqlx::query(
            r#"
            INSERT INTO token_analyses (
                job_id, token_address, status, source, symbol, risk_rating,
                confidence_score, processing_time_seconds, fdv_usd, liquidity_usd,
                error_message, telegram_message_id, published_at, created_at, updated_at, job_json
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                status = excluded.status,
                symbol = excluded.symbol,
                risk_rating = excluded.risk_rating,
                confidence_score = excluded.confidence_score,
                processing_time_seconds = excluded.processing_time_seconds,
                fdv_usd = excluded.fdv_usd,
                liquidity_usd = excluded.liquidity_usd,
                error_message = excluded.error_message,
                telegram_message_id = excluded.telegram_message_id,
                published_at = excluded.published_at,
                updated_at = excluded.updated_at,
                job_json = excluded.job_json
            "#,
        )
        .bind(&job.job_id)
        .bind(job.token_address.to_lowercase())
        .bind(job.status.as_str())
        .bind(job.event.source.name())
        .bind(breakdown.map(|b| b.symbol.clone()))
        .bind(breakdown.map(|b| b.risk_rating.as_str()))
        .bind(breakdown.map(|b| b.overall_confidence))
        .bind(breakdown.map(|b| b.processing_time_seconds))
        .bind(job.on_chain_metrics.as_ref().map(|m| m.fdv_usd))
        .bind(job.on_chain_metrics.as_ref().map(|m| m.liquidity_usd))
        .bind(job.error_message.as_deref())
        .bind(job.telegram_message_id)
        .bind(job.published_at.map(|t| t.timestamp_millis()))
        .bind(job.created_at.timestamp_millis())
        .bind(job.updated_at.timestamp_millis())
        .bind(job_json)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save analysis {}", job.job_id))?;

        debug!(job_id = %job.job_id, status = %job.status, "Analysis saved");
        Ok(())
    }

    async fn get_analysis(&self, job_id: &str) -> Result<Option<AnalysisJob>> {
        let row = sqlx::query("SELECT job_json FROM token_analyses WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query analysis")?;

        match row {
            Some(row) => {
                let json: String = row.try_get("job_json")?;
                let job = serde_json::from_str(&json).context("Corrupt job snapshot")?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn is_token_analyzed(&self, token_address: &str, hours: u32) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM token_analyses WHERE token_address = ? AND created_at > ? LIMIT 1",
        )
        .bind(token_address.to_lowercase())
        .bind(cutoff_millis(hours))
        .fetch_optional(&self.pool)
        .await
        .context("Failed to check recent analyses")?;

        Ok(row.is_some())
    }

    async fn is_blacklisted(&self, address: &str) -> Result<Option<BlacklistEntry>> {
        let row = sqlx::query(
            "SELECT identifier, category, reason, added_by, added_at FROM blacklist WHERE identifier = ?",
        )
        .bind(address.to_lowercase())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to check blacklist")?;

        row.as_ref().map(Self::row_to_blacklist).transpose()
    }

    async fn add_to_blacklist(&self, entry: BlacklistEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO blacklist (identifier, category, reason, added_by, added_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(identifier) DO UPDATE SET
                reason = excluded.reason,
                added_by = excluded.added_by,
                added_at = excluded.added_at
            "#,
        )
        .bind(entry.address.to_lowercase())
        .bind(&entry.category)
        .bind(&entry.reason)
        .bind(&entry.added_by)
        .bind(entry.added_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to add blacklist entry")?;

        info!(address = %entry.address, reason = %entry.reason, "Address blacklisted");
        Ok(())
    }

    async fn get_stats(&self, window_hours: u32) -> Result<AnalysisStats> {
        let cutoff = cutoff_millis(window_hours);
        let mut stats = AnalysisStats {
            window_hours,
            ..Default::default()
        };

        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM token_analyses WHERE created_at >= ? GROUP BY status",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .context("Failed to aggregate by status")?;
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            stats.total += n as u64;
            stats.by_status.insert(status, n as u64);
        }

        let rows = sqlx::query(
            "SELECT risk_rating, COUNT(*) AS n FROM token_analyses \
             WHERE created_at >= ? AND risk_rating IS NOT NULL GROUP BY risk_rating",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .context("Failed to aggregate by rating")?;
        for row in rows {
            let rating: String = row.try_get("risk_rating")?;
            let n: i64 = row.try_get("n")?;
            stats.by_rating.insert(rating, n as u64);
        }

        let row = sqlx::query(
            "SELECT AVG(processing_time_seconds) AS avg_time, AVG(confidence_score) AS avg_conf \
             FROM token_analyses WHERE created_at >= ?",
        )
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await
        .context("Failed to compute averages")?;
        stats.avg_processing_time_secs = row.try_get("avg_time")?;
        stats.avg_confidence = row.try_get("avg_conf")?;

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AnalysisStatus, EventSource, TokenEvent};

    async fn test_repo() -> (tempfile::TempDir, SqliteRepository) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analyses.db");
        let repo = SqliteRepository::new(path.to_str().unwrap(), 4).await.unwrap();
        (dir, repo)
    }

    #[tokio::test]
    async fn test_upsert_by_job_id() {
        let (_dir, repo) = test_repo().await;
        let mut job = AnalysisJob::new(TokenEvent::new("0xAbC", EventSource::Feed, 8453));

        repo.save_analysis(&job).await.unwrap();
        job.advance(AnalysisStatus::Enriching).unwrap();
        job.fail("provider down");
        repo.save_analysis(&job).await.unwrap();

        let loaded = repo.get_analysis(&job.job_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, AnalysisStatus::Failed);
        assert_eq!(loaded.error_message.as_deref(), Some("provider down"));

        let stats = repo.get_stats(24).await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.by_status.get("failed"), Some(&1));
        assert!(stats.avg_confidence.is_none());
    }

    #[tokio::test]
    async fn test_recency_window() {
        let (_dir, repo) = test_repo().await;
        let job = AnalysisJob::new(TokenEvent::new("0xAbC", EventSource::Manual, 8453));
        repo.save_analysis(&job).await.unwrap();

        assert!(repo.is_token_analyzed("0xABC", 24).await.unwrap());
        assert!(!repo.is_token_analyzed("0xother", 24).await.unwrap());
        assert!(!repo.is_token_analyzed("0xabc", 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_blacklist_round_trip() {
        let (_dir, repo) = test_repo().await;
        assert!(repo.is_blacklisted("0xbad").await.unwrap().is_none());

        repo.add_to_blacklist(BlacklistEntry {
            address: "0xBAD".to_string(),
            reason: "known rug".to_string(),
            added_at: Utc::now(),
            added_by: "admin".to_string(),
            category: "contract".to_string(),
        })
        .await
        .unwrap();

        let entry = repo.is_blacklisted("0xBad").await.unwrap().unwrap();
        assert_eq!(entry.reason, "known rug");
        assert_eq!(entry.address, "0xbad");
    }
}
