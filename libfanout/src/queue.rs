//! Durable job queue for scheduled publishes
//!
//! The preferred execution path. Jobs live in the queue's own SQLite
//! database, deliberately separate from the content store: if this store is
//! unreachable at startup the daemon degrades to poll-only, and a queue
//! outage mid-flight only delays jobs, never loses lifecycle state.
//!
//! A job carries the minimal `(post_id, platform, scheduled_at)` key — the
//! live post is re-fetched at execution time, never snapshotted. Dequeue is
//! the same conditional-update idiom the lifecycle tracker uses for claims,
//! so any number of workers can share one queue.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{DbError, Result};
use crate::types::PlatformId;

#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Attempts per job before it is marked failed
    pub max_attempts: u32,
    /// Base delay of the exponential backoff ladder
    pub backoff_base: Duration,
    /// How long finished job rows are kept before the sweep deletes them
    pub retention: Duration,
    /// Worker pool size
    pub concurrency: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(30),
            retention: Duration::from_secs(24 * 3600),
            concurrency: 2,
        }
    }
}

impl From<&QueueConfig> for QueueSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff_base: Duration::from_secs(config.backoff_base_secs),
            retention: Duration::from_secs(config.retention_secs),
            concurrency: config.concurrency,
        }
    }
}

/// Minimal data a job carries; everything else is re-fetched live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    pub post_id: String,
    pub platform: PlatformId,
    pub scheduled_at: i64,
}

impl JobPayload {
    /// Unique identity of a job; re-enqueueing the same key is idempotent
    pub fn job_key(&self) -> String {
        format!("{}:{}:{}", self.post_id, self.platform, self.scheduled_at)
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub payload: JobPayload,
    pub attempts_made: u32,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

#[derive(Clone)]
pub struct JobQueue {
    pool: SqlitePool,
    settings: QueueSettings,
}

impl JobQueue {
    /// Open (creating if needed) the queue store.
    ///
    /// An error here is the signal to degrade to poll-only; callers log and
    /// continue rather than propagate.
    pub async fn connect(path: &str, settings: QueueSettings) -> Result<Self> {
        let (options, max_connections) = if path == ":memory:" {
            (
                SqliteConnectOptions::from_str("sqlite::memory:").map_err(DbError::Sqlx)?,
                1,
            )
        } else {
            let expanded = shellexpand::tilde(path).to_string();
            let file = Path::new(&expanded);
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent).map_err(DbError::Io)?;
            }
            (
                SqliteConnectOptions::new()
                    .filename(&expanded)
                    .create_if_missing(true),
                5,
            )
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(DbError::Sqlx)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                job_key TEXT NOT NULL UNIQUE,
                payload TEXT NOT NULL,
                run_at INTEGER NOT NULL,
                attempts_made INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                last_error TEXT,
                created_at INTEGER NOT NULL,
                finished_at INTEGER
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(DbError::Sqlx)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_ready ON jobs(status, run_at)")
            .execute(&pool)
            .await
            .map_err(DbError::Sqlx)?;

        Ok(Self { pool, settings })
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Enqueue a delayed job; returns its job ref.
    ///
    /// Idempotent on the job key: enqueueing an already-known
    /// `(post, platform, time)` hands back the existing ref.
    pub async fn enqueue(&self, payload: &JobPayload, delay_until: i64) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let encoded = serde_json::to_string(payload)
            .map_err(|e| DbError::Corrupt(format!("unencodable job payload: {}", e)))?;
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, job_key, payload, run_at, max_attempts, status, created_at)
            VALUES (?, ?, ?, ?, ?, 'queued', ?)
            ON CONFLICT(job_key) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(payload.job_key())
        .bind(encoded)
        .bind(delay_until)
        .bind(self.settings.max_attempts)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;

        if result.rows_affected() == 0 {
            let existing: String = sqlx::query("SELECT id FROM jobs WHERE job_key = ?")
                .bind(payload.job_key())
                .fetch_one(&self.pool)
                .await
                .map_err(DbError::Sqlx)?
                .get("id");
            return Ok(existing);
        }
        Ok(id)
    }

    /// Best-effort cancellation; a job that already ran (or never existed)
    /// reads as `false`, not an error.
    pub async fn cancel(&self, job_ref: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE jobs SET status = 'cancelled', finished_at = ? \
             WHERE id = ? AND status = 'queued'",
        )
        .bind(now)
        .bind(job_ref)
        .execute(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;

        Ok(result.rows_affected() == 1)
    }

    /// Pull one ready job, atomically moving it queued -> active.
    ///
    /// Lost races against sibling workers retry a couple of times before
    /// reporting an empty queue; the worker loop comes back anyway.
    pub async fn dequeue(&self, now: i64) -> Result<Option<Job>> {
        for _ in 0..3 {
            let row = sqlx::query(
                "SELECT id, payload, attempts_made, max_attempts FROM jobs \
                 WHERE status = 'queued' AND run_at <= ? \
                 ORDER BY run_at LIMIT 1",
            )
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;

            let Some(row) = row else {
                return Ok(None);
            };
            let id: String = row.get("id");

            let claimed = sqlx::query("UPDATE jobs SET status = 'active' WHERE id = ? AND status = 'queued'")
                .bind(&id)
                .execute(&self.pool)
                .await
                .map_err(DbError::Sqlx)?;
            if claimed.rows_affected() == 0 {
                continue;
            }

            let payload: JobPayload = serde_json::from_str(&row.get::<String, _>("payload"))
                .map_err(|e| DbError::Corrupt(format!("bad job payload: {}", e)))?;
            return Ok(Some(Job {
                id,
                payload,
                attempts_made: row.get::<i64, _>("attempts_made") as u32,
                max_attempts: row.get::<i64, _>("max_attempts") as u32,
            }));
        }
        Ok(None)
    }

    pub async fn complete(&self, job_id: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE jobs SET status = 'completed', finished_at = ? WHERE id = ?")
            .bind(now)
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;
        Ok(())
    }

    /// Record a failed attempt. Retryable errors requeue with exponential
    /// backoff until the attempt budget runs out; permanent ones burn the
    /// job immediately.
    pub async fn fail(&self, job: &Job, error: &str, retryable: bool, now: i64) -> Result<()> {
        let attempts = job.attempts_made + 1;

        if retryable && attempts < job.max_attempts {
            let delay = backoff_delay(self.settings.backoff_base, attempts);
            sqlx::query(
                "UPDATE jobs SET status = 'queued', attempts_made = ?, run_at = ?, last_error = ? \
                 WHERE id = ?",
            )
            .bind(attempts)
            .bind(now + delay.as_secs() as i64)
            .bind(error)
            .bind(&job.id)
            .execute(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;
        } else {
            sqlx::query(
                "UPDATE jobs SET status = 'failed', attempts_made = ?, last_error = ?, \
                 finished_at = ? WHERE id = ?",
            )
            .bind(attempts)
            .bind(error)
            .bind(now)
            .bind(&job.id)
            .execute(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;
        }
        Ok(())
    }

    /// Put an active job back in the queue without consuming an attempt
    /// (rate-limit deferrals, transient store trouble).
    pub async fn defer(&self, job_id: &str, run_at: i64) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = 'queued', run_at = ? WHERE id = ? AND status = 'active'")
            .bind(run_at)
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;
        Ok(())
    }

    /// Delete finished job rows older than the retention window
    pub async fn sweep_finished(&self, now: i64) -> Result<u64> {
        let cutoff = now - self.settings.retention.as_secs() as i64;
        let result = sqlx::query(
            "DELETE FROM jobs \
             WHERE status IN ('completed', 'failed', 'cancelled') \
               AND finished_at IS NOT NULL AND finished_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;
        Ok(result.rows_affected())
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;

        let mut stats = QueueStats::default();
        for row in rows {
            let n: i64 = row.get("n");
            match row.get::<String, _>("status").as_str() {
                "queued" => stats.queued = n,
                "active" => stats.active = n,
                "completed" => stats.completed = n,
                "failed" => stats.failed = n,
                "cancelled" => stats.cancelled = n,
                _ => {}
            }
        }
        Ok(stats)
    }
}

/// Exponential backoff with jitter: base * 2^(attempt-1), plus up to a
/// quarter of that again so retry bursts spread out.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base
        .as_secs()
        .saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
    let jitter = rand::thread_rng().gen_range(0..=exp / 4 + 1);
    Duration::from_secs(exp + jitter)
}
