//! Database operations for Fanout
//!
//! The lifecycle tracker: posts, their schedule entries, and the append-only
//! attempt audit trail live here, together with the two atomic contracts the
//! rest of the pipeline is built on:
//!
//! - `claim` — a single conditional UPDATE that moves an entry into
//!   `processing` only while it is still claimable. Both execution paths go
//!   through it, which is what lets them race over the same entry without
//!   double-publishing.
//! - `settle` — one transaction that appends the attempt record, advances the
//!   entry, and rewrites the post's publish summary.

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::error::{DbError, Result};
use crate::types::{
    AttemptOutcome, AttemptRecord, AttemptStatus, EntryStatus, PlatformId, Post, PublishSummary,
    ScheduleEntry,
};

/// Statuses an execution path may claim, as used in conditional updates
const CLAIMABLE_SQL: &str = "('pending', 'queued', 'failed')";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the content store and run migrations.
    ///
    /// `":memory:"` opens an in-memory database, used throughout the tests.
    pub async fn new(db_path: &str) -> Result<Self> {
        let (options, max_connections) = if db_path == ":memory:" {
            // A pooled in-memory database must stay on one connection or
            // every checkout would see a fresh empty schema.
            (
                SqliteConnectOptions::from_str("sqlite::memory:")
                    .map_err(DbError::Sqlx)?
                    .foreign_keys(true),
                1,
            )
        } else {
            let expanded = shellexpand::tilde(db_path).to_string();
            let path = Path::new(&expanded);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(DbError::Io)?;
            }
            (
                SqliteConnectOptions::new()
                    .filename(&expanded)
                    .create_if_missing(true)
                    .foreign_keys(true),
                5,
            )
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(DbError::Sqlx)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::Migration)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Posts
    // ------------------------------------------------------------------

    pub async fn create_post(&self, post: &Post) -> Result<()> {
        let content = post.content.to_string();
        let summary = serde_json::to_string(&post.publish_summary)
            .map_err(|e| DbError::Corrupt(format!("unencodable publish summary: {}", e)))?;
        let metrics = serde_json::to_string(&post.metrics_refs)
            .map_err(|e| DbError::Corrupt(format!("unencodable metrics refs: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO posts (id, owner_id, content, created_at, publish_summary, metrics_refs)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.owner_id)
        .bind(content)
        .bind(post.created_at)
        .bind(summary)
        .bind(metrics)
        .execute(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;

        Ok(())
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Option<Post>> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, content, created_at, publish_summary, metrics_refs
            FROM posts WHERE id = ?
            "#,
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;

        row.map(|r| post_from_row(&r)).transpose()
    }

    pub async fn update_post_content(
        &self,
        post_id: &str,
        content: &serde_json::Value,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE posts SET content = ? WHERE id = ?")
            .bind(content.to_string())
            .bind(post_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;

        Ok(result.rows_affected() == 1)
    }

    /// Delete a post and (via cascade) its entries and attempts.
    ///
    /// Returns the job refs of entries that still had a queued job, so the
    /// caller can best-effort cancel them. `None` means no such post for
    /// this owner.
    pub async fn delete_post(&self, post_id: &str, owner_id: &str) -> Result<Option<Vec<String>>> {
        let refs: Vec<String> = sqlx::query(
            r#"
            SELECT job_ref FROM schedule_entries
            WHERE post_id = ? AND status IN ('pending', 'queued') AND job_ref IS NOT NULL
            "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Sqlx)?
        .iter()
        .map(|r| r.get("job_ref"))
        .collect();

        let result = sqlx::query("DELETE FROM posts WHERE id = ? AND owner_id = ?")
            .bind(post_id)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(refs))
    }

    // ------------------------------------------------------------------
    // Schedule entries
    // ------------------------------------------------------------------

    pub async fn add_schedule_entry(
        &self,
        post_id: &str,
        platform: PlatformId,
        scheduled_at: i64,
    ) -> Result<ScheduleEntry> {
        let created_at = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO schedule_entries (post_id, platform, scheduled_at, status, created_at)
            VALUES (?, ?, ?, 'pending', ?)
            "#,
        )
        .bind(post_id)
        .bind(platform.as_str())
        .bind(scheduled_at)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;

        Ok(ScheduleEntry {
            id: result.last_insert_rowid(),
            post_id: post_id.to_string(),
            platform,
            scheduled_at,
            status: EntryStatus::Pending,
            last_attempt_at: None,
            posted_at: None,
            error: None,
            job_ref: None,
            created_at,
        })
    }

    /// Record that a job was enqueued for a fresh entry
    pub async fn set_entry_queued(&self, entry_id: i64, job_ref: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE schedule_entries SET status = 'queued', job_ref = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(job_ref)
        .bind(entry_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn entry(&self, entry_id: i64) -> Result<Option<ScheduleEntry>> {
        let row = sqlx::query("SELECT * FROM schedule_entries WHERE id = ?")
            .bind(entry_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;

        row.map(|r| entry_from_row(&r)).transpose()
    }

    /// Entries for a post, in insertion (display) order
    pub async fn entries_for_post(&self, post_id: &str) -> Result<Vec<ScheduleEntry>> {
        let rows = sqlx::query("SELECT * FROM schedule_entries WHERE post_id = ? ORDER BY id")
            .bind(post_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;

        rows.iter().map(entry_from_row).collect()
    }

    pub async fn attempts(&self, entry_id: i64) -> Result<Vec<AttemptRecord>> {
        let rows = sqlx::query("SELECT * FROM publish_attempts WHERE entry_id = ? ORDER BY id")
            .bind(entry_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;

        rows.iter().map(attempt_from_row).collect()
    }

    /// Claimable entries that are due, oldest first, bounded per tick
    pub async fn due_entries(&self, now: i64, limit: u32) -> Result<Vec<ScheduleEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM schedule_entries \
             WHERE status IN {} AND scheduled_at <= ? \
             ORDER BY scheduled_at LIMIT ?",
            CLAIMABLE_SQL
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;

        rows.iter().map(entry_from_row).collect()
    }

    /// Not-yet-settled entries, soonest first, for queue listings
    pub async fn scheduled_entries(
        &self,
        platform: Option<PlatformId>,
        limit: u32,
    ) -> Result<Vec<ScheduleEntry>> {
        let platform = platform.map(|p| p.as_str().to_string());
        let rows = sqlx::query(&format!(
            "SELECT * FROM schedule_entries \
             WHERE status IN {} AND (? IS NULL OR platform = ?) \
             ORDER BY scheduled_at LIMIT ?",
            CLAIMABLE_SQL
        ))
        .bind(&platform)
        .bind(&platform)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;

        rows.iter().map(entry_from_row).collect()
    }

    /// Entries scheduled inside a window, for calendar views
    pub async fn upcoming_entries(
        &self,
        owner_id: Option<&str>,
        from: i64,
        to: i64,
    ) -> Result<Vec<ScheduleEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT e.* FROM schedule_entries e
            JOIN posts p ON p.id = e.post_id
            WHERE (? IS NULL OR p.owner_id = ?)
              AND e.scheduled_at >= ? AND e.scheduled_at <= ?
            ORDER BY e.scheduled_at
            "#,
        )
        .bind(owner_id)
        .bind(owner_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;

        rows.iter().map(entry_from_row).collect()
    }

    /// Entry counts per status
    pub async fn entry_stats(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM schedule_entries GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;

        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("status"), r.get::<i64, _>("n")))
            .collect())
    }

    // ------------------------------------------------------------------
    // Claim / settle / cancel
    // ------------------------------------------------------------------

    /// Claim an entry located by `(post_id, platform, scheduled_at)`.
    ///
    /// If no claimable entry carries the exact timestamp, the nearest
    /// claimable entry for that platform within `tolerance_secs` is used
    /// instead — a deliberate lenience for clock and serialization drift
    /// between the path that read the schedule and the value persisted here.
    /// The conditional UPDATE in `claim_entry` stays the only admission
    /// control, so the fallback can mis-target a neighbouring entry but can
    /// never double-execute one.
    ///
    /// Returns the claimed entry, or `None` when another path got there
    /// first (or nothing matched).
    pub async fn claim(
        &self,
        post_id: &str,
        platform: PlatformId,
        scheduled_at: i64,
        tolerance_secs: i64,
    ) -> Result<Option<ScheduleEntry>> {
        let exact: Option<i64> = sqlx::query(&format!(
            "SELECT id FROM schedule_entries \
             WHERE post_id = ? AND platform = ? AND scheduled_at = ? AND status IN {} \
             LIMIT 1",
            CLAIMABLE_SQL
        ))
        .bind(post_id)
        .bind(platform.as_str())
        .bind(scheduled_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Sqlx)?
        .map(|r| r.get("id"));

        let candidate = match exact {
            Some(id) => Some(id),
            None if tolerance_secs > 0 => sqlx::query(&format!(
                "SELECT id FROM schedule_entries \
                 WHERE post_id = ? AND platform = ? AND status IN {} \
                   AND ABS(scheduled_at - ?) <= ? \
                 ORDER BY ABS(scheduled_at - ?) LIMIT 1",
                CLAIMABLE_SQL
            ))
            .bind(post_id)
            .bind(platform.as_str())
            .bind(scheduled_at)
            .bind(tolerance_secs)
            .bind(scheduled_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::Sqlx)?
            .map(|r| r.get("id")),
            None => None,
        };

        let Some(id) = candidate else {
            return Ok(None);
        };

        if !self.claim_entry(id).await? {
            return Ok(None);
        }
        self.entry(id).await
    }

    /// Atomically transition an entry to `processing`.
    ///
    /// The sole admission-control point: the update only applies while the
    /// current status is still claimable, so of any number of concurrent
    /// callers exactly one observes `true`.
    pub async fn claim_entry(&self, entry_id: i64) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(&format!(
            "UPDATE schedule_entries SET status = 'processing', last_attempt_at = ? \
             WHERE id = ? AND status IN {}",
            CLAIMABLE_SQL
        ))
        .bind(now)
        .bind(entry_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;

        Ok(result.rows_affected() == 1)
    }

    /// Record an attempt outcome: append the audit record, advance the
    /// entry, and rewrite the post's publish summary — one transaction.
    pub async fn settle(&self, entry_id: i64, outcome: &AttemptOutcome) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(DbError::Sqlx)?;

        let row = sqlx::query("SELECT post_id, platform FROM schedule_entries WHERE id = ?")
            .bind(entry_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(DbError::Sqlx)?;
        let Some(row) = row else {
            return Err(DbError::Corrupt(format!("settle on unknown entry {}", entry_id)).into());
        };
        let post_id: String = row.get("post_id");
        let platform: PlatformId = row
            .get::<String, _>("platform")
            .parse()
            .map_err(DbError::Corrupt)?;

        match outcome {
            AttemptOutcome::Posted { external_id } => {
                sqlx::query(
                    r#"
                    INSERT INTO publish_attempts (entry_id, status, attempted_at, external_id)
                    VALUES (?, 'posted', ?, ?)
                    "#,
                )
                .bind(entry_id)
                .bind(now)
                .bind(external_id)
                .execute(&mut *tx)
                .await
                .map_err(DbError::Sqlx)?;

                sqlx::query(
                    "UPDATE schedule_entries SET status = 'posted', posted_at = ?, error = NULL \
                     WHERE id = ?",
                )
                .bind(now)
                .bind(entry_id)
                .execute(&mut *tx)
                .await
                .map_err(DbError::Sqlx)?;
            }
            AttemptOutcome::Failed { message, details } => {
                sqlx::query(
                    r#"
                    INSERT INTO publish_attempts (entry_id, status, attempted_at, message, details)
                    VALUES (?, 'failed', ?, ?, ?)
                    "#,
                )
                .bind(entry_id)
                .bind(now)
                .bind(message)
                .bind(details)
                .execute(&mut *tx)
                .await
                .map_err(DbError::Sqlx)?;

                sqlx::query("UPDATE schedule_entries SET status = 'failed', error = ? WHERE id = ?")
                    .bind(message)
                    .bind(entry_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(DbError::Sqlx)?;
            }
        }

        update_summary_in_tx(&mut tx, &post_id, platform, outcome, now).await?;

        tx.commit().await.map_err(DbError::Sqlx)?;
        Ok(())
    }

    /// Summary-only settle for the immediate (non-scheduled) publish path,
    /// which has no entry to claim or advance.
    pub async fn record_immediate(
        &self,
        post_id: &str,
        platform: PlatformId,
        outcome: &AttemptOutcome,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(DbError::Sqlx)?;
        update_summary_in_tx(&mut tx, post_id, platform, outcome, now).await?;
        tx.commit().await.map_err(DbError::Sqlx)?;
        Ok(())
    }

    /// Cancel a not-yet-executed entry. Returns the entry's job ref (for
    /// best-effort queue removal) on success, `None` when the entry was no
    /// longer cancellable.
    pub async fn cancel_entry(&self, entry_id: i64) -> Result<Option<Option<String>>> {
        let job_ref: Option<Option<String>> =
            sqlx::query("SELECT job_ref FROM schedule_entries WHERE id = ?")
                .bind(entry_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DbError::Sqlx)?
                .map(|r| r.get("job_ref"));

        let Some(job_ref) = job_ref else {
            return Ok(None);
        };

        let result = sqlx::query(
            "UPDATE schedule_entries SET status = 'cancelled' \
             WHERE id = ? AND status IN ('pending', 'queued')",
        )
        .bind(entry_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(job_ref))
    }

    /// Best-effort analytics correlation write; callers tolerate failure
    pub async fn record_metrics_ref(
        &self,
        post_id: &str,
        platform: PlatformId,
        external_id: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(DbError::Sqlx)?;

        let row = sqlx::query("SELECT metrics_refs FROM posts WHERE id = ?")
            .bind(post_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(DbError::Sqlx)?;
        let Some(row) = row else {
            return Err(DbError::Corrupt(format!("metrics ref for unknown post {}", post_id)).into());
        };

        let mut refs: std::collections::BTreeMap<String, String> =
            serde_json::from_str(&row.get::<String, _>("metrics_refs"))
                .map_err(|e| DbError::Corrupt(format!("bad metrics refs on {}: {}", post_id, e)))?;
        refs.insert(platform.as_str().to_string(), external_id.to_string());

        sqlx::query("UPDATE posts SET metrics_refs = ? WHERE id = ?")
            .bind(serde_json::to_string(&refs).map_err(|e| DbError::Corrupt(e.to_string()))?)
            .bind(post_id)
            .execute(&mut *tx)
            .await
            .map_err(DbError::Sqlx)?;

        tx.commit().await.map_err(DbError::Sqlx)?;
        Ok(())
    }
}

async fn update_summary_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    post_id: &str,
    platform: PlatformId,
    outcome: &AttemptOutcome,
    now: i64,
) -> Result<()> {
    let row = sqlx::query("SELECT publish_summary FROM posts WHERE id = ?")
        .bind(post_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(DbError::Sqlx)?;
    let Some(row) = row else {
        return Err(DbError::Corrupt(format!("summary update for unknown post {}", post_id)).into());
    };

    let mut summary: PublishSummary = serde_json::from_str(&row.get::<String, _>("publish_summary"))
        .map_err(|e| DbError::Corrupt(format!("bad publish summary on {}: {}", post_id, e)))?;

    match outcome {
        AttemptOutcome::Posted { .. } => summary.record_success(platform, now),
        AttemptOutcome::Failed { message, .. } => summary.record_failure(platform, now, message),
    }

    sqlx::query("UPDATE posts SET publish_summary = ? WHERE id = ?")
        .bind(serde_json::to_string(&summary).map_err(|e| DbError::Corrupt(e.to_string()))?)
        .bind(post_id)
        .execute(&mut **tx)
        .await
        .map_err(DbError::Sqlx)?;

    Ok(())
}

fn post_from_row(row: &SqliteRow) -> Result<Post> {
    let content: serde_json::Value = serde_json::from_str(&row.get::<String, _>("content"))
        .map_err(|e| DbError::Corrupt(format!("bad post content: {}", e)))?;
    let publish_summary: PublishSummary =
        serde_json::from_str(&row.get::<String, _>("publish_summary"))
            .map_err(|e| DbError::Corrupt(format!("bad publish summary: {}", e)))?;
    let metrics_refs: std::collections::BTreeMap<String, String> =
        serde_json::from_str(&row.get::<String, _>("metrics_refs"))
            .map_err(|e| DbError::Corrupt(format!("bad metrics refs: {}", e)))?;

    Ok(Post {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        content,
        created_at: row.get("created_at"),
        publish_summary,
        metrics_refs,
    })
}

fn entry_from_row(row: &SqliteRow) -> Result<ScheduleEntry> {
    Ok(ScheduleEntry {
        id: row.get("id"),
        post_id: row.get("post_id"),
        platform: row
            .get::<String, _>("platform")
            .parse()
            .map_err(DbError::Corrupt)?,
        scheduled_at: row.get("scheduled_at"),
        status: EntryStatus::from_str(&row.get::<String, _>("status")).map_err(DbError::Corrupt)?,
        last_attempt_at: row.get("last_attempt_at"),
        posted_at: row.get("posted_at"),
        error: row.get("error"),
        job_ref: row.get("job_ref"),
        created_at: row.get("created_at"),
    })
}

fn attempt_from_row(row: &SqliteRow) -> Result<AttemptRecord> {
    Ok(AttemptRecord {
        id: row.get("id"),
        entry_id: row.get("entry_id"),
        status: AttemptStatus::from_str(&row.get::<String, _>("status"))
            .map_err(DbError::Corrupt)?,
        attempted_at: row.get("attempted_at"),
        external_id: row.get("external_id"),
        message: row.get("message"),
        details: row.get("details"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        Database::new(":memory:").await.unwrap()
    }

    fn test_post(owner: &str) -> Post {
        Post::new(
            owner,
            serde_json::json!({
                "facebook": { "caption": "hello", "hashtags": ["launch"] },
                "twitter": { "caption": "hello" }
            }),
        )
    }

    async fn due_entry(db: &Database, platform: PlatformId) -> (Post, ScheduleEntry) {
        let post = test_post("user-1");
        db.create_post(&post).await.unwrap();
        let entry = db
            .add_schedule_entry(&post.id, platform, chrono::Utc::now().timestamp() - 1)
            .await
            .unwrap();
        (post, entry)
    }

    #[tokio::test]
    async fn post_roundtrip() {
        let db = test_db().await;
        let post = test_post("user-1");
        db.create_post(&post).await.unwrap();

        let loaded = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, post.id);
        assert_eq!(loaded.owner_id, "user-1");
        assert_eq!(loaded.content["facebook"]["caption"], "hello");
        assert!(loaded.publish_summary.published.is_empty());
        assert!(loaded.metrics_refs.is_empty());
    }

    #[tokio::test]
    async fn get_missing_post_is_none() {
        let db = test_db().await;
        assert!(db.get_post("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_post_content_replaces_blocks() {
        let db = test_db().await;
        let post = test_post("user-1");
        db.create_post(&post).await.unwrap();

        let updated = serde_json::json!({ "twitter": { "caption": "edited" } });
        assert!(db.update_post_content(&post.id, &updated).await.unwrap());

        let loaded = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(loaded.content, updated);
        assert!(!db.update_post_content("nope", &updated).await.unwrap());
    }

    #[tokio::test]
    async fn entry_starts_pending() {
        let db = test_db().await;
        let (_, entry) = due_entry(&db, PlatformId::Facebook).await;

        assert_eq!(entry.status, EntryStatus::Pending);
        let loaded = db.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, EntryStatus::Pending);
        assert_eq!(loaded.platform, PlatformId::Facebook);
        assert!(loaded.job_ref.is_none());
    }

    #[tokio::test]
    async fn set_entry_queued_only_from_pending() {
        let db = test_db().await;
        let (_, entry) = due_entry(&db, PlatformId::Facebook).await;

        assert!(db.set_entry_queued(entry.id, "job-1").await.unwrap());
        let loaded = db.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, EntryStatus::Queued);
        assert_eq!(loaded.job_ref.as_deref(), Some("job-1"));

        // Already queued: the conditional update refuses a second ref.
        assert!(!db.set_entry_queued(entry.id, "job-2").await.unwrap());
    }

    #[tokio::test]
    async fn claim_entry_is_exclusive() {
        let db = test_db().await;
        let (_, entry) = due_entry(&db, PlatformId::Facebook).await;

        assert!(db.claim_entry(entry.id).await.unwrap());
        let claimed = db.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, EntryStatus::Processing);
        assert!(claimed.last_attempt_at.is_some());

        // Idempotence: a second claim of a processing entry is refused.
        assert!(!db.claim_entry(entry.id).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_claims_admit_exactly_one() {
        let db = test_db().await;
        let (_, entry) = due_entry(&db, PlatformId::Facebook).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let db = db.clone();
            let id = entry.id;
            handles.push(tokio::spawn(async move { db.claim_entry(id).await.unwrap() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn claim_by_key_exact_match() {
        let db = test_db().await;
        let (post, entry) = due_entry(&db, PlatformId::Facebook).await;

        let claimed = db
            .claim(&post.id, PlatformId::Facebook, entry.scheduled_at, 60)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, entry.id);
        assert_eq!(claimed.status, EntryStatus::Processing);

        // Same key again: nothing claimable left.
        assert!(db
            .claim(&post.id, PlatformId::Facebook, entry.scheduled_at, 60)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn claim_tolerates_timestamp_drift() {
        let db = test_db().await;
        let (post, entry) = due_entry(&db, PlatformId::Facebook).await;

        // 20 s of drift stays inside the 60 s window.
        let claimed = db
            .claim(&post.id, PlatformId::Facebook, entry.scheduled_at + 20, 60)
            .await
            .unwrap();
        assert_eq!(claimed.unwrap().id, entry.id);
    }

    #[tokio::test]
    async fn claim_rejects_drift_beyond_tolerance() {
        let db = test_db().await;
        let (post, entry) = due_entry(&db, PlatformId::Facebook).await;

        let claimed = db
            .claim(&post.id, PlatformId::Facebook, entry.scheduled_at + 120, 60)
            .await
            .unwrap();
        assert!(claimed.is_none());

        let untouched = db.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, EntryStatus::Pending);
    }

    #[tokio::test]
    async fn claim_prefers_nearest_entry_in_window() {
        let db = test_db().await;
        let post = test_post("user-1");
        db.create_post(&post).await.unwrap();
        let base = chrono::Utc::now().timestamp();
        let far = db
            .add_schedule_entry(&post.id, PlatformId::Facebook, base - 50)
            .await
            .unwrap();
        let near = db
            .add_schedule_entry(&post.id, PlatformId::Facebook, base - 5)
            .await
            .unwrap();

        let claimed = db
            .claim(&post.id, PlatformId::Facebook, base, 60)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, near.id);

        let other = db.entry(far.id).await.unwrap().unwrap();
        assert_eq!(other.status, EntryStatus::Pending);
    }

    #[tokio::test]
    async fn settle_posted_updates_entry_attempt_and_summary() {
        let db = test_db().await;
        let (post, entry) = due_entry(&db, PlatformId::Facebook).await;
        assert!(db.claim_entry(entry.id).await.unwrap());

        db.settle(
            entry.id,
            &AttemptOutcome::Posted {
                external_id: "fb-123".to_string(),
            },
        )
        .await
        .unwrap();

        let settled = db.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(settled.status, EntryStatus::Posted);
        assert!(settled.posted_at.is_some());
        assert!(settled.error.is_none());

        let attempts = db.attempts(entry.id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].status, AttemptStatus::Posted);
        assert_eq!(attempts[0].external_id.as_deref(), Some("fb-123"));

        let loaded = db.get_post(&post.id).await.unwrap().unwrap();
        assert!(loaded.publish_summary.published.contains_key("facebook"));
        assert!(loaded.publish_summary.is_live_anywhere());
    }

    #[tokio::test]
    async fn settle_failed_updates_entry_attempt_and_summary() {
        let db = test_db().await;
        let (post, entry) = due_entry(&db, PlatformId::Facebook).await;
        assert!(db.claim_entry(entry.id).await.unwrap());

        db.settle(
            entry.id,
            &AttemptOutcome::Failed {
                message: "permission denied: page publish not granted".to_string(),
                details: Some("permission_denied".to_string()),
            },
        )
        .await
        .unwrap();

        let settled = db.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(settled.status, EntryStatus::Failed);
        assert!(settled.error.as_deref().unwrap().contains("permission"));

        let attempts = db.attempts(entry.id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].status, AttemptStatus::Failed);
        assert_eq!(attempts[0].details.as_deref(), Some("permission_denied"));

        let loaded = db.get_post(&post.id).await.unwrap().unwrap();
        let failure = loaded.publish_summary.failed.get("facebook").unwrap();
        assert!(failure.message.contains("permission"));
    }

    #[tokio::test]
    async fn attempts_are_append_only_across_retries() {
        let db = test_db().await;
        let (_, entry) = due_entry(&db, PlatformId::Facebook).await;

        assert!(db.claim_entry(entry.id).await.unwrap());
        db.settle(
            entry.id,
            &AttemptOutcome::Failed {
                message: "network error: timeout".to_string(),
                details: Some("transient_network".to_string()),
            },
        )
        .await
        .unwrap();
        let first = db.attempts(entry.id).await.unwrap();
        assert_eq!(first.len(), 1);

        // failed is claimable again; a second attempt appends, never mutates.
        assert!(db.claim_entry(entry.id).await.unwrap());
        db.settle(
            entry.id,
            &AttemptOutcome::Posted {
                external_id: "fb-9".to_string(),
            },
        )
        .await
        .unwrap();

        let attempts = db.attempts(entry.id).await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].id, first[0].id);
        assert_eq!(attempts[0].status, AttemptStatus::Failed);
        assert_eq!(attempts[0].message, first[0].message);
        assert_eq!(attempts[0].attempted_at, first[0].attempted_at);
        assert_eq!(attempts[1].status, AttemptStatus::Posted);

        // Latest attempt outcome is reflected on the entry.
        let settled = db.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(settled.status, EntryStatus::Posted);
        assert!(settled.error.is_none());
    }

    #[tokio::test]
    async fn settle_unknown_entry_is_an_error() {
        let db = test_db().await;
        let result = db
            .settle(
                9999,
                &AttemptOutcome::Posted {
                    external_id: "x".to_string(),
                },
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cancel_pending_entry_returns_job_ref() {
        let db = test_db().await;
        let (_, entry) = due_entry(&db, PlatformId::Facebook).await;
        assert!(db.set_entry_queued(entry.id, "job-42").await.unwrap());

        let cancelled = db.cancel_entry(entry.id).await.unwrap();
        assert_eq!(cancelled, Some(Some("job-42".to_string())));

        let loaded = db.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, EntryStatus::Cancelled);

        // A cancelled entry is invisible to both execution paths.
        assert!(!db.claim_entry(entry.id).await.unwrap());
        assert!(db.due_entries(entry.scheduled_at + 10, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_processing_entry_is_refused() {
        let db = test_db().await;
        let (_, entry) = due_entry(&db, PlatformId::Facebook).await;
        assert!(db.claim_entry(entry.id).await.unwrap());

        assert!(db.cancel_entry(entry.id).await.unwrap().is_none());
        let loaded = db.entry(entry.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, EntryStatus::Processing);
    }

    #[tokio::test]
    async fn cancel_unknown_entry_is_none() {
        let db = test_db().await;
        assert!(db.cancel_entry(12345).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn due_entries_respects_time_and_batch() {
        let db = test_db().await;
        let post = test_post("user-1");
        db.create_post(&post).await.unwrap();
        let now = chrono::Utc::now().timestamp();

        for offset in [-30, -20, -10] {
            db.add_schedule_entry(&post.id, PlatformId::Twitter, now + offset)
                .await
                .unwrap();
        }
        db.add_schedule_entry(&post.id, PlatformId::Twitter, now + 3600)
            .await
            .unwrap();

        let due = db.due_entries(now, 10).await.unwrap();
        assert_eq!(due.len(), 3);
        assert!(due.windows(2).all(|w| w[0].scheduled_at <= w[1].scheduled_at));

        let batch = db.due_entries(now, 2).await.unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn record_immediate_updates_summary_only() {
        let db = test_db().await;
        let post = test_post("user-1");
        db.create_post(&post).await.unwrap();

        db.record_immediate(
            &post.id,
            PlatformId::Twitter,
            &AttemptOutcome::Posted {
                external_id: "tw-1".to_string(),
            },
        )
        .await
        .unwrap();

        let loaded = db.get_post(&post.id).await.unwrap().unwrap();
        assert!(loaded.publish_summary.published.contains_key("twitter"));
        assert!(db.entries_for_post(&post.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_metrics_ref_accumulates() {
        let db = test_db().await;
        let post = test_post("user-1");
        db.create_post(&post).await.unwrap();

        db.record_metrics_ref(&post.id, PlatformId::Facebook, "fb-1")
            .await
            .unwrap();
        db.record_metrics_ref(&post.id, PlatformId::Twitter, "tw-1")
            .await
            .unwrap();

        let loaded = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(loaded.metrics_refs.get("facebook").unwrap(), "fb-1");
        assert_eq!(loaded.metrics_refs.get("twitter").unwrap(), "tw-1");

        assert!(db
            .record_metrics_ref("nope", PlatformId::Facebook, "x")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn delete_post_cascades_and_returns_job_refs() {
        let db = test_db().await;
        let post = test_post("user-1");
        db.create_post(&post).await.unwrap();
        let now = chrono::Utc::now().timestamp();

        let queued = db
            .add_schedule_entry(&post.id, PlatformId::Facebook, now + 60)
            .await
            .unwrap();
        db.set_entry_queued(queued.id, "job-7").await.unwrap();
        db.add_schedule_entry(&post.id, PlatformId::Twitter, now + 60)
            .await
            .unwrap();

        // Wrong owner deletes nothing.
        assert!(db.delete_post(&post.id, "someone-else").await.unwrap().is_none());

        let refs = db.delete_post(&post.id, "user-1").await.unwrap().unwrap();
        assert_eq!(refs, vec!["job-7".to_string()]);

        assert!(db.get_post(&post.id).await.unwrap().is_none());
        assert!(db.entry(queued.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scheduled_entries_filters_by_platform() {
        let db = test_db().await;
        let post = test_post("user-1");
        db.create_post(&post).await.unwrap();
        let now = chrono::Utc::now().timestamp();

        db.add_schedule_entry(&post.id, PlatformId::Facebook, now + 10)
            .await
            .unwrap();
        db.add_schedule_entry(&post.id, PlatformId::Twitter, now + 20)
            .await
            .unwrap();

        let all = db.scheduled_entries(None, 10).await.unwrap();
        assert_eq!(all.len(), 2);

        let twitter = db
            .scheduled_entries(Some(PlatformId::Twitter), 10)
            .await
            .unwrap();
        assert_eq!(twitter.len(), 1);
        assert_eq!(twitter[0].platform, PlatformId::Twitter);
    }

    #[tokio::test]
    async fn upcoming_entries_respects_owner_and_window() {
        let db = test_db().await;
        let mine = test_post("user-1");
        let theirs = test_post("user-2");
        db.create_post(&mine).await.unwrap();
        db.create_post(&theirs).await.unwrap();
        let now = chrono::Utc::now().timestamp();

        db.add_schedule_entry(&mine.id, PlatformId::Facebook, now + 100)
            .await
            .unwrap();
        db.add_schedule_entry(&theirs.id, PlatformId::Facebook, now + 100)
            .await
            .unwrap();
        db.add_schedule_entry(&mine.id, PlatformId::Facebook, now + 100_000)
            .await
            .unwrap();

        let window = db
            .upcoming_entries(Some("user-1"), now, now + 1000)
            .await
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].post_id, mine.id);

        let everyone = db.upcoming_entries(None, now, now + 1000).await.unwrap();
        assert_eq!(everyone.len(), 2);
    }

    #[tokio::test]
    async fn entry_stats_counts_by_status() {
        let db = test_db().await;
        let (_, a) = due_entry(&db, PlatformId::Facebook).await;
        let (_, _b) = due_entry(&db, PlatformId::Twitter).await;
        db.claim_entry(a.id).await.unwrap();

        let stats = db.entry_stats().await.unwrap();
        let get = |s: &str| stats.iter().find(|(k, _)| k == s).map(|(_, n)| *n);
        assert_eq!(get("processing"), Some(1));
        assert_eq!(get("pending"), Some(1));
    }
}
