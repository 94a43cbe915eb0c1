//! Per-platform rate limiting for the execution paths
//!
//! Posts-per-hour windows, tracked in an upserted counter table. Both the
//! poll scheduler and the queue workers consult the limiter before claiming;
//! an exhausted window defers the work without consuming anything, so the
//! entry simply runs in a later window.

use std::collections::BTreeMap;

use sqlx::Row;

use crate::db::Database;
use crate::error::{DbError, Result};
use crate::types::PlatformId;

pub struct RateLimiter {
    /// posts per hour per platform; absent platforms are unlimited
    limits: BTreeMap<String, u32>,
}

impl RateLimiter {
    pub fn new(limits: BTreeMap<String, u32>) -> Self {
        Self { limits }
    }

    /// Whether a publish to this platform is allowed right now
    pub async fn check(&self, db: &Database, platform: PlatformId, now: i64) -> Result<bool> {
        let limit = match self.limits.get(platform.as_str()) {
            Some(limit) => *limit,
            None => return Ok(true),
        };

        let count = window_count(db, platform, window_start(now)).await?;
        Ok(count < limit)
    }

    /// Count a successful publish against the current window
    pub async fn record(&self, db: &Database, platform: PlatformId, now: i64) -> Result<()> {
        if !self.limits.contains_key(platform.as_str()) {
            return Ok(());
        }
        increment_window(db, platform, window_start(now)).await
    }

    /// Drop windows that ended before `cutoff`
    pub async fn cleanup_old_windows(&self, db: &Database, cutoff: i64) -> Result<()> {
        sqlx::query("DELETE FROM rate_limits WHERE window_start < ?")
            .bind(window_start(cutoff))
            .execute(db.pool())
            .await
            .map_err(DbError::Sqlx)?;
        Ok(())
    }
}

/// Floor to the hour
fn window_start(timestamp: i64) -> i64 {
    (timestamp / 3600) * 3600
}

async fn window_count(db: &Database, platform: PlatformId, window_start: i64) -> Result<u32> {
    let row = sqlx::query(
        "SELECT post_count FROM rate_limits WHERE platform = ? AND window_start = ?",
    )
    .bind(platform.as_str())
    .bind(window_start)
    .fetch_optional(db.pool())
    .await
    .map_err(DbError::Sqlx)?;

    Ok(row
        .map(|r| r.get::<i64, _>("post_count"))
        .unwrap_or(0) as u32)
}

async fn increment_window(db: &Database, platform: PlatformId, window_start: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO rate_limits (platform, window_start, post_count)
        VALUES (?, ?, 1)
        ON CONFLICT(platform, window_start)
        DO UPDATE SET post_count = post_count + 1
        "#,
    )
    .bind(platform.as_str())
    .bind(window_start)
    .execute(db.pool())
    .await
    .map_err(DbError::Sqlx)?;

    Ok(())
}
