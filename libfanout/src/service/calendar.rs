//! Read-only schedule views
//!
//! Calendar and per-post listings read `schedule_entries` and the attempt
//! trail directly; no special contract beyond seeing the latest settle.

use std::sync::Arc;

use crate::db::Database;
use crate::error::Result;
use crate::types::{AttemptRecord, ScheduleEntry};

#[derive(Clone)]
pub struct CalendarService {
    db: Arc<Database>,
}

impl CalendarService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Entries scheduled inside `[from, to]`, optionally for one owner
    pub async fn upcoming(
        &self,
        owner_id: Option<&str>,
        from: i64,
        to: i64,
    ) -> Result<Vec<ScheduleEntry>> {
        self.db.upcoming_entries(owner_id, from, to).await
    }

    /// A post's entries with their full attempt history
    pub async fn for_post(
        &self,
        post_id: &str,
    ) -> Result<Vec<(ScheduleEntry, Vec<AttemptRecord>)>> {
        let entries = self.db.entries_for_post(post_id).await?;
        let mut detailed = Vec::with_capacity(entries.len());
        for entry in entries {
            let attempts = self.db.attempts(entry.id).await?;
            detailed.push((entry, attempts));
        }
        Ok(detailed)
    }
}
