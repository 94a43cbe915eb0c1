//! Post and schedule management
//!
//! Creating a post with schedule entries is what feeds the pipeline: each
//! entry gets a delayed job when the queue is up (entry `queued` + job ref),
//! and is otherwise left `pending` for the poll scheduler. Cancellation and
//! deletion both carry the best-effort job cleanup contract.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::db::Database;
use crate::error::{FanoutError, Result};
use crate::queue::{JobPayload, JobQueue};
use crate::types::{EntryStatus, PlatformId, Post, PublishSummary, ScheduleEntry};

/// One requested (platform, time) publish intent
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub platform: PlatformId,
    pub scheduled_at: i64,
}

#[derive(Clone)]
pub struct PostService {
    db: Arc<Database>,
    queue: Option<Arc<JobQueue>>,
}

impl PostService {
    pub fn new(db: Arc<Database>, queue: Option<Arc<JobQueue>>) -> Self {
        Self { db, queue }
    }

    /// Create a post with zero or more schedule entries
    pub async fn create(
        &self,
        owner_id: &str,
        content: serde_json::Value,
        schedule: Vec<ScheduleRequest>,
    ) -> Result<(Post, Vec<ScheduleEntry>)> {
        let post = Post::new(owner_id, content);
        self.db.create_post(&post).await?;

        let mut entries = Vec::with_capacity(schedule.len());
        for request in schedule {
            entries.push(self.schedule_entry(&post, request).await?);
        }
        Ok((post, entries))
    }

    /// Append a schedule entry to an existing post
    pub async fn add_schedule(
        &self,
        post_id: &str,
        owner_id: &str,
        request: ScheduleRequest,
    ) -> Result<ScheduleEntry> {
        let post = self.owned_post(post_id, owner_id).await?;
        self.schedule_entry(&post, request).await
    }

    async fn schedule_entry(
        &self,
        post: &Post,
        request: ScheduleRequest,
    ) -> Result<ScheduleEntry> {
        let mut entry = self
            .db
            .add_schedule_entry(&post.id, request.platform, request.scheduled_at)
            .await?;

        if let Some(queue) = &self.queue {
            let payload = JobPayload {
                post_id: post.id.clone(),
                platform: request.platform,
                scheduled_at: request.scheduled_at,
            };
            match queue.enqueue(&payload, request.scheduled_at).await {
                Ok(job_ref) => {
                    if self.db.set_entry_queued(entry.id, &job_ref).await? {
                        entry.status = EntryStatus::Queued;
                        entry.job_ref = Some(job_ref);
                    }
                }
                // Not fatal: the poll scheduler will discover the entry.
                Err(e) => warn!(
                    post = %post.id, platform = %request.platform,
                    "enqueue failed, entry left for poll discovery: {}", e
                ),
            }
        }
        Ok(entry)
    }

    /// Replace a post's content blocks. Scheduled entries pick the new
    /// content up automatically because execution re-fetches the live post.
    pub async fn update_content(
        &self,
        post_id: &str,
        owner_id: &str,
        content: serde_json::Value,
    ) -> Result<()> {
        self.owned_post(post_id, owner_id).await?;
        self.db.update_post_content(post_id, &content).await?;
        Ok(())
    }

    /// Cancel a not-yet-executed entry.
    ///
    /// Returns `false` when the entry was no longer cancellable (already
    /// processing, settled, or cancelled). An in-flight attempt runs to
    /// completion; callers may still observe a posted/failed result after a
    /// cancellation request — a documented race, not a bug.
    pub async fn cancel(&self, post_id: &str, owner_id: &str, entry_id: i64) -> Result<bool> {
        self.owned_post(post_id, owner_id).await?;
        let entry = self
            .db
            .entry(entry_id)
            .await?
            .ok_or_else(|| FanoutError::InvalidInput(format!("no such entry: {}", entry_id)))?;
        if entry.post_id != post_id {
            return Err(FanoutError::InvalidInput(format!(
                "entry {} does not belong to post {}",
                entry_id, post_id
            )));
        }

        match self.db.cancel_entry(entry_id).await? {
            None => Ok(false),
            Some(job_ref) => {
                if let (Some(queue), Some(job_ref)) = (&self.queue, job_ref) {
                    // Best-effort; the job may already be gone.
                    match queue.cancel(&job_ref).await {
                        Ok(true) => debug!("cancelled queued job {}", job_ref),
                        Ok(false) => debug!("job {} already gone", job_ref),
                        Err(e) => warn!("failed to cancel job {}: {}", job_ref, e),
                    }
                }
                Ok(true)
            }
        }
    }

    /// Delete a post; entries and attempts go with it. Pending jobs are
    /// cancelled best-effort.
    pub async fn delete(&self, post_id: &str, owner_id: &str) -> Result<bool> {
        match self.db.delete_post(post_id, owner_id).await? {
            None => Ok(false),
            Some(job_refs) => {
                if let Some(queue) = &self.queue {
                    for job_ref in job_refs {
                        if let Err(e) = queue.cancel(&job_ref).await {
                            warn!("failed to cancel job {} for deleted post: {}", job_ref, e);
                        }
                    }
                }
                Ok(true)
            }
        }
    }

    pub async fn get(&self, post_id: &str) -> Result<Option<Post>> {
        self.db.get_post(post_id).await
    }

    /// Fast "is this live anywhere" read, straight off the summary cache
    pub async fn summary(&self, post_id: &str) -> Result<Option<PublishSummary>> {
        Ok(self
            .db
            .get_post(post_id)
            .await?
            .map(|post| post.publish_summary))
    }

    async fn owned_post(&self, post_id: &str, owner_id: &str) -> Result<Post> {
        let post = self
            .db
            .get_post(post_id)
            .await?
            .ok_or_else(|| FanoutError::InvalidInput(format!("no such post: {}", post_id)))?;
        if post.owner_id != owner_id {
            return Err(FanoutError::InvalidInput(format!(
                "post {} does not belong to {}",
                post_id, owner_id
            )));
        }
        Ok(post)
    }
}
