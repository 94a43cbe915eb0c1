//! Immediate publishing and operator-triggered entry execution
//!
//! The immediate path shares the publisher adapter and the summary update
//! with the scheduled pipeline but skips the claim: there is no entry to
//! race over. Operator-triggered execution of an existing entry goes through
//! the claim like any other path.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::db::Database;
use crate::error::{FanoutError, Result};
use crate::publisher::Publisher;
use crate::types::{AttemptOutcome, PlatformId};

#[derive(Debug, Clone, Serialize)]
pub struct ImmediatePublish {
    pub platform: PlatformId,
    pub external_id: String,
}

#[derive(Clone)]
pub struct PublishingService {
    db: Arc<Database>,
    publisher: Arc<Publisher>,
}

impl PublishingService {
    pub fn new(db: Arc<Database>, publisher: Arc<Publisher>) -> Self {
        Self { db, publisher }
    }

    /// Publish a post to one platform right now, no schedule entry involved.
    ///
    /// Success and failure both land in the post's publish summary so
    /// readers see one consistent view regardless of which path published.
    pub async fn publish_now(
        &self,
        post_id: &str,
        owner_id: &str,
        platform: PlatformId,
    ) -> Result<ImmediatePublish> {
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

        match self.publisher.publish(&post, platform).await {
            Ok(receipt) => {
                self.db
                    .record_immediate(
                        post_id,
                        platform,
                        &AttemptOutcome::Posted {
                            external_id: receipt.external_id.clone(),
                        },
                    )
                    .await?;
                Ok(ImmediatePublish {
                    platform,
                    external_id: receipt.external_id,
                })
            }
            Err(err) => {
                let outcome = AttemptOutcome::from_error(&err);
                if let Err(e) = self.db.record_immediate(post_id, platform, &outcome).await {
                    warn!(post = %post_id, "failed to record immediate failure: {}", e);
                }
                Err(err.into())
            }
        }
    }

    /// Claim and run one schedule entry now (operator tooling).
    ///
    /// Fails with `InvalidInput` if the entry is not claimable — which is
    /// also what stops a double run when a worker got there first.
    pub async fn execute_entry(&self, entry_id: i64) -> Result<AttemptOutcome> {
        let entry = self
            .db
            .entry(entry_id)
            .await?
            .ok_or_else(|| FanoutError::InvalidInput(format!("no such entry: {}", entry_id)))?;

        if !self.db.claim_entry(entry.id).await? {
            return Err(FanoutError::InvalidInput(format!(
                "entry {} is not claimable (status {})",
                entry.id, entry.status
            )));
        }

        let execution = self.publisher.execute_claimed(&entry).await?;
        Ok(execution.outcome)
    }
}
