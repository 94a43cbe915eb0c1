//! Platform-agnostic publisher adapter
//!
//! The shell both execution paths call into: credential lookup through the
//! injected provider, inline token refresh, content composition, the bounded
//! external call, taxonomy normalization, and the best-effort metrics
//! correlation write. Per-platform wire details live behind
//! [`PlatformPublisher`] implementations in [`crate::platforms`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::warn;

use crate::credentials::CredentialProvider;
use crate::db::Database;
use crate::error::{PublishError, Result};
use crate::platforms::{NormalizedContent, PlatformPublisher, PublishReceipt};
use crate::types::{AttemptOutcome, PlatformContent, PlatformId, Post, ScheduleEntry};

/// Result of running one claimed entry to completion.
///
/// `outcome` is what settle recorded; `error` keeps the classification so
/// the job queue can make its retry decision on the original error.
#[derive(Debug)]
pub struct EntryExecution {
    pub outcome: AttemptOutcome,
    pub error: Option<PublishError>,
}

pub struct Publisher {
    platforms: HashMap<PlatformId, Box<dyn PlatformPublisher>>,
    credentials: Arc<dyn CredentialProvider>,
    db: Arc<Database>,
    request_timeout: Duration,
}

impl Publisher {
    pub fn new(
        publishers: Vec<Box<dyn PlatformPublisher>>,
        credentials: Arc<dyn CredentialProvider>,
        db: Arc<Database>,
        request_timeout: Duration,
    ) -> Self {
        let platforms = publishers.into_iter().map(|p| (p.platform(), p)).collect();
        Self {
            platforms,
            credentials,
            db,
            request_timeout,
        }
    }

    /// Publish one post to one platform.
    ///
    /// Every failure comes back classified; nothing below this boundary
    /// surfaces raw transport or API errors.
    pub async fn publish(
        &self,
        post: &Post,
        platform: PlatformId,
    ) -> std::result::Result<PublishReceipt, PublishError> {
        let publisher = self.platforms.get(&platform).ok_or_else(|| {
            PublishError::Unsupported(format!("no publisher registered for {}", platform))
        })?;

        let mut creds = self
            .credentials
            .get(&post.owner_id, platform)
            .await
            .map_err(|e| PublishError::Network(format!("credential store unavailable: {}", e)))?
            .ok_or_else(|| {
                PublishError::CredentialsMissing(format!(
                    "owner {} holds no {} credentials",
                    post.owner_id, platform
                ))
            })?;

        publisher.check_credentials(&creds)?;

        let now = chrono::Utc::now().timestamp();
        if publisher.token_expires() && creds.is_expired(now) {
            let fresh = publisher.refresh(&creds).await?;
            // Persisting the refreshed token is single-writer-per-owner;
            // losing the write only costs a refresh on the next publish.
            if let Err(e) = self.credentials.put(&post.owner_id, platform, &fresh).await {
                warn!(owner = %post.owner_id, %platform, "failed to persist refreshed token: {}", e);
            }
            creds = fresh;
        }

        let content = compose(post, platform)?;

        let receipt = match timeout(self.request_timeout, publisher.publish(&creds, &content)).await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(PublishError::Network(format!(
                    "{} publish timed out after {}s",
                    platform,
                    self.request_timeout.as_secs()
                )))
            }
        };

        // Metrics correlation id for later analytics. Losing this write
        // never fails the publish.
        if let Err(e) = self
            .db
            .record_metrics_ref(&post.id, platform, &receipt.external_id)
            .await
        {
            warn!(post = %post.id, %platform, "failed to record metrics ref: {}", e);
        }

        Ok(receipt)
    }

    /// Run an already-claimed entry: fetch the live post, publish, settle.
    ///
    /// Shared by the poll tick, the queue worker, and operator-triggered
    /// runs; only the settle write can surface an error, everything else is
    /// folded into the recorded outcome.
    pub async fn execute_claimed(&self, entry: &ScheduleEntry) -> Result<EntryExecution> {
        let execution = match self.db.get_post(&entry.post_id).await? {
            None => {
                let err = PublishError::NotFound(format!(
                    "post {} vanished before publish",
                    entry.post_id
                ));
                EntryExecution {
                    outcome: AttemptOutcome::from_error(&err),
                    error: Some(err),
                }
            }
            Some(post) => match self.publish(&post, entry.platform).await {
                Ok(receipt) => EntryExecution {
                    outcome: AttemptOutcome::Posted {
                        external_id: receipt.external_id,
                    },
                    error: None,
                },
                Err(err) => EntryExecution {
                    outcome: AttemptOutcome::from_error(&err),
                    error: Some(err),
                },
            },
        };

        self.db.settle(entry.id, &execution.outcome).await?;
        Ok(execution)
    }
}

/// Compose a platform-ready blob from a post's content block.
///
/// Caption and hashtags merge into one text, truncated on a char boundary
/// to the platform's known limit; the image reference passes through as-is.
/// This is where the loosely-typed stored block gets validated.
pub fn compose(post: &Post, platform: PlatformId) -> std::result::Result<NormalizedContent, PublishError> {
    let block = post.platform_block(platform).ok_or_else(|| {
        PublishError::Unsupported(format!(
            "post {} carries no content block for {}",
            post.id, platform
        ))
    })?;

    let content: PlatformContent = serde_json::from_value(block.clone()).map_err(|e| {
        PublishError::Unsupported(format!("malformed {} content block: {}", platform, e))
    })?;

    let mut text = content.caption.unwrap_or_default();
    if !content.hashtags.is_empty() {
        let tags = content
            .hashtags
            .iter()
            .map(|t| {
                if t.starts_with('#') {
                    t.clone()
                } else {
                    format!("#{}", t)
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        if text.is_empty() {
            text = tags;
        } else {
            text = format!("{}\n\n{}", text, tags);
        }
    }

    Ok(NormalizedContent {
        text: truncate_chars(&text, platform.character_limit()),
        image_ref: content.image_ref,
    })
}

fn truncate_chars(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        s.to_string()
    } else {
        s.chars().take(limit).collect()
    }
}
