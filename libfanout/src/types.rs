//! Core types for Fanout

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Supported external platform families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformId {
    Facebook,
    Instagram,
    Twitter,
    Linkedin,
}

impl PlatformId {
    pub const ALL: [PlatformId; 4] = [
        PlatformId::Facebook,
        PlatformId::Instagram,
        PlatformId::Twitter,
        PlatformId::Linkedin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformId::Facebook => "facebook",
            PlatformId::Instagram => "instagram",
            PlatformId::Twitter => "twitter",
            PlatformId::Linkedin => "linkedin",
        }
    }

    /// Known caption length limit, in characters
    pub fn character_limit(&self) -> usize {
        match self {
            PlatformId::Facebook => 63_206,
            PlatformId::Instagram => 2_200,
            PlatformId::Twitter => 280,
            PlatformId::Linkedin => 3_000,
        }
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PlatformId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "facebook" => Ok(PlatformId::Facebook),
            "instagram" => Ok(PlatformId::Instagram),
            "twitter" | "x" => Ok(PlatformId::Twitter),
            "linkedin" => Ok(PlatformId::Linkedin),
            other => Err(format!(
                "unknown platform '{}'. Valid options: facebook, instagram, twitter, linkedin",
                other
            )),
        }
    }
}

/// Lifecycle of one schedule entry.
///
/// Transitions only move forward: pending -> queued -> processing ->
/// posted | failed | cancelled. A failed entry becomes claimable again so a
/// later queue attempt (or a caller reschedule) can drive it to a terminal
/// state; posted and cancelled are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Queued,
    Processing,
    Posted,
    Failed,
    Cancelled,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Queued => "queued",
            EntryStatus::Processing => "processing",
            EntryStatus::Posted => "posted",
            EntryStatus::Failed => "failed",
            EntryStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses an execution path may claim for processing
    pub fn is_claimable(&self) -> bool {
        matches!(
            self,
            EntryStatus::Pending | EntryStatus::Queued | EntryStatus::Failed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryStatus::Posted | EntryStatus::Cancelled)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EntryStatus::Pending),
            "queued" => Ok(EntryStatus::Queued),
            "processing" => Ok(EntryStatus::Processing),
            "posted" => Ok(EntryStatus::Posted),
            "failed" => Ok(EntryStatus::Failed),
            "cancelled" => Ok(EntryStatus::Cancelled),
            other => Err(format!("unknown entry status '{}'", other)),
        }
    }
}

/// One per-platform content block inside a post's content document.
///
/// Storage is permissive (the post keeps raw JSON); this shape is only
/// imposed at the publisher adapter boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformContent {
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub image_ref: Option<String>,
}

/// Timestamp and message of a platform's most recent failed attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPlatform {
    pub at: i64,
    pub message: String,
}

/// Derived cache of where a post is live and where it last failed.
///
/// Rewritten inside the same transaction as every settle, so readers never
/// observe an entry/summary mismatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishSummary {
    /// platform -> posted_at
    #[serde(default)]
    pub published: BTreeMap<String, i64>,
    /// platform -> last failure
    #[serde(default)]
    pub failed: BTreeMap<String, FailedPlatform>,
}

impl PublishSummary {
    pub fn record_success(&mut self, platform: PlatformId, at: i64) {
        self.published.insert(platform.as_str().to_string(), at);
        self.failed.remove(platform.as_str());
    }

    pub fn record_failure(&mut self, platform: PlatformId, at: i64, message: &str) {
        self.failed.insert(
            platform.as_str().to_string(),
            FailedPlatform {
                at,
                message: message.to_string(),
            },
        );
    }

    pub fn is_live_anywhere(&self) -> bool {
        !self.published.is_empty()
    }
}

/// The unit of generated content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub owner_id: String,
    /// JSON object keyed by platform name; blocks are loosely typed
    pub content: serde_json::Value,
    pub created_at: i64,
    pub publish_summary: PublishSummary,
    /// platform -> external post id, written best-effort for analytics
    pub metrics_refs: BTreeMap<String, String>,
}

impl Post {
    pub fn new(owner_id: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            content,
            created_at: chrono::Utc::now().timestamp(),
            publish_summary: PublishSummary::default(),
            metrics_refs: BTreeMap::new(),
        }
    }

    /// Raw content block for a platform, falling back to the `default` block
    pub fn platform_block(&self, platform: PlatformId) -> Option<&serde_json::Value> {
        self.content
            .get(platform.as_str())
            .or_else(|| self.content.get("default"))
    }
}

/// One (platform, time) publish intent belonging to a post
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: i64,
    pub post_id: String,
    pub platform: PlatformId,
    pub scheduled_at: i64,
    pub status: EntryStatus,
    pub last_attempt_at: Option<i64>,
    pub posted_at: Option<i64>,
    pub error: Option<String>,
    /// Opaque handle into the job queue, kept for cancellation
    pub job_ref: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Posted,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Posted => "posted",
            AttemptStatus::Failed => "failed",
        }
    }
}

impl FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "posted" => Ok(AttemptStatus::Posted),
            "failed" => Ok(AttemptStatus::Failed),
            other => Err(format!("unknown attempt status '{}'", other)),
        }
    }
}

/// One execution attempt, append-only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub id: Option<i64>,
    pub entry_id: i64,
    pub status: AttemptStatus,
    pub attempted_at: i64,
    pub external_id: Option<String>,
    pub message: Option<String>,
    pub details: Option<String>,
}

/// Outcome handed to settle by an execution path
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Posted {
        external_id: String,
    },
    Failed {
        message: String,
        details: Option<String>,
    },
}

impl AttemptOutcome {
    pub fn is_posted(&self) -> bool {
        matches!(self, AttemptOutcome::Posted { .. })
    }

    /// Failure outcome carrying the classified message and kind tag
    pub fn from_error(err: &crate::error::PublishError) -> Self {
        AttemptOutcome::Failed {
            message: err.to_string(),
            details: Some(err.kind().to_string()),
        }
    }
}
