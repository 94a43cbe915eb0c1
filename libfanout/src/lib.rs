//! Fanout - scheduled multi-platform publish pipeline
//!
//! The core of a content-publishing backend: posts carry per-platform
//! schedule entries, a durable job queue and a poll scheduler race safely
//! over due entries via store-level atomic claims, and every attempt settles
//! into an append-only audit trail plus a denormalized publish summary.

pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod logging;
pub mod platforms;
pub mod publisher;
pub mod queue;
pub mod rate_limiter;
pub mod scheduler;
pub mod scheduling;
pub mod service;
pub mod types;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{FanoutError, PublishError, Result};
pub use publisher::Publisher;
pub use queue::{JobPayload, JobQueue, QueueSettings};
pub use scheduler::{PollScheduler, SchedulerSettings};
pub use types::{
    AttemptOutcome, AttemptRecord, AttemptStatus, EntryStatus, PlatformId, Post, PublishSummary,
    ScheduleEntry,
};
pub use worker::WorkerPool;
