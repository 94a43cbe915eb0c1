//! Poll scheduler — the fallback execution path
//!
//! A single logical loop that works with nothing but the content store: each
//! tick queries a bounded batch of due claimable entries, claims them one by
//! one, and runs each claimed entry through the publisher. Entries another
//! path already claimed are skipped silently; one slow or failing entry never
//! stops the rest of the batch. The adapter's request timeout bounds
//! per-entry latency, so a hung platform cannot stall ticks indefinitely.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::db::Database;
use crate::error::Result;
use crate::publisher::Publisher;
use crate::rate_limiter::RateLimiter;
use crate::types::ScheduleEntry;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub poll_interval: Duration,
    pub batch_size: u32,
    pub match_tolerance_secs: i64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            batch_size: 10,
            match_tolerance_secs: 60,
        }
    }
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            batch_size: config.batch_size,
            match_tolerance_secs: config.match_tolerance_secs,
        }
    }
}

pub struct PollScheduler {
    db: Arc<Database>,
    publisher: Arc<Publisher>,
    limiter: Arc<RateLimiter>,
    settings: SchedulerSettings,
}

impl PollScheduler {
    pub fn new(
        db: Arc<Database>,
        publisher: Arc<Publisher>,
        limiter: Arc<RateLimiter>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            db,
            publisher,
            limiter,
            settings,
        }
    }

    /// Run ticks until shutdown is requested.
    ///
    /// A tick finishes before the next one starts; tick errors are logged
    /// and the loop carries on.
    pub async fn run(self, shutdown: Arc<AtomicBool>) {
        info!(
            "poll scheduler running every {}s (batch {})",
            self.settings.poll_interval.as_secs(),
            self.settings.batch_size
        );

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("poll scheduler stopping");
                break;
            }

            match self.tick().await {
                Ok(0) => {}
                Ok(n) => info!("poll tick executed {} entr(ies)", n),
                Err(e) => warn!("poll tick failed: {}", e),
            }

            // Sleep in 1s slices so shutdown stays responsive.
            for _ in 0..self.settings.poll_interval.as_secs().max(1) {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                sleep(Duration::from_secs(1)).await;
            }
        }
    }

    /// One pass over the due entries. Returns how many entries this tick
    /// actually executed (claimed and settled).
    pub async fn tick(&self) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let due = self.db.due_entries(now, self.settings.batch_size).await?;
        if due.is_empty() {
            return Ok(0);
        }
        debug!("poll tick found {} due entr(ies)", due.len());

        let mut executed = 0;
        for entry in due {
            match self.limiter.check(&self.db, entry.platform, now).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(
                        entry = entry.id, platform = %entry.platform,
                        "rate limit window exhausted, leaving entry for a later tick"
                    );
                    continue;
                }
                Err(e) => {
                    warn!(entry = entry.id, "rate limit check failed: {}", e);
                    continue;
                }
            }

            match self.db.claim_entry(entry.id).await {
                Ok(true) => {}
                // Another path got there first; not ours to run.
                Ok(false) => continue,
                Err(e) => {
                    warn!(entry = entry.id, "claim failed: {}", e);
                    continue;
                }
            }

            if self.execute(&entry, now).await {
                executed += 1;
            }
        }
        Ok(executed)
    }

    /// Publish and settle one claimed entry; contains its own errors
    async fn execute(&self, entry: &ScheduleEntry, now: i64) -> bool {
        match self.publisher.execute_claimed(entry).await {
            Ok(execution) => {
                match &execution.error {
                    None => {
                        info!(
                            entry = entry.id, post = %entry.post_id, platform = %entry.platform,
                            "published scheduled entry"
                        );
                        if let Err(e) = self.limiter.record(&self.db, entry.platform, now).await {
                            warn!("failed to record rate limit usage: {}", e);
                        }
                    }
                    Some(err) => {
                        // The poll path has no automatic retry: the entry
                        // sits failed until rescheduled.
                        warn!(
                            entry = entry.id, post = %entry.post_id, platform = %entry.platform,
                            "publish attempt failed: {}", err
                        );
                    }
                }
                true
            }
            Err(e) => {
                warn!(entry = entry.id, "settle failed: {}", e);
                false
            }
        }
    }
}
