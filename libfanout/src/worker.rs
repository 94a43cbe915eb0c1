//! Worker pool draining the durable job queue
//!
//! N workers share the queue; each dequeued job is claimed against the
//! lifecycle store before anything else, so the worker and the poll
//! scheduler can race over the same entry and exactly one of them publishes.
//! Publish failures settle into the lifecycle and are then handed back to
//! the queue's attempt/backoff machinery; nothing a job does can take the
//! loop down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::db::Database;
use crate::publisher::Publisher;
use crate::queue::{Job, JobQueue};
use crate::rate_limiter::RateLimiter;

/// How long an idle worker sleeps before polling the queue again
const IDLE_WAIT: Duration = Duration::from_secs(1);
/// Pause after a queue-store error before retrying
const STORE_RETRY_WAIT: Duration = Duration::from_secs(5);
/// How often a worker runs the retention sweep
const SWEEP_INTERVAL_SECS: i64 = 600;
/// Deferral when a platform's rate-limit window is exhausted
const RATE_LIMIT_DEFER_SECS: i64 = 300;

#[derive(Clone)]
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    db: Arc<Database>,
    publisher: Arc<Publisher>,
    limiter: Arc<RateLimiter>,
    /// Drift window used when locating the entry a job points at
    match_tolerance_secs: i64,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<JobQueue>,
        db: Arc<Database>,
        publisher: Arc<Publisher>,
        limiter: Arc<RateLimiter>,
        match_tolerance_secs: i64,
    ) -> Self {
        Self {
            queue,
            db,
            publisher,
            limiter,
            match_tolerance_secs,
        }
    }

    /// Run the pool until shutdown is requested
    pub async fn run(self, shutdown: Arc<AtomicBool>) {
        let concurrency = self.queue.settings().concurrency.max(1);
        info!("starting {} queue worker(s)", concurrency);

        let mut handles = Vec::with_capacity(concurrency);
        for worker in 0..concurrency {
            let pool = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                pool.worker_loop(worker, shutdown).await;
            }));
        }
        join_all(handles).await;
        info!("queue workers stopped");
    }

    async fn worker_loop(&self, worker: usize, shutdown: Arc<AtomicBool>) {
        let mut last_sweep = 0i64;

        while !shutdown.load(Ordering::Relaxed) {
            let now = chrono::Utc::now().timestamp();

            if worker == 0 && now - last_sweep >= SWEEP_INTERVAL_SECS {
                match self.queue.sweep_finished(now).await {
                    Ok(0) => {}
                    Ok(n) => debug!("swept {} finished job(s)", n),
                    Err(e) => warn!("retention sweep failed: {}", e),
                }
                last_sweep = now;
            }

            match self.queue.dequeue(now).await {
                Ok(Some(job)) => self.process_job(job).await,
                Ok(None) => sleep(IDLE_WAIT).await,
                Err(e) => {
                    // Queue store trouble is transient by contract; keep
                    // the worker alive and come back.
                    warn!("queue unavailable, retrying: {}", e);
                    sleep(STORE_RETRY_WAIT).await;
                }
            }
        }
    }

    /// Drain every currently-ready job once, then return. Used by the
    /// daemon's single-shot mode and by tests.
    pub async fn drain_once(&self) -> crate::error::Result<usize> {
        let mut processed = 0;
        loop {
            let now = chrono::Utc::now().timestamp();
            match self.queue.dequeue(now).await? {
                Some(job) => {
                    self.process_job(job).await;
                    processed += 1;
                }
                None => return Ok(processed),
            }
        }
    }

    /// Execute one dequeued job end to end. Never propagates an error:
    /// failures settle into the lifecycle and feed the queue's retry
    /// decision instead.
    pub async fn process_job(&self, job: Job) {
        let now = chrono::Utc::now().timestamp();
        let payload = &job.payload;

        match self.limiter.check(&self.db, payload.platform, now).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    post = %payload.post_id, platform = %payload.platform,
                    "rate limit window exhausted, deferring job"
                );
                // No attempt consumed; the entry stays claimable.
                if let Err(e) = self.queue.defer(&job.id, now + RATE_LIMIT_DEFER_SECS).await {
                    warn!("failed to defer rate-limited job {}: {}", job.id, e);
                }
                return;
            }
            Err(e) => {
                warn!("rate limit check failed, deferring job {}: {}", job.id, e);
                if let Err(e) = self.queue.defer(&job.id, now + RATE_LIMIT_DEFER_SECS).await {
                    warn!("failed to defer job {}: {}", job.id, e);
                }
                return;
            }
        }

        let claimed = match self
            .db
            .claim(
                &payload.post_id,
                payload.platform,
                payload.scheduled_at,
                self.match_tolerance_secs,
            )
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                // Content store unreachable: transient, retry the whole job.
                warn!(
                    post = %payload.post_id, platform = %payload.platform,
                    "claim failed, deferring job: {}", e
                );
                if let Err(e) = self.queue.defer(&job.id, now + RATE_LIMIT_DEFER_SECS).await {
                    warn!("failed to defer job {}: {}", job.id, e);
                }
                return;
            }
        };

        let Some(entry) = claimed else {
            // Another path got there first, or the entry was cancelled or
            // deleted; either way the job is done.
            debug!(
                post = %payload.post_id, platform = %payload.platform,
                "entry not claimable, completing job"
            );
            if let Err(e) = self.queue.complete(&job.id).await {
                warn!("failed to complete job {}: {}", job.id, e);
            }
            return;
        };

        match self.publisher.execute_claimed(&entry).await {
            Ok(execution) => {
                let finish = match &execution.error {
                    None => {
                        info!(
                            post = %payload.post_id, platform = %payload.platform,
                            "published scheduled entry"
                        );
                        if let Err(e) = self.limiter.record(&self.db, payload.platform, now).await {
                            warn!("failed to record rate limit usage: {}", e);
                        }
                        self.queue.complete(&job.id).await
                    }
                    Some(err) => {
                        warn!(
                            post = %payload.post_id, platform = %payload.platform,
                            "publish attempt failed: {}", err
                        );
                        self.queue
                            .fail(&job, &err.to_string(), err.is_transient(), now)
                            .await
                    }
                };
                if let Err(e) = finish {
                    warn!("failed to record job outcome for {}: {}", job.id, e);
                }
            }
            Err(e) => {
                // Settle itself failed (content store unreachable mid-job).
                // The attempt may not be recorded; retry the job and let the
                // claim decide whether anything is left to do.
                error!(
                    post = %payload.post_id, platform = %payload.platform,
                    "settle failed: {}", e
                );
                if let Err(e) = self.queue.fail(&job, &e.to_string(), true, now).await {
                    warn!("failed to requeue job {}: {}", job.id, e);
                }
            }
        }
    }
}
