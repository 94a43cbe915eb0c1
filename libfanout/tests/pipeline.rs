//! Cross-component pipeline tests
//!
//! The properties that only show up when the pieces run together: both
//! execution paths racing over one entry, the queue store failing away and
//! the pipeline degrading to poll-only, and the full schedule-to-summary
//! flow through the service facade.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use libfanout::credentials::{Credentials, MemoryCredentialStore};
use libfanout::platforms::mock::MockPublisher;
use libfanout::rate_limiter::RateLimiter;
use libfanout::service::posts::ScheduleRequest;
use libfanout::service::FanoutService;
use libfanout::{
    Database, EntryStatus, JobPayload, JobQueue, PlatformId, PollScheduler, Post, Publisher,
    QueueSettings, SchedulerSettings, WorkerPool,
};

struct Pipeline {
    db: Arc<Database>,
    queue: Arc<JobQueue>,
    creds: Arc<MemoryCredentialStore>,
    scheduler: PollScheduler,
    workers: WorkerPool,
}

async fn pipeline(mock: MockPublisher) -> Pipeline {
    let db = Arc::new(Database::new(":memory:").await.unwrap());
    let queue = Arc::new(
        JobQueue::connect(":memory:", QueueSettings::default())
            .await
            .unwrap(),
    );
    let creds = Arc::new(MemoryCredentialStore::new());
    let publisher = Arc::new(Publisher::new(
        vec![Box::new(mock)],
        creds.clone(),
        db.clone(),
        Duration::from_secs(5),
    ));
    let limiter = Arc::new(RateLimiter::new(BTreeMap::new()));

    let scheduler = PollScheduler::new(
        db.clone(),
        publisher.clone(),
        limiter.clone(),
        SchedulerSettings::default(),
    );
    let workers = WorkerPool::new(queue.clone(), db.clone(), publisher, limiter, 60);

    Pipeline {
        db,
        queue,
        creds,
        scheduler,
        workers,
    }
}

async fn due_scheduled_post(p: &Pipeline, platform: PlatformId) -> (Post, i64) {
    let mut blocks = serde_json::Map::new();
    blocks.insert(
        platform.as_str().to_string(),
        serde_json::json!({ "caption": "race me" }),
    );
    let post = Post::new("user-1", serde_json::Value::Object(blocks));
    p.db.create_post(&post).await.unwrap();

    let scheduled_at = chrono::Utc::now().timestamp() - 1;
    let entry = p
        .db
        .add_schedule_entry(&post.id, platform, scheduled_at)
        .await
        .unwrap();
    let job_ref = p
        .queue
        .enqueue(
            &JobPayload {
                post_id: post.id.clone(),
                platform,
                scheduled_at,
            },
            scheduled_at,
        )
        .await
        .unwrap();
    p.db.set_entry_queued(entry.id, &job_ref).await.unwrap();
    (post, entry.id)
}

#[tokio::test]
async fn racing_paths_publish_exactly_once() {
    let p = pipeline(MockPublisher::succeeding(PlatformId::Facebook)).await;
    p.creds
        .insert("user-1", PlatformId::Facebook, Credentials::new("token"))
        .await;
    let (post, entry_id) = due_scheduled_post(&p, PlatformId::Facebook).await;

    // Poll tick and queue worker go for the same due entry at once.
    let (tick, drained) = tokio::join!(p.scheduler.tick(), p.workers.drain_once());
    tick.unwrap();
    drained.unwrap();

    // Exactly one claim won, exactly one terminal attempt exists.
    let entry = p.db.entry(entry_id).await.unwrap().unwrap();
    assert_eq!(entry.status, EntryStatus::Posted);
    assert_eq!(p.db.attempts(entry_id).await.unwrap().len(), 1);

    let loaded = p.db.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(loaded.publish_summary.published.len(), 1);

    // The job is finished either way: completed by the worker whether it
    // won (published) or lost (skipped).
    let stats = p.queue.stats().await.unwrap();
    assert_eq!(stats.queued + stats.active, 0);
}

#[tokio::test]
async fn repeated_racing_rounds_never_double_publish() {
    let p = pipeline(MockPublisher::succeeding(PlatformId::Twitter)).await;
    p.creds
        .insert("user-1", PlatformId::Twitter, Credentials::new("token"))
        .await;

    for _ in 0..5 {
        let (_, entry_id) = due_scheduled_post(&p, PlatformId::Twitter).await;
        let (tick, drained) = tokio::join!(p.scheduler.tick(), p.workers.drain_once());
        tick.unwrap();
        drained.unwrap();
        assert_eq!(p.db.attempts(entry_id).await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn status_path_is_monotonic_through_the_full_flow() {
    let p = pipeline(MockPublisher::succeeding(PlatformId::Facebook)).await;
    p.creds
        .insert("user-1", PlatformId::Facebook, Credentials::new("token"))
        .await;

    let post = Post::new(
        "user-1",
        serde_json::json!({ "facebook": { "caption": "steps" } }),
    );
    p.db.create_post(&post).await.unwrap();

    let scheduled_at = chrono::Utc::now().timestamp() - 1;
    let entry = p
        .db
        .add_schedule_entry(&post.id, PlatformId::Facebook, scheduled_at)
        .await
        .unwrap();
    assert_eq!(entry.status, EntryStatus::Pending);

    let job_ref = p
        .queue
        .enqueue(
            &JobPayload {
                post_id: post.id.clone(),
                platform: PlatformId::Facebook,
                scheduled_at,
            },
            scheduled_at,
        )
        .await
        .unwrap();
    p.db.set_entry_queued(entry.id, &job_ref).await.unwrap();
    assert_eq!(
        p.db.entry(entry.id).await.unwrap().unwrap().status,
        EntryStatus::Queued
    );

    p.workers.drain_once().await.unwrap();
    assert_eq!(
        p.db.entry(entry.id).await.unwrap().unwrap().status,
        EntryStatus::Posted
    );

    // Terminal: nothing claims it again.
    assert!(!p.db.claim_entry(entry.id).await.unwrap());
}

#[tokio::test]
async fn queue_store_failure_degrades_to_poll_only() {
    // A queue path whose parent cannot be a directory.
    let bad_queue = JobQueue::connect("/dev/null/queue.db", QueueSettings::default()).await;
    assert!(bad_queue.is_err());

    // The same condition at the service level: scheduling still works, the
    // entry just stays pending for the poll path.
    let db = Arc::new(Database::new(":memory:").await.unwrap());
    let creds = Arc::new(MemoryCredentialStore::new());
    creds
        .insert("user-1", PlatformId::Facebook, Credentials::new("token"))
        .await;
    let publisher = Arc::new(Publisher::new(
        vec![Box::new(MockPublisher::succeeding(PlatformId::Facebook))],
        creds.clone(),
        db.clone(),
        Duration::from_secs(5),
    ));
    let service = FanoutService::assemble(db.clone(), None, publisher.clone());
    assert!(service.queue().is_none());

    let (_, entries) = service
        .posts()
        .create(
            "user-1",
            serde_json::json!({ "facebook": { "caption": "fallback" } }),
            vec![ScheduleRequest {
                platform: PlatformId::Facebook,
                scheduled_at: chrono::Utc::now().timestamp() - 1,
            }],
        )
        .await
        .unwrap();
    assert_eq!(entries[0].status, EntryStatus::Pending);

    // The poll scheduler is the sole execution path and finishes the job.
    let limiter = Arc::new(RateLimiter::new(BTreeMap::new()));
    let scheduler = PollScheduler::new(
        db.clone(),
        publisher,
        limiter,
        SchedulerSettings::default(),
    );
    assert_eq!(scheduler.tick().await.unwrap(), 1);
    assert_eq!(
        db.entry(entries[0].id).await.unwrap().unwrap().status,
        EntryStatus::Posted
    );
}

#[tokio::test]
async fn service_flow_schedule_cancel_skip() {
    let p = pipeline(MockPublisher::succeeding(PlatformId::Facebook)).await;
    p.creds
        .insert("user-1", PlatformId::Facebook, Credentials::new("token"))
        .await;

    let service = FanoutService::assemble(
        p.db.clone(),
        Some(p.queue.clone()),
        Arc::new(Publisher::new(
            vec![Box::new(MockPublisher::succeeding(PlatformId::Facebook))],
            p.creds.clone(),
            p.db.clone(),
            Duration::from_secs(5),
        )),
    );

    let (post, entries) = service
        .posts()
        .create(
            "user-1",
            serde_json::json!({ "facebook": { "caption": "cancel me" } }),
            vec![ScheduleRequest {
                platform: PlatformId::Facebook,
                scheduled_at: chrono::Utc::now().timestamp() - 1,
            }],
        )
        .await
        .unwrap();

    assert!(service
        .posts()
        .cancel(&post.id, "user-1", entries[0].id)
        .await
        .unwrap());

    // Neither path touches the cancelled entry.
    let (tick, drained) = tokio::join!(p.scheduler.tick(), p.workers.drain_once());
    assert_eq!(tick.unwrap(), 0);
    drained.unwrap();

    let entry = p.db.entry(entries[0].id).await.unwrap().unwrap();
    assert_eq!(entry.status, EntryStatus::Cancelled);
    assert!(p.db.attempts(entries[0].id).await.unwrap().is_empty());

    let summary = service.posts().summary(&post.id).await.unwrap().unwrap();
    assert!(!summary.is_live_anywhere());
}
