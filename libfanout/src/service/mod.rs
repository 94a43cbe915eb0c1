//! Service layer for Fanout
//!
//! A clean, testable API over the pipeline for the CLIs (or any other
//! frontend) to consume. `FanoutService` is the facade; the sub-services
//! share the same `Arc<Database>`/`Arc<JobQueue>`/`Arc<Publisher>`.
//!
//! Construction is where degradation happens: if the queue's backing store
//! cannot be opened, the service comes up queue-less and every new schedule
//! entry is left `pending` for the poll scheduler to discover.

pub mod calendar;
pub mod posts;
pub mod publishing;

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::Config;
use crate::credentials::CredentialProvider;
use crate::db::Database;
use crate::error::Result;
use crate::platforms::create_publishers;
use crate::publisher::Publisher;
use crate::queue::{JobQueue, QueueSettings};

use self::calendar::CalendarService;
use self::posts::PostService;
use self::publishing::PublishingService;

pub struct FanoutService {
    db: Arc<Database>,
    queue: Option<Arc<JobQueue>>,
    publisher: Arc<Publisher>,
    posts: PostService,
    publishing: PublishingService,
    calendar: CalendarService,
}

impl FanoutService {
    /// Build the full service stack from configuration.
    ///
    /// The credential provider is injected by the caller; nothing in here
    /// reaches for ambient credential state.
    pub async fn from_config(
        config: &Config,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        let db = Arc::new(Database::new(&config.database.path).await?);

        let publishers = create_publishers(&config.publisher)?;
        let publisher = Arc::new(Publisher::new(
            publishers,
            credentials,
            db.clone(),
            Duration::from_secs(config.publisher.request_timeout_secs),
        ));

        let queue = match JobQueue::connect(&config.queue.path, QueueSettings::from(&config.queue))
            .await
        {
            Ok(queue) => Some(Arc::new(queue)),
            Err(e) => {
                warn!(
                    "job queue store unavailable, scheduling falls back to polling: {}",
                    e
                );
                None
            }
        };

        Ok(Self::assemble(db, queue, publisher))
    }

    /// Wire a service from already-built parts (tests, custom stacks)
    pub fn assemble(
        db: Arc<Database>,
        queue: Option<Arc<JobQueue>>,
        publisher: Arc<Publisher>,
    ) -> Self {
        let posts = PostService::new(db.clone(), queue.clone());
        let publishing = PublishingService::new(db.clone(), publisher.clone());
        let calendar = CalendarService::new(db.clone());

        Self {
            db,
            queue,
            publisher,
            posts,
            publishing,
            calendar,
        }
    }

    pub fn posts(&self) -> &PostService {
        &self.posts
    }

    pub fn publishing(&self) -> &PublishingService {
        &self.publishing
    }

    pub fn calendar(&self) -> &CalendarService {
        &self.calendar
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn queue(&self) -> Option<&Arc<JobQueue>> {
        self.queue.as_ref()
    }

    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }
}
