//! Mock publisher for tests and sandbox deployments
//!
//! Configurable success, classified failure, artificial latency, and an
//! expiring-token mode that exercises the adapter's inline refresh path.
//! Call counters and captured content let tests assert on what actually
//! crossed the publish boundary.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::credentials::Credentials;
use crate::error::PublishError;
use crate::platforms::{NormalizedContent, PlatformPublisher, PublishReceipt};
use crate::types::PlatformId;

#[derive(Clone)]
pub struct MockPublisher {
    platform: PlatformId,
    fail_with: Option<PublishError>,
    delay: Duration,
    expires: bool,
    refreshed_token: Option<String>,
    publish_calls: Arc<Mutex<usize>>,
    refresh_calls: Arc<Mutex<usize>>,
    published: Arc<Mutex<Vec<NormalizedContent>>>,
}

impl MockPublisher {
    fn base(platform: PlatformId) -> Self {
        Self {
            platform,
            fail_with: None,
            delay: Duration::ZERO,
            expires: false,
            refreshed_token: None,
            publish_calls: Arc::new(Mutex::new(0)),
            refresh_calls: Arc::new(Mutex::new(0)),
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A publisher that always succeeds
    pub fn succeeding(platform: PlatformId) -> Self {
        Self::base(platform)
    }

    /// A publisher that always fails with the given classification
    pub fn failing(platform: PlatformId, error: PublishError) -> Self {
        Self {
            fail_with: Some(error),
            ..Self::base(platform)
        }
    }

    /// A publisher whose external call takes `delay` to complete
    pub fn with_delay(platform: PlatformId, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::base(platform)
        }
    }

    /// A publisher whose tokens expire; `refresh` hands out `fresh_token`
    pub fn expiring(platform: PlatformId, fresh_token: &str) -> Self {
        Self {
            expires: true,
            refreshed_token: Some(fresh_token.to_string()),
            ..Self::base(platform)
        }
    }

    pub fn publish_calls(&self) -> usize {
        *self.publish_calls.lock().unwrap()
    }

    pub fn refresh_calls(&self) -> usize {
        *self.refresh_calls.lock().unwrap()
    }

    pub fn published(&self) -> Vec<NormalizedContent> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformPublisher for MockPublisher {
    fn platform(&self) -> PlatformId {
        self.platform
    }

    fn token_expires(&self) -> bool {
        self.expires
    }

    async fn refresh(&self, creds: &Credentials) -> Result<Credentials, PublishError> {
        *self.refresh_calls.lock().unwrap() += 1;
        match &self.refreshed_token {
            Some(token) => {
                let mut fresh = Credentials::new(token.clone())
                    .with_expiry(chrono::Utc::now().timestamp() + 3600);
                fresh.account_ref = creds.account_ref.clone();
                Ok(fresh)
            }
            None => Ok(creds.clone()),
        }
    }

    async fn publish(
        &self,
        _creds: &Credentials,
        content: &NormalizedContent,
    ) -> Result<PublishReceipt, PublishError> {
        *self.publish_calls.lock().unwrap() += 1;

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }

        self.published.lock().unwrap().push(content.clone());
        Ok(PublishReceipt {
            external_id: format!("{}-mock-{}", self.platform, uuid::Uuid::new_v4()),
        })
    }
}
