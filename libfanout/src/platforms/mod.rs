//! Platform publisher abstraction and implementations
//!
//! One implementation per supported platform family, behind a single trait.
//! Implementations stay thin: credential shape checks, one or two HTTP calls,
//! and normalization of every failure into the classified error taxonomy.
//! Everything platform-independent (composition, truncation, timeouts, the
//! metrics side effect) lives in [`crate::publisher`].

use async_trait::async_trait;

use crate::credentials::Credentials;
use crate::error::PublishError;
use crate::types::PlatformId;

pub mod facebook;
pub mod instagram;
pub mod linkedin;
pub mod twitter;

// Mock publisher is available for all builds (not just tests) so sandbox
// deployments and integration tests can run without real platform apps.
pub mod mock;

/// Composed, platform-ready content: one text blob plus an optional image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedContent {
    pub text: String,
    pub image_ref: Option<String>,
}

/// Successful publish: the platform's id for the created post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub external_id: String,
}

/// One external platform family's publish capability.
///
/// `publish` is the opaque wire call; the adapter wraps it with composition,
/// timeout, and lifecycle recording.
#[async_trait]
pub trait PlatformPublisher: Send + Sync {
    fn platform(&self) -> PlatformId;

    /// Cheap credential shape check, run before any network traffic.
    ///
    /// The default requires a non-empty access token; platforms with more
    /// specific needs (linked account ids, URNs) tighten it.
    fn check_credentials(&self, creds: &Credentials) -> Result<(), PublishError> {
        use secrecy::ExposeSecret;
        if creds.access_token.expose_secret().is_empty() {
            return Err(PublishError::CredentialsMissing(format!(
                "empty access token for {}",
                self.platform()
            )));
        }
        Ok(())
    }

    /// Whether this platform's tokens expire and support inline refresh
    fn token_expires(&self) -> bool {
        false
    }

    /// Exchange an expired credential for a fresh one.
    ///
    /// Default is a pass-through; refresh flows that need app-level secrets
    /// belong to the embedding application.
    async fn refresh(&self, creds: &Credentials) -> Result<Credentials, PublishError> {
        Ok(creds.clone())
    }

    async fn publish(
        &self,
        creds: &Credentials,
        content: &NormalizedContent,
    ) -> Result<PublishReceipt, PublishError>;
}

/// Build the publisher set for a configuration.
///
/// Sandbox mode swaps every platform for a succeeding mock, which is how
/// integration environments run without real platform apps.
pub fn create_publishers(
    config: &crate::config::PublisherConfig,
) -> crate::error::Result<Vec<Box<dyn PlatformPublisher>>> {
    if config.sandbox {
        return Ok(PlatformId::ALL
            .into_iter()
            .map(|p| Box::new(mock::MockPublisher::succeeding(p)) as Box<dyn PlatformPublisher>)
            .collect());
    }

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
        .user_agent(concat!("fanout/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| PublishError::Network(format!("failed to build http client: {}", e)))?;

    Ok(vec![
        Box::new(facebook::FacebookPublisher::new(client.clone())),
        Box::new(instagram::InstagramPublisher::new(client.clone())),
        Box::new(twitter::TwitterPublisher::new(client.clone())),
        Box::new(linkedin::LinkedinPublisher::new(client)),
    ])
}

/// Map an HTTP status class onto the error taxonomy
pub(crate) fn classify_status(platform: PlatformId, status: u16, body: &str) -> PublishError {
    let detail = format!("{} returned {}: {}", platform, status, snippet(body));
    match status {
        401 => PublishError::CredentialsMissing(detail),
        403 => PublishError::PermissionDenied(detail),
        404 => PublishError::NotFound(detail),
        429 => PublishError::RateLimited(detail),
        s if s >= 500 => PublishError::Network(detail),
        _ => PublishError::Network(detail),
    }
}

/// Map a transport-level failure onto the taxonomy
pub(crate) fn transport_error(platform: PlatformId, err: &reqwest::Error) -> PublishError {
    if err.is_timeout() {
        PublishError::Network(format!("{} request timed out", platform))
    } else {
        PublishError::Network(format!("{} request failed: {}", platform, err))
    }
}

/// First part of a response body, for error messages
pub(crate) fn snippet(body: &str) -> String {
    const MAX: usize = 200;
    if body.chars().count() <= MAX {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX).collect();
        format!("{}...", cut)
    }
}
