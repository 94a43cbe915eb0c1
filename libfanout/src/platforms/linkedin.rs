//! LinkedIn publishing via the UGC posts API
//!
//! The author URN comes from the credential's account ref. The created
//! post id is returned in the `x-restli-id` header (body `id` as fallback).

use async_trait::async_trait;
use secrecy::ExposeSecret;

use crate::credentials::Credentials;
use crate::error::PublishError;
use crate::platforms::{
    classify_status, transport_error, NormalizedContent, PlatformPublisher, PublishReceipt,
};
use crate::types::PlatformId;

const API_BASE: &str = "https://api.linkedin.com/v2";

pub struct LinkedinPublisher {
    client: reqwest::Client,
    base: String,
}

impl LinkedinPublisher {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base(client, API_BASE)
    }

    pub fn with_base(client: reqwest::Client, base: impl Into<String>) -> Self {
        Self {
            client,
            base: base.into(),
        }
    }
}

#[async_trait]
impl PlatformPublisher for LinkedinPublisher {
    fn platform(&self) -> PlatformId {
        PlatformId::Linkedin
    }

    fn check_credentials(&self, creds: &Credentials) -> Result<(), PublishError> {
        if creds.access_token.expose_secret().is_empty() {
            return Err(PublishError::CredentialsMissing(
                "empty access token for linkedin".to_string(),
            ));
        }
        if creds.account_ref.is_none() {
            return Err(PublishError::CredentialsMissing(
                "linkedin requires an author urn".to_string(),
            ));
        }
        Ok(())
    }

    async fn publish(
        &self,
        creds: &Credentials,
        content: &NormalizedContent,
    ) -> Result<PublishReceipt, PublishError> {
        let author = creds.account_ref.as_deref().ok_or_else(|| {
            PublishError::CredentialsMissing("linkedin requires an author urn".to_string())
        })?;

        let body = serde_json::json!({
            "author": author,
            "lifecycleState": "PUBLISHED",
            "specificContent": {
                "com.linkedin.ugc.ShareContent": {
                    "shareCommentary": { "text": content.text },
                    "shareMediaCategory": "NONE"
                }
            },
            "visibility": {
                "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC"
            }
        });

        let response = self
            .client
            .post(format!("{}/ugcPosts", self.base))
            .bearer_auth(creds.access_token.expose_secret())
            .header("X-Restli-Protocol-Version", "2.0.0")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(self.platform(), &e))?;

        let status = response.status().as_u16();
        let header_id = response
            .headers()
            .get("x-restli-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(self.platform(), &e))?;

        if !(200..300).contains(&status) {
            return Err(classify_status(self.platform(), status, &text));
        }

        let external_id = header_id
            .or_else(|| {
                serde_json::from_str::<serde_json::Value>(&text)
                    .ok()
                    .and_then(|v| v["id"].as_str().map(|s| s.to_string()))
            })
            .ok_or_else(|| {
                PublishError::Network("linkedin response carried no post id".to_string())
            })?;

        Ok(PublishReceipt { external_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_check_requires_author_urn() {
        let publisher = LinkedinPublisher::new(reqwest::Client::new());

        let bare = Credentials::new("token");
        assert!(matches!(
            publisher.check_credentials(&bare),
            Err(PublishError::CredentialsMissing(_))
        ));

        let with_urn = Credentials::new("token").with_account_ref("urn:li:person:abc");
        assert!(publisher.check_credentials(&with_urn).is_ok());
    }
}
