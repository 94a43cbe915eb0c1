//! Instagram business publishing via the Graph API
//!
//! Two-step flow: create a media container, then publish it. Requires a
//! linked business account id and an image reference; caption-only posts are
//! not a thing Instagram accepts.

use async_trait::async_trait;
use secrecy::ExposeSecret;

use crate::credentials::Credentials;
use crate::error::PublishError;
use crate::platforms::{
    classify_status, transport_error, NormalizedContent, PlatformPublisher, PublishReceipt,
};
use crate::types::PlatformId;

const GRAPH_BASE: &str = "https://graph.facebook.com/v19.0";

pub struct InstagramPublisher {
    client: reqwest::Client,
    base: String,
}

impl InstagramPublisher {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base(client, GRAPH_BASE)
    }

    pub fn with_base(client: reqwest::Client, base: impl Into<String>) -> Self {
        Self {
            client,
            base: base.into(),
        }
    }

    async fn graph_post(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<String, PublishError> {
        let response = self
            .client
            .post(url)
            .form(params)
            .send()
            .await
            .map_err(|e| transport_error(self.platform(), &e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(self.platform(), &e))?;

        if !(200..300).contains(&status) {
            return Err(classify_status(self.platform(), status, &body));
        }

        let value: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
            PublishError::Network(format!("instagram returned unparseable body: {}", e))
        })?;
        value["id"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| PublishError::Network("instagram response carried no id".to_string()))
    }
}

#[async_trait]
impl PlatformPublisher for InstagramPublisher {
    fn platform(&self) -> PlatformId {
        PlatformId::Instagram
    }

    fn check_credentials(&self, creds: &Credentials) -> Result<(), PublishError> {
        if creds.access_token.expose_secret().is_empty() {
            return Err(PublishError::CredentialsMissing(
                "empty access token for instagram".to_string(),
            ));
        }
        if creds.account_ref.is_none() {
            return Err(PublishError::CredentialsMissing(
                "instagram requires a linked business account id".to_string(),
            ));
        }
        Ok(())
    }

    async fn publish(
        &self,
        creds: &Credentials,
        content: &NormalizedContent,
    ) -> Result<PublishReceipt, PublishError> {
        let account = creds.account_ref.as_deref().ok_or_else(|| {
            PublishError::CredentialsMissing(
                "instagram requires a linked business account id".to_string(),
            )
        })?;
        let image = content.image_ref.as_deref().ok_or_else(|| {
            PublishError::Unsupported("instagram posts require an image reference".to_string())
        })?;
        let token = creds.access_token.expose_secret().to_string();

        let container = self
            .graph_post(
                &format!("{}/{}/media", self.base, account),
                &[
                    ("image_url", image.to_string()),
                    ("caption", content.text.clone()),
                    ("access_token", token.clone()),
                ],
            )
            .await?;

        let external_id = self
            .graph_post(
                &format!("{}/{}/media_publish", self.base, account),
                &[("creation_id", container), ("access_token", token)],
            )
            .await?;

        Ok(PublishReceipt { external_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_check_requires_account_ref() {
        let publisher = InstagramPublisher::new(reqwest::Client::new());

        let bare = Credentials::new("token");
        assert!(matches!(
            publisher.check_credentials(&bare),
            Err(PublishError::CredentialsMissing(_))
        ));

        let linked = Credentials::new("token").with_account_ref("1784");
        assert!(publisher.check_credentials(&linked).is_ok());
    }
}
