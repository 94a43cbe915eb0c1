//! Facebook page publishing via the Graph API
//!
//! Text posts go to the page feed, image posts to the photos edge. The
//! page id comes from the credential's account ref and falls back to `me`.

use async_trait::async_trait;
use secrecy::ExposeSecret;

use crate::credentials::Credentials;
use crate::error::PublishError;
use crate::platforms::{
    classify_status, transport_error, NormalizedContent, PlatformPublisher, PublishReceipt,
};
use crate::types::PlatformId;

const GRAPH_BASE: &str = "https://graph.facebook.com/v19.0";

pub struct FacebookPublisher {
    client: reqwest::Client,
    base: String,
}

impl FacebookPublisher {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base(client, GRAPH_BASE)
    }

    pub fn with_base(client: reqwest::Client, base: impl Into<String>) -> Self {
        Self {
            client,
            base: base.into(),
        }
    }
}

#[async_trait]
impl PlatformPublisher for FacebookPublisher {
    fn platform(&self) -> PlatformId {
        PlatformId::Facebook
    }

    async fn publish(
        &self,
        creds: &Credentials,
        content: &NormalizedContent,
    ) -> Result<PublishReceipt, PublishError> {
        let target = creds.account_ref.as_deref().unwrap_or("me");
        let token = creds.access_token.expose_secret().to_string();

        let (url, params) = match &content.image_ref {
            Some(image) => (
                format!("{}/{}/photos", self.base, target),
                vec![
                    ("url", image.clone()),
                    ("caption", content.text.clone()),
                    ("access_token", token),
                ],
            ),
            None => (
                format!("{}/{}/feed", self.base, target),
                vec![("message", content.text.clone()), ("access_token", token)],
            ),
        };

        let response = self
            .client
            .post(&url)
            .form(&params)
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
            PublishError::Network(format!("facebook returned unparseable body: {}", e))
        })?;
        // Feed posts answer with `id`, photo posts with `post_id`.
        let external_id = value["post_id"]
            .as_str()
            .or_else(|| value["id"].as_str())
            .ok_or_else(|| {
                PublishError::Network("facebook response carried no post id".to_string())
            })?;

        Ok(PublishReceipt {
            external_id: external_id.to_string(),
        })
    }
}
