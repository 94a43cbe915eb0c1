//! Twitter/X publishing via the v2 API
//!
//! Text-only tweets; media upload is a separate pipeline upstream of this
//! core, so an image ref on the composed content is ignored here.

use async_trait::async_trait;
use secrecy::ExposeSecret;

use crate::credentials::Credentials;
use crate::error::PublishError;
use crate::platforms::{
    classify_status, transport_error, NormalizedContent, PlatformPublisher, PublishReceipt,
};
use crate::types::PlatformId;

const API_BASE: &str = "https://api.twitter.com/2";

pub struct TwitterPublisher {
    client: reqwest::Client,
    base: String,
}

impl TwitterPublisher {
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
impl PlatformPublisher for TwitterPublisher {
    fn platform(&self) -> PlatformId {
        PlatformId::Twitter
    }

    async fn publish(
        &self,
        creds: &Credentials,
        content: &NormalizedContent,
    ) -> Result<PublishReceipt, PublishError> {
        let response = self
            .client
            .post(format!("{}/tweets", self.base))
            .bearer_auth(creds.access_token.expose_secret())
            .json(&serde_json::json!({ "text": content.text }))
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
            PublishError::Network(format!("twitter returned unparseable body: {}", e))
        })?;
        let external_id = value["data"]["id"].as_str().ok_or_else(|| {
            PublishError::Network("twitter response carried no tweet id".to_string())
        })?;

        Ok(PublishReceipt {
            external_id: external_id.to_string(),
        })
    }
}
