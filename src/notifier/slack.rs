use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::{Notifier, NotifyError, SlotDigest, format};
use crate::config::CHANNEL_SLACK;

/// Slack incoming webhook posting block-kit messages.
pub struct SlackNotifier {
    http: reqwest::Client,
    webhook_url: SecretString,
}

impl SlackNotifier {
    pub fn new(http: reqwest::Client, webhook_url: SecretString) -> Self {
        Self { http, webhook_url }
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn channel(&self) -> &str {
        CHANNEL_SLACK
    }

    async fn send(&self, digest: &SlotDigest) -> Result<(), NotifyError> {
        if digest.slots.is_empty() {
            return Ok(());
        }
        let url = self.webhook_url.expose_secret();
        if url.is_empty() {
            return Err(NotifyError::NotConfigured("Slack webhook URL".to_string()));
        }

        let response = self
            .http
            .post(url)
            .json(&format::slack_blocks(digest))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status {
                channel: CHANNEL_SLACK,
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
