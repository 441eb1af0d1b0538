use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::{Notifier, NotifyError, SlotDigest, format};
use crate::config::CHANNEL_LINE;

const LINE_NOTIFY_ENDPOINT: &str = "https://notify-api.line.me/api/notify";

/// LINE Notify, one token per deployment.
pub struct LineNotifier {
    http: reqwest::Client,
    token: SecretString,
}

impl LineNotifier {
    pub fn new(http: reqwest::Client, token: SecretString) -> Self {
        Self { http, token }
    }
}

#[async_trait]
impl Notifier for LineNotifier {
    fn channel(&self) -> &str {
        CHANNEL_LINE
    }

    async fn send(&self, digest: &SlotDigest) -> Result<(), NotifyError> {
        if digest.slots.is_empty() {
            return Ok(());
        }
        if self.token.expose_secret().is_empty() {
            return Err(NotifyError::NotConfigured("LINE Notify token".to_string()));
        }

        let message = format::line_message(digest);
        let response = self
            .http
            .post(LINE_NOTIFY_ENDPOINT)
            .bearer_auth(self.token.expose_secret())
            .form(&[("message", message.as_str())])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status {
                channel: CHANNEL_LINE,
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
