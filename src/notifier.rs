//! Outbound notification channels and the pending-notification sender.

pub mod email;
pub mod format;
pub mod line;
pub mod sender;
pub mod slack;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

pub use self::email::EmailNotifier;
pub use self::line::LineNotifier;
pub use self::sender::{NotificationSender, SendSummary};
pub use self::slack::SlackNotifier;
use crate::config::NotifyConfig;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{channel} returned status {status}: {body}")]
    Status {
        channel: &'static str,
        status: u16,
        body: String,
    },

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("channel not configured: {0}")]
    NotConfigured(String),
}

/// One slot line inside a digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSummary {
    pub slot_date: String,
    pub time_from: String,
    pub time_to: String,
    pub court_name: String,
    pub ground_name: String,
    pub reservation_url: Option<String>,
}

impl SlotSummary {
    pub fn time_range(&self) -> String {
        format!("{}-{}", self.time_from, self.time_to)
    }
}

/// Everything one team should hear about on one channel, in one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDigest {
    pub team_id: String,
    pub team_name: String,
    pub team_email: String,
    pub channel: String,
    pub slots: Vec<SlotSummary>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> &str;
    async fn send(&self, digest: &SlotDigest) -> Result<(), NotifyError>;
}

/// Notifiers keyed by channel name.
#[derive(Default, Clone)]
pub struct NotifierSet {
    notifiers: HashMap<String, Arc<dyn Notifier>>,
}

impl NotifierSet {
    /// Email is always available; LINE and Slack only with credentials.
    pub fn from_config(config: &NotifyConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("akigura-worker/", env!("CARGO_PKG_VERSION")))
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed to construct HTTP client")?;

        let mut set = Self::default();
        let email = EmailNotifier::from_config(&config.email, http.clone())
            .context("failed to configure email notifier")?;
        debug!(transport = email.transport_name(), "Email notifier configured");
        set.register(Arc::new(email));
        if let Some(line) = &config.line {
            set.register(Arc::new(LineNotifier::new(http.clone(), line.token.clone())));
        }
        if let Some(slack) = &config.slack {
            set.register(Arc::new(SlackNotifier::new(http, slack.webhook_url.clone())));
        }
        info!(channels = ?set.channels(), "Notification channels ready");
        Ok(set)
    }

    pub fn register(&mut self, notifier: Arc<dyn Notifier>) {
        self.notifiers
            .insert(notifier.channel().to_string(), notifier);
    }

    pub fn get(&self, channel: &str) -> Option<Arc<dyn Notifier>> {
        self.notifiers.get(channel).cloned()
    }

    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.notifiers.keys().cloned().collect();
        channels.sort();
        channels
    }
}
