use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use super::ConfigError;
use crate::utils::duration::serde_duration;

pub const CHANNEL_EMAIL: &str = "email";
pub const CHANNEL_LINE: &str = "line";
pub const CHANNEL_SLACK: &str = "slack";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_scrape_interval", with = "serde_duration")]
    pub scrape_interval: Duration,
    #[serde(default = "default_job_interval", with = "serde_duration")]
    pub job_interval: Duration,
    #[serde(default = "default_notify_interval", with = "serde_duration")]
    pub notify_interval: Duration,
    #[serde(default = "default_job_batch_size")]
    pub job_batch_size: i64,
    #[serde(default = "default_notification_batch_size")]
    pub notification_batch_size: i64,
    #[serde(default = "default_match_window_hours")]
    pub match_window_hours: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scrape_interval: default_scrape_interval(),
            job_interval: default_job_interval(),
            notify_interval: default_notify_interval(),
            job_batch_size: default_job_batch_size(),
            notification_batch_size: default_notification_batch_size(),
            match_window_hours: default_match_window_hours(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScraperConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_long_request_timeout_secs")]
    pub long_request_timeout_secs: u64,
    #[serde(default = "default_horizon_days")]
    pub horizon_days: u32,
    #[serde(default)]
    pub external: ExternalScraperConfig,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            long_request_timeout_secs: default_long_request_timeout_secs(),
            horizon_days: default_horizon_days(),
            external: ExternalScraperConfig::default(),
        }
    }
}

impl ScraperConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn long_request_timeout(&self) -> Duration {
        Duration::from_secs(self.long_request_timeout_secs)
    }
}

/// A scraper implemented outside this binary, invoked as
/// `<interpreter> <script> <site>` and expected to print one JSON result.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalScraperConfig {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub sites: Vec<String>,
}

impl Default for ExternalScraperConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            script: String::new(),
            sites: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_channel")]
    pub default_channel: String,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub line: Option<LineConfig>,
    #[serde(default)]
    pub slack: Option<SlackConfig>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            default_channel: default_channel(),
            email: EmailConfig::default(),
            line: None,
            slack: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EmailConfig {
    #[serde(default = "default_from_address")]
    pub from_address: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
    #[serde(default)]
    pub sendgrid: Option<SendGridConfig>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            from_address: default_from_address(),
            from_name: default_from_name(),
            smtp: None,
            sendgrid: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_host")]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

#[derive(Debug, Deserialize)]
pub struct SendGridConfig {
    pub api_key: SecretString,
}

#[derive(Debug, Deserialize)]
pub struct LineConfig {
    pub token: SecretString,
}

#[derive(Debug, Deserialize)]
pub struct SlackConfig {
    pub webhook_url: SecretString,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Loads `path` if it exists, otherwise starts from defaults. Environment
    /// overrides are applied in both cases.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::parse(&std::fs::read_to_string(path)?)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub(crate) fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = lookup("DATABASE_PATH") {
            self.database.path = value;
        }

        let email = &mut self.notify.email;
        if let Some(value) = lookup("SMTP_FROM") {
            email.from_address = value;
        }
        if let Some(value) = lookup("SMTP_FROM_NAME") {
            email.from_name = value;
        }
        if let (Some(username), Some(password)) = (lookup("SMTP_USER"), lookup("SMTP_PASSWORD")) {
            email.smtp = Some(SmtpConfig {
                host: lookup("SMTP_HOST").unwrap_or_else(default_smtp_host),
                port: lookup("SMTP_PORT")
                    .and_then(|port| port.parse().ok())
                    .unwrap_or_else(default_smtp_port),
                username,
                password: SecretString::from(password),
            });
        }
        if let Some(value) = lookup("SENDGRID_API_KEY") {
            email.sendgrid = Some(SendGridConfig {
                api_key: SecretString::from(value),
            });
        }

        if let Some(value) = lookup("LINE_NOTIFY_TOKEN") {
            self.notify.line = Some(LineConfig {
                token: SecretString::from(value),
            });
        }
        if let Some(value) = lookup("SLACK_WEBHOOK_URL") {
            self.notify.slack = Some(SlackConfig {
                webhook_url: SecretString::from(value),
            });
        }
    }
}

fn default_database_path() -> String {
    "../control-plane/db.sqlite3".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    1000
}

fn default_scrape_interval() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_job_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_notify_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_job_batch_size() -> i64 {
    10
}

fn default_notification_batch_size() -> i64 {
    500
}

fn default_match_window_hours() -> i64 {
    24
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_long_request_timeout_secs() -> u64 {
    60
}

fn default_horizon_days() -> u32 {
    60
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_channel() -> String {
    CHANNEL_EMAIL.to_string()
}

fn default_from_address() -> String {
    "noreply@akigura.jp".to_string()
}

fn default_from_name() -> String {
    "AkiGura".to_string()
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
