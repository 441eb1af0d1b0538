use std::time::Duration;

use thiserror::Error;

use super::parser::{CHANNEL_EMAIL, CHANNEL_LINE, CHANNEL_SLACK, Config};

const MIN_SCRAPE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "database.path cannot be empty".to_string(),
            ));
        }

        if self.worker.scrape_interval < MIN_SCRAPE_INTERVAL {
            return Err(ConfigError::InvalidConfig(
                "worker.scrape_interval must be at least 1 minute".to_string(),
            ));
        }

        if self.worker.job_interval.is_zero() || self.worker.notify_interval.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "worker.job_interval and worker.notify_interval must be positive".to_string(),
            ));
        }

        if self.worker.job_batch_size <= 0 || self.worker.notification_batch_size <= 0 {
            return Err(ConfigError::InvalidConfig(
                "worker batch sizes must be positive".to_string(),
            ));
        }

        if self.worker.match_window_hours <= 0 {
            return Err(ConfigError::InvalidConfig(
                "worker.match_window_hours must be positive".to_string(),
            ));
        }

        if !self.scraper.external.sites.is_empty()
            && self.scraper.external.script.trim().is_empty()
        {
            return Err(ConfigError::InvalidConfig(
                "scraper.external.script is required when external sites are listed".to_string(),
            ));
        }

        if let Some(smtp) = &self.notify.email.smtp {
            if smtp.port == 0 {
                return Err(ConfigError::InvalidConfig(
                    "notify.email.smtp.port must be between 1 and 65535".to_string(),
                ));
            }
        }

        match self.notify.default_channel.as_str() {
            CHANNEL_EMAIL | CHANNEL_LINE | CHANNEL_SLACK => Ok(()),
            other => Err(ConfigError::InvalidConfig(format!(
                "notify.default_channel must be one of email, line, slack (got {other:?})"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_short_scrape_interval() {
        let config = Config::parse("worker:\n  scrape_interval: 30s\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn validate_rejects_external_sites_without_script() {
        let config = Config::parse("scraper:\n  external:\n    sites: [ayase]\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_channel() {
        let config = Config::parse("notify:\n  default_channel: fax\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_batch_size() {
        let config = Config::parse("worker:\n  job_batch_size: 0\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(message)) if message.contains("batch")
        ));
    }

    #[test]
    fn validate_rejects_empty_database_path() {
        let config = Config::parse("database:\n  path: \"  \"\n").unwrap();
        assert!(config.validate().is_err());
    }
}
