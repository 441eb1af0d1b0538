pub use self::parser::{
    CHANNEL_EMAIL, CHANNEL_LINE, CHANNEL_SLACK, Config, DatabaseConfig, EmailConfig,
    ExternalScraperConfig, LineConfig, LoggingConfig, NotifyConfig, ScraperConfig,
    SendGridConfig, SlackConfig, SmtpConfig, WorkerConfig,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;
