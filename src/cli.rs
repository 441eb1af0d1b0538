use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::Config;
use crate::utils::duration::parse_duration;

#[derive(Parser, Debug)]
#[command(name = "akigura-worker")]
#[command(about = "Scrapes ground reservation sites and notifies teams of open slots", long_about = None)]
pub struct Cli {
    #[arg(short, long, env = "CONFIG_PATH", default_value = "config.yaml")]
    pub config: PathBuf,

    #[arg(long, help = "SQLite database path")]
    pub db: Option<String>,

    #[arg(long, help = "Script run for external scrapers")]
    pub scraper: Option<String>,

    #[arg(long, help = "Interpreter for the external scraper script")]
    pub python: Option<String>,

    #[arg(long, value_parser = parse_duration, help = "Scrape sweep interval, e.g. 15m")]
    pub interval: Option<Duration>,

    #[arg(long, value_parser = parse_duration, help = "Pending job poll interval")]
    pub job_interval: Option<Duration>,

    #[arg(long, value_parser = parse_duration, help = "Notification send interval")]
    pub notify_interval: Option<Duration>,

    #[arg(long, help = "Run one sweep and one notification pass, then exit")]
    pub once: bool,

    #[arg(long, conflicts_with = "once", help = "Run one notification pass, then exit")]
    pub notify_only: bool,

    #[arg(long, conflicts_with_all = ["once", "notify_only"], help = "Only poll for pending jobs and send notifications")]
    pub job_mode: bool,

    #[arg(long, help = "Log level or filter directive")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    NotifyOnly,
    Once,
    JobPoll,
    Daemon,
}

impl Cli {
    pub fn mode(&self) -> Mode {
        if self.notify_only {
            Mode::NotifyOnly
        } else if self.once {
            Mode::Once
        } else if self.job_mode {
            Mode::JobPoll
        } else {
            Mode::Daemon
        }
    }

    /// Flags win over the file and the environment.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(db) = &self.db {
            config.database.path = db.clone();
        }
        if let Some(script) = &self.scraper {
            config.scraper.external.script = script.clone();
        }
        if let Some(python) = &self.python {
            config.scraper.external.interpreter = python.clone();
        }
        if let Some(interval) = self.interval {
            config.worker.scrape_interval = interval;
        }
        if let Some(interval) = self.job_interval {
            config.worker.job_interval = interval;
        }
        if let Some(interval) = self.notify_interval {
            config.worker.notify_interval = interval;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}
