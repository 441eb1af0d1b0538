use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod external;
pub mod hiratsuka;
pub mod kanagawa;
pub mod registry;
pub mod session;
pub mod yokohama;

pub use self::registry::Registry;
pub use self::session::{Session, StepError};

/// Court names containing any of these are not adult baseball/softball fields.
pub const EXCLUDED_PATTERNS: &[&str] = &[
    "少年",
    "サッカー",
    "テニス",
    "ラグビー",
    "フットサル",
    "体育館",
    "プール",
    "投球練習",
    "会議室",
];

pub fn should_exclude(court_name: &str) -> bool {
    EXCLUDED_PATTERNS
        .iter()
        .any(|pattern| court_name.contains(pattern))
}

/// First 20 characters of a session token, enough to tell sessions apart in logs.
pub fn truncate_token(token: &str) -> String {
    let head: String = token.chars().take(20).collect();
    format!("{head}...")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum ScrapeStatus {
    Success,
    SuccessNoSlots,
    NetworkError,
    ParseError,
    UnknownError,
    /// The scraper itself failed before producing a result.
    ExecutionError,
}

impl ScrapeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeStatus::Success => "success",
            ScrapeStatus::SuccessNoSlots => "success_no_slots",
            ScrapeStatus::NetworkError => "network_error",
            ScrapeStatus::ParseError => "parse_error",
            ScrapeStatus::UnknownError => "unknown_error",
            ScrapeStatus::ExecutionError => "execution_error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ScrapeStatus::Success | ScrapeStatus::SuccessNoSlots)
    }
}

impl From<String> for ScrapeStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "success" => ScrapeStatus::Success,
            "success_no_slots" => ScrapeStatus::SuccessNoSlots,
            "network_error" => ScrapeStatus::NetworkError,
            "parse_error" => ScrapeStatus::ParseError,
            "execution_error" => ScrapeStatus::ExecutionError,
            _ => ScrapeStatus::UnknownError,
        }
    }
}

impl fmt::Display for ScrapeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One available window as read from a site. Dates are `YYYY-MM-DD`, times `HH:MM`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedSlot {
    pub date: String,
    pub time_from: String,
    pub time_to: String,
    pub court_name: String,
    #[serde(default)]
    pub raw_text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScrapeResult {
    pub success: bool,
    pub status: ScrapeStatus,
    pub error: String,
    pub slots: Vec<ScrapedSlot>,
    pub diagnostics: Map<String, Value>,
    pub scraped_at: DateTime<Utc>,
}

impl Default for ScrapeResult {
    fn default() -> Self {
        Self::started()
    }
}

impl ScrapeResult {
    pub fn started() -> Self {
        Self {
            success: false,
            status: ScrapeStatus::UnknownError,
            error: String::new(),
            slots: Vec::new(),
            diagnostics: Map::new(),
            scraped_at: Utc::now(),
        }
    }

    pub fn diagnostic(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.diagnostics.insert(key.into(), value.into());
    }

    pub fn fail(mut self, status: ScrapeStatus, error: impl Into<String>) -> Self {
        self.success = false;
        self.status = status;
        self.error = error.into();
        self
    }

    /// Drops excluded courts and classifies the outcome as success or success_no_slots.
    pub fn succeed(mut self, slots: Vec<ScrapedSlot>) -> Self {
        let before = slots.len();
        self.slots = slots
            .into_iter()
            .filter(|slot| !should_exclude(&slot.court_name))
            .collect();
        self.diagnostic("slots_parsed", before);
        self.diagnostic("slots_excluded", before - self.slots.len());
        self.success = true;
        self.error.clear();
        self.status = if self.slots.is_empty() {
            ScrapeStatus::SuccessNoSlots
        } else {
            ScrapeStatus::Success
        };
        self
    }

    /// Makes `success`, `status` and `error` agree with each other.
    pub fn normalized(mut self) -> Self {
        if self.success {
            self.error.clear();
            self.status = if self.slots.is_empty() {
                ScrapeStatus::SuccessNoSlots
            } else {
                ScrapeStatus::Success
            };
            return self;
        }
        if self.status.is_success() {
            self.status = ScrapeStatus::UnknownError;
        }
        if self.error.trim().is_empty() {
            self.error = self.status.to_string();
        }
        self
    }

    pub fn diagnostics_json(&self) -> Option<String> {
        if self.diagnostics.is_empty() {
            return None;
        }
        serde_json::to_string(&self.diagnostics).ok()
    }
}

/// A reservation site driven through its session and form sequence.
#[async_trait]
pub trait Scraper: Send + Sync {
    fn name(&self) -> &str;

    /// Transport and parse failures are reported on the result. `Err` is kept
    /// for local setup failures such as building the HTTP client.
    async fn scrape(&self) -> anyhow::Result<ScrapeResult>;
}
