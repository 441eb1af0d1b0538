use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Municipality {
    pub id: String,
    pub name: String,
    pub scraper_type: String,
    pub url: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ground {
    pub id: String,
    pub municipality_id: String,
    pub name: String,
    pub court_pattern: Option<String>,
    pub enabled: bool,
}

impl Ground {
    /// Empty patterns never match; `str::contains("")` would claim every slot.
    pub fn matches_court(&self, court_name: &str) -> bool {
        match self.court_pattern.as_deref().map(str::trim) {
            Some(pattern) if !pattern.is_empty() => court_name.contains(pattern),
            _ => false,
        }
    }
}

/// A slot ready for insertion. Uniqueness is
/// `(municipality_id, slot_date, time_from, time_to, court_name)`.
#[derive(Debug, Clone)]
pub struct NewSlot {
    pub municipality_id: String,
    pub ground_id: Option<String>,
    pub slot_date: NaiveDate,
    pub time_from: String,
    pub time_to: String,
    pub court_name: String,
    pub raw_text: String,
    pub scraped_at: DateTime<Utc>,
}

/// A persisted slot joined with the ground it resolved to, as seen by the matcher.
#[derive(Debug, Clone)]
pub struct CandidateSlot {
    pub id: String,
    pub ground_id: String,
    pub slot_date: NaiveDate,
    pub time_from: String,
    pub time_to: String,
    pub court_name: String,
}

#[derive(Debug, Clone)]
pub struct WatchCondition {
    pub id: String,
    pub team_id: String,
    pub team_name: String,
    pub ground_id: String,
    /// 0 = Sunday .. 6 = Saturday. Empty means any day.
    pub days_of_week: Vec<u8>,
    pub time_from: String,
    pub time_to: String,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeJob {
    pub id: String,
    pub municipality_id: String,
    pub status: JobStatus,
    pub scrape_status: Option<String>,
    pub slots_found: i32,
    pub error_message: Option<String>,
    pub diagnostics: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A pending job together with the scraper its municipality is configured for.
#[derive(Debug, Clone)]
pub struct PendingScrapeJob {
    pub job_id: String,
    pub municipality_id: String,
    pub scraper_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
        }
    }
}

/// A pending notification joined with team, slot, ground and municipality data.
#[derive(Debug, Clone)]
pub struct PendingNotification {
    pub id: String,
    pub team_id: String,
    pub team_name: String,
    pub team_email: String,
    pub channel: String,
    pub slot_date: String,
    pub time_from: String,
    pub time_to: String,
    pub court_name: String,
    pub ground_name: String,
    pub reservation_url: Option<String>,
}

/// Terminal update written to a running job.
#[derive(Debug, Clone)]
pub struct JobCompletion {
    pub status: JobStatus,
    pub scrape_status: String,
    pub slots_found: i32,
    pub error_message: Option<String>,
    pub diagnostics: Option<String>,
}

/// Parses a `days_of_week` JSON array such as `[0,6]`. Returns `None` when the
/// text is not an array of integers in 0..=6.
pub fn parse_days_of_week(raw: &str) -> Option<Vec<u8>> {
    let days: Vec<u8> = serde_json::from_str(raw.trim()).ok()?;
    days.iter().all(|day| *day <= 6).then_some(days)
}

/// Accepts `YYYY-MM-DD` or any timestamp whose first ten characters are one.
pub fn parse_date_prefix(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let prefix = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ground(pattern: Option<&str>) -> Ground {
        Ground {
            id: "g1".to_string(),
            municipality_id: "m1".to_string(),
            name: "大神グラウンド".to_string(),
            court_pattern: pattern.map(str::to_string),
            enabled: true,
        }
    }

    #[test]
    fn ground_matches_by_containment() {
        let g = ground(Some("大神グラウンド"));
        assert!(g.matches_court("大神グラウンド野球場Ａ面"));
        assert!(!g.matches_court("馬入ふれあい公園"));
    }

    #[test]
    fn blank_pattern_never_matches() {
        assert!(!ground(None).matches_court("anything"));
        assert!(!ground(Some("  ")).matches_court("anything"));
    }

    #[test]
    fn days_of_week_parsing() {
        assert_eq!(parse_days_of_week("[0,6]"), Some(vec![0, 6]));
        assert_eq!(parse_days_of_week("[]"), Some(vec![]));
        assert_eq!(parse_days_of_week("[7]"), None);
        assert_eq!(parse_days_of_week("sat"), None);
    }

    #[test]
    fn date_prefix_parsing() {
        let expected = NaiveDate::from_ymd_opt(2026, 1, 25);
        assert_eq!(parse_date_prefix("2026-01-25"), expected);
        assert_eq!(parse_date_prefix("2026-01-25T00:00:00Z"), expected);
        assert_eq!(parse_date_prefix("2026/01/25"), None);
        assert_eq!(parse_date_prefix(""), None);
    }

    #[test]
    fn job_status_round_trips_through_text() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }
}
