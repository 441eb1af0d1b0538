//! Sites scraped by an out-of-process script.
//!
//! The script is invoked as `<interpreter> <script> <site>` and prints a
//! single JSON document on stdout.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::process::Command;

use super::{ScrapeResult, ScrapeStatus, ScrapedSlot, Scraper};

pub struct ExternalScraper {
    site: String,
    interpreter: String,
    script: PathBuf,
    timeout: Duration,
}

impl ExternalScraper {
    pub fn new(
        site: impl Into<String>,
        interpreter: impl Into<String>,
        script: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            site: site.into(),
            interpreter: interpreter.into(),
            script: script.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Scraper for ExternalScraper {
    fn name(&self) -> &str {
        &self.site
    }

    async fn scrape(&self) -> Result<ScrapeResult> {
        let child = Command::new(&self.interpreter)
            .arg(&self.script)
            .arg(&self.site)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| {
                format!(
                    "failed to start {} {}",
                    self.interpreter,
                    self.script.display()
                )
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow!("scraper timed out after {}s", self.timeout.as_secs()))?
            .context("failed to collect scraper output")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "scraper execution failed: {}: {}",
                output.status,
                stderr.trim()
            ));
        }

        decode_output(&output.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct WireOutput {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    status: Option<ScrapeStatus>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    slots: Option<Vec<WireSlot>>,
    #[serde(default)]
    diagnostics: Option<Map<String, Value>>,
    #[serde(default)]
    scraped_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireSlot {
    date: Option<String>,
    time_from: Option<String>,
    time_to: Option<String>,
    court_name: Option<String>,
    #[serde(default)]
    raw_text: Option<String>,
}

impl WireSlot {
    fn into_slot(self) -> Option<ScrapedSlot> {
        Some(ScrapedSlot {
            date: self.date.filter(|d| !d.is_empty())?,
            time_from: self.time_from.unwrap_or_default(),
            time_to: self.time_to.unwrap_or_default(),
            court_name: self.court_name.unwrap_or_default().trim().to_string(),
            raw_text: self.raw_text.unwrap_or_default(),
        })
    }
}

// Naive timestamps are taken as local time.
fn parse_scraped_at(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Malformed JSON is an error; everything else becomes a normalised result.
pub fn decode_output(stdout: &[u8]) -> Result<ScrapeResult> {
    let wire: WireOutput =
        serde_json::from_slice(stdout).context("failed to parse scraper output")?;

    let mut result = ScrapeResult::started();
    if let Some(diagnostics) = wire.diagnostics {
        result.diagnostics = diagnostics;
    }
    if let Some(scraped_at) = wire.scraped_at.as_deref().and_then(parse_scraped_at) {
        result.scraped_at = scraped_at;
    }

    if !wire.success {
        let status = wire.status.unwrap_or(ScrapeStatus::UnknownError);
        return Ok(result
            .fail(status, wire.error.unwrap_or_default())
            .normalized());
    }

    let raw_slots = wire.slots.unwrap_or_default();
    let total = raw_slots.len();
    let slots: Vec<ScrapedSlot> = raw_slots.into_iter().filter_map(WireSlot::into_slot).collect();
    result.diagnostic("slots_undated", total - slots.len());
    Ok(result.succeed(slots).normalized())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_successful_output() {
        let stdout = r#"{
            "success": true,
            "error": null,
            "facility_type": "ayase",
            "slots": [
                {"date": "2026-01-17", "time_from": "13:00", "time_to": "15:00",
                 "court_name": " 綾瀬スポーツ公園 ", "raw_text": "01/17(土) 13:00 ～ 15:00 綾瀬スポーツ公園",
                 "facility_type": "ayase"},
                {"date": null, "time_from": null, "time_to": null, "court_name": null,
                 "raw_text": "unparseable", "facility_type": "ayase"}
            ],
            "scraped_at": "2026-01-10T08:30:00.123456"
        }"#;
        let result = decode_output(stdout.as_bytes()).unwrap();
        assert!(result.success);
        assert_eq!(result.status, ScrapeStatus::Success);
        assert_eq!(result.slots.len(), 1);
        assert_eq!(result.slots[0].court_name, "綾瀬スポーツ公園");
        assert_eq!(result.diagnostics["slots_undated"], 1);
    }

    #[test]
    fn decodes_failure_without_status() {
        let stdout = r#"{"success": false, "error": "Unknown facility type: x", "slots": []}"#;
        let result = decode_output(stdout.as_bytes()).unwrap();
        assert!(!result.success);
        assert_eq!(result.status, ScrapeStatus::UnknownError);
        assert_eq!(result.error, "Unknown facility type: x");
    }

    #[test]
    fn failure_with_success_status_is_normalised() {
        let stdout = r#"{"success": false, "status": "success", "error": ""}"#;
        let result = decode_output(stdout.as_bytes()).unwrap();
        assert_eq!(result.status, ScrapeStatus::UnknownError);
        assert_eq!(result.error, "unknown_error");
    }

    #[test]
    fn empty_success_is_no_slots() {
        let stdout = r#"{"success": true, "status": "success", "slots": null}"#;
        let result = decode_output(stdout.as_bytes()).unwrap();
        assert_eq!(result.status, ScrapeStatus::SuccessNoSlots);
    }

    #[test]
    fn malformed_output_is_an_error() {
        assert!(decode_output(b"Traceback (most recent call last):").is_err());
    }

    #[test]
    fn parses_offset_timestamps() {
        let parsed = parse_scraped_at("2026-01-10T08:30:00+09:00").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-01-09T23:30:00+00:00");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_the_script_with_the_site_name() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("scrape.sh");
        std::fs::write(
            &script,
            "printf '{\"success\": true, \"slots\": [{\"date\": \"2026-01-17\", \"time_from\": \"09:00\", \"time_to\": \"11:00\", \"court_name\": \"%s\"}]}' \"$1\"\n",
        )
        .unwrap();

        let scraper = ExternalScraper::new("fujisawa", "sh", &script, Duration::from_secs(10));
        let result = scraper.scrape().await.unwrap();
        assert_eq!(result.slots.len(), 1);
        assert_eq!(result.slots[0].court_name, "fujisawa");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fail.sh");
        std::fs::write(&script, "echo boom >&2\nexit 3\n").unwrap();

        let scraper = ExternalScraper::new("kamakura", "sh", &script, Duration::from_secs(10));
        let err = scraper.scrape().await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
