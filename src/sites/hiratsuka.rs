//! Hiratsuka city facility reservation system.
//!
//! The site keeps its state server-side behind a `g_sessionid` form token:
//! menu, group selection, amenity, room, then one date selection and one
//! display page per day. Each open slot is an `O` image whose sibling input
//! carries the slot's end time; slots are two hours long.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, Months, NaiveDate, TimeDelta};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::session::{RequestTally, Session, StepError};
use super::{ScrapeResult, ScrapedSlot, Scraper, truncate_token};

pub const NAME: &str = "hiratsuka";
pub const BASE_URL: &str = "https://shisetsu.city.hiratsuka.kanagawa.jp";

const SLOT_HOURS: u32 = 2;
const MONTHS_AHEAD: u32 = 2;

static SESSION_ID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"name="g_sessionid"\s+value="([^"]+)""#).expect("valid session id regex")
});
static FACILITY_OR_OPEN_MARKER: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"th[align="left"], img[alt="O"]"#).expect("valid availability selector")
});

pub struct HiratsukaScraper {
    timeout: Duration,
}

impl HiratsukaScraper {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Scraper for HiratsukaScraper {
    fn name(&self) -> &str {
        NAME
    }

    async fn scrape(&self) -> anyhow::Result<ScrapeResult> {
        let session = Session::new(BASE_URL, self.timeout)?;
        let mut result = ScrapeResult::started();

        let token = match open_session(&session).await {
            Ok(token) => token,
            Err(e) => return Ok(e.into_result(result)),
        };
        result.diagnostic("token", truncate_token(&token));

        if let Err(e) = select_baseball_fields(&session, &token).await {
            return Ok(e.into_result(result));
        }

        let today = Local::now().date_naive();
        let end = today
            .checked_add_months(Months::new(MONTHS_AHEAD))
            .unwrap_or(today + TimeDelta::days(60));

        let mut slots = Vec::new();
        let mut tally = RequestTally::default();
        let mut date = today;
        while date < end {
            tally.requested += 1;
            match fetch_day(&session, &token, date).await {
                Ok(body) => slots.extend(parse_availability(&body, date)),
                Err(e) => {
                    tally.record(&e);
                    debug!(site = NAME, date = %date, error = %e, "Skipping day");
                }
            }
            date += TimeDelta::days(1);
        }
        tally.write_diagnostics(&mut result, "days");

        if let Some(status) = tally.all_failed() {
            return Ok(result.fail(
                status,
                format!("all {} date requests failed", tally.requested),
            ));
        }
        Ok(result.succeed(slots))
    }
}

async fn open_session(session: &Session) -> Result<String, StepError> {
    session
        .get("access top page", "/cultos/reserve/gin_menu")
        .await?;
    let body = session
        .get("access group selection", "/cultos/reserve/gml_z_group_dest_sel")
        .await?;
    extract_session_token(&body)
        .ok_or_else(|| StepError::Parse("failed to extract session token".to_string()))
}

async fn select_baseball_fields(session: &Session, token: &str) -> Result<(), StepError> {
    // Category 4 is sports facilities.
    session
        .post_form(
            "select group",
            "/cultos/reserve/gml_z_group_dest_sel",
            &[
                ("g_bunruicd_1", "4"),
                ("g_bunruicd_1_show", "4"),
                ("g_kinonaiyo", "8"),
                ("g_sessionid", token),
                ("u_genzai_idx", "0"),
            ],
        )
        .await?;
    session
        .post_form(
            "select amenity",
            "/cultos/reserve/gml_z_amenity_sel",
            &[
                ("g_kinonaiyo", "8"),
                ("g_sessionid", token),
                ("riyosmk", "2"),
                ("u_genzai_idx", "0"),
            ],
        )
        .await?;
    session
        .post_form(
            "select room",
            "/cultos/reserve/gml_z_room_sel",
            &[("heyacd", "1"), ("g_sessionid", token), ("u_genzai_idx", "0")],
        )
        .await?;
    Ok(())
}

async fn fetch_day(session: &Session, token: &str, date: NaiveDate) -> Result<String, StepError> {
    let day = date.format("%Y-%m-%d").to_string();
    session
        .post_form(
            "select date",
            "/cultos/reserve/gml_z_date_sel",
            &[("g_sessionid", token), ("u_genzai_idx", "0"), ("tyumonbi", day.as_str())],
        )
        .await?;
    session
        .get("display time slots", "/cultos/reserve/gml_z_datetime_display")
        .await
}

pub fn extract_session_token(body: &str) -> Option<String> {
    SESSION_ID_REGEX
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Walks the day's table in document order: a left-aligned header names the
/// facility for the rows that follow it.
pub fn parse_availability(body: &str, date: NaiveDate) -> Vec<ScrapedSlot> {
    let document = Html::parse_document(body);
    let day = date.format("%Y-%m-%d").to_string();
    let mut facility = String::new();
    let mut slots = Vec::new();

    for element in document.root_element().select(&FACILITY_OR_OPEN_MARKER) {
        if element.value().name() == "th" {
            facility = element.text().map(str::trim).collect();
            continue;
        }
        if facility.is_empty() {
            continue;
        }
        let Some((time_from, time_to)) = slot_times(element) else {
            continue;
        };
        slots.push(ScrapedSlot {
            raw_text: format!("{day} {time_from}-{time_to} {facility}"),
            date: day.clone(),
            time_from,
            time_to,
            court_name: facility.clone(),
        });
    }
    slots
}

fn slot_times(marker: ElementRef<'_>) -> Option<(String, String)> {
    let end = marker
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .filter(|sibling| sibling.value().name() == "input")
        .find(|input| {
            input
                .value()
                .attr("id")
                .is_some_and(|id| id.starts_with("kaisitime"))
        })?
        .value()
        .attr("value")?;
    let end = normalize_clock(end)?;
    let start = subtract_hours(&end, SLOT_HOURS)?;
    Some((start, end))
}

// Accepts `HH:MM`, `H:MM` or `HHMM`.
fn normalize_clock(value: &str) -> Option<String> {
    let value = value.trim();
    let (hours, minutes) = match value.split_once(':') {
        Some(parts) => parts,
        None if value.len() == 4 && value.is_ascii() => value.split_at(2),
        None => return None,
    };
    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    (hours < 24 && minutes < 60).then(|| format!("{hours:02}:{minutes:02}"))
}

fn subtract_hours(clock: &str, hours: u32) -> Option<String> {
    let (h, m) = clock.split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let h = (h + 24 - hours % 24) % 24;
    Some(format!("{h:02}:{m}"))
}
