//! Yokohama city facility reservation system.
//!
//! An anti-forgery token from the home page authorises a ranged search by
//! date and time; results are read back from the vacancy status page. One
//! search covers a calendar month, so the current and next month are queried.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Local, Months, NaiveDate, TimeDelta};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::multipart::Form;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::session::{RequestTally, Session, StepError};
use super::{ScrapeResult, ScrapedSlot, Scraper, truncate_token};

pub const NAME: &str = "yokohama";
pub const BASE_URL: &str = "https://www.shisetsu.city.yokohama.lg.jp";

const NO_RESULTS_MARKER: &str = "条件に該当する施設はありません";
const MONTHS_SEARCHED: u32 = 2;

static TOKEN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"name="__RequestVerificationToken"\s+value="([^"]+)""#)
        .expect("valid verification token regex")
});
static TOKEN_FALLBACK_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"__RequestVerificationToken"\s*value="([^"]+)""#)
        .expect("valid fallback verification token regex")
});
static DATE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})/(\d{2})/(\d{2})").expect("valid date regex"));
static TIME_RANGE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{2}:\d{2})[\-～~](\d{2}:\d{2})").expect("valid time range regex")
});
static FACILITIES_TABLE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"table[class*="facilities"]"#).expect("valid facilities table selector")
});
static TABLE_ROW: Lazy<Selector> =
    Lazy::new(|| Selector::parse("tr").expect("valid table row selector"));

pub struct YokohamaScraper {
    timeout: Duration,
}

impl YokohamaScraper {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Scraper for YokohamaScraper {
    fn name(&self) -> &str {
        NAME
    }

    async fn scrape(&self) -> anyhow::Result<ScrapeResult> {
        let session = Session::new(BASE_URL, self.timeout)?;
        let mut result = ScrapeResult::started();

        let token = match open_home(&session).await {
            Ok(token) => token,
            Err(e) => return Ok(e.into_result(result)),
        };
        result.diagnostic("token", truncate_token(&token));

        let today = Local::now().date_naive();
        let mut slots = Vec::new();
        let mut errors = Vec::new();
        let mut tally = RequestTally::default();
        for (offset, (from, to)) in month_ranges(today, MONTHS_SEARCHED).into_iter().enumerate() {
            tally.requested += 1;
            match search_range(&session, &token, from, to).await {
                Ok(found) => slots.extend(found),
                Err(e) => {
                    debug!(site = NAME, from = %from, to = %to, error = %e, "Month search failed");
                    result.diagnostic(format!("month_{offset}_error"), e.to_string());
                    tally.record(&e);
                    errors.push(e.to_string());
                }
            }
        }
        tally.write_diagnostics(&mut result, "months");

        if let Some(status) = tally.all_failed() {
            return Ok(result.fail(status, errors.join("; ")));
        }
        Ok(result.succeed(slots))
    }
}

/// `[today, end of month]` followed by whole following months.
pub fn month_ranges(today: NaiveDate, months: u32) -> Vec<(NaiveDate, NaiveDate)> {
    let mut ranges = Vec::new();
    let mut start = today;
    for _ in 0..months {
        let Some(first_of_next) = start
            .with_day(1)
            .and_then(|first| first.checked_add_months(Months::new(1)))
        else {
            break;
        };
        ranges.push((start, first_of_next - TimeDelta::days(1)));
        start = first_of_next;
    }
    ranges
}

async fn open_home(session: &Session) -> Result<String, StepError> {
    let body = session.get("access home page", "/user/Home").await?;
    extract_token(&body).ok_or_else(|| {
        StepError::Parse("failed to extract request verification token".to_string())
    })
}

async fn search_range(
    session: &Session,
    token: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<ScrapedSlot>, StepError> {
    // Place classes 3 (baseball field) and 9 (sports ground), purpose 36 (baseball).
    let form = Form::new()
        .text("HomeModel.SearchByDateTimeModel.SelectedPlaceClass", "3")
        .text("HomeModel.SearchByDateTimeModel.SelectedPlaceClass", "9")
        .text("HomeModel.SearchByDateTimeModel.SelectedPlaceClassCategory", "1")
        .text("HomeModel.SearchByDateTimeModel.SelectedPurpose", "36")
        .text("HomeModel.SearchByDateTimeModel.SelectedPurposeCategory", "1")
        .text("HomeModel.DateFrom", from.format("%Y-%m-%d").to_string())
        .text("HomeModel.DateTo", to.format("%Y-%m-%d").to_string())
        .text("HomeModel.TimeFrom", "0600")
        .text("HomeModel.TimeTo", "2100")
        .text(
            "HomeModel.SelectedWeekDays",
            "月曜日,火曜日,水曜日,木曜日,金曜日,土曜日,日曜日",
        )
        .text("HomeModel.SelectedSearchTarget", "1")
        .text("SelectedLanguageCode", "0")
        .text("__RequestVerificationToken", token.to_string());

    session
        .post_multipart("search by date and time", "/user/Home/SearchByDateTime", form)
        .await?;
    let body = session
        .get("access vacancy status", "/user/VacantFrameFacilityStatus")
        .await?;
    Ok(parse_results(&body))
}

pub fn extract_token(body: &str) -> Option<String> {
    [&*TOKEN_REGEX, &*TOKEN_FALLBACK_REGEX]
        .into_iter()
        .find_map(|regex| regex.captures(body))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn parse_results(body: &str) -> Vec<ScrapedSlot> {
    if body.contains(NO_RESULTS_MARKER) {
        return Vec::new();
    }
    let document = Html::parse_document(body);
    let Some(table) = document.select(&FACILITIES_TABLE).next() else {
        return Vec::new();
    };
    table.select(&TABLE_ROW).filter_map(parse_row).collect()
}

// Columns: checkbox, facility, location, date, time band.
fn parse_row(row: ElementRef<'_>) -> Option<ScrapedSlot> {
    let cells: Vec<String> = row
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|cell| cell.value().name() == "td")
        .map(|cell| cell.text().map(str::trim).collect::<String>())
        .collect();
    if cells.len() < 5 {
        return None;
    }
    let (facility, date_text, time_text) = (&cells[1], &cells[3], &cells[4]);

    let date = DATE_REGEX.captures(date_text)?;
    let time = TIME_RANGE_REGEX.captures(time_text)?;
    Some(ScrapedSlot {
        date: format!("{}-{}-{}", &date[1], &date[2], &date[3]),
        time_from: time[1].to_string(),
        time_to: time[2].to_string(),
        court_name: facility.clone(),
        raw_text: format!("{date_text} {time_text} {facility}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_token_with_fallback() {
        let primary = r#"<input name="__RequestVerificationToken" type="hidden" value="nope"><input name="__RequestVerificationToken" value="CfDJ8Abc">"#;
        assert_eq!(extract_token(primary).as_deref(), Some("CfDJ8Abc"));

        let fallback = r#"<input id="__RequestVerificationToken"value="CfDJ8Xyz">"#;
        assert_eq!(extract_token(fallback).as_deref(), Some("CfDJ8Xyz"));

        assert_eq!(extract_token("<form></form>"), None);
    }

    #[test]
    fn parses_facility_rows() {
        let page = r#"
            <table class="table facilities-list">
              <thead><tr><th></th><th>施設</th><th>場所</th><th>日付</th><th>時間</th></tr></thead>
              <tbody>
                <tr><td><input type="checkbox"></td><td>保土ケ谷公園野球場</td><td>保土ケ谷区</td>
                    <td>2026/01/25(日)</td><td>09:00～11:00</td></tr>
                <tr><td><input type="checkbox"></td><td>新横浜公園 少年野球場</td><td>港北区</td>
                    <td>2026/01/31(土)</td><td>13:00-15:00</td></tr>
                <tr><td></td><td>壊れた行</td><td></td><td>未定</td><td>09:00～11:00</td></tr>
              </tbody>
            </table>"#;
        let slots = parse_results(page);
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].date, "2026-01-25");
        assert_eq!(slots[0].court_name, "保土ケ谷公園野球場");
        assert_eq!((slots[0].time_from.as_str(), slots[0].time_to.as_str()), ("09:00", "11:00"));
        assert_eq!(slots[0].raw_text, "2026/01/25(日) 09:00～11:00 保土ケ谷公園野球場");
        assert_eq!(slots[1].time_to, "15:00");
    }

    #[test]
    fn no_results_marker_yields_nothing() {
        let page = r#"<p>条件に該当する施設はありません</p>
            <table class="facilities"><tr><td></td><td>x</td><td></td><td>2026/01/25</td><td>09:00～11:00</td></tr></table>"#;
        assert!(parse_results(page).is_empty());
    }

    #[test]
    fn month_ranges_cover_rest_of_month_then_next() {
        let today = NaiveDate::from_ymd_opt(2026, 1, 20).unwrap();
        let ranges = month_ranges(today, 2);
        assert_eq!(
            ranges,
            vec![
                (today, NaiveDate::from_ymd_opt(2026, 1, 31).unwrap()),
                (
                    NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
                    NaiveDate::from_ymd_opt(2026, 2, 28).unwrap()
                ),
            ]
        );

        let year_end = NaiveDate::from_ymd_opt(2026, 12, 31).unwrap();
        assert_eq!(
            month_ranges(year_end, 2)[1],
            (
                NaiveDate::from_ymd_opt(2027, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2027, 1, 31).unwrap()
            )
        );
    }
}
