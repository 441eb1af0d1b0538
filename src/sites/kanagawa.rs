//! Kanagawa prefecture facility reservation system (smartphone pages).
//!
//! ASP.NET WebForms: the facility selection page carries a `__VIEWSTATE`
//! that must be posted back, and the answer embeds a `__ufps` page-state id
//! used by every time-table request that follows.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDate, TimeDelta};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

use super::session::{RequestTally, Session, StepError};
use super::{ScrapeResult, ScrapedSlot, Scraper};

pub const NAME: &str = "kanagawa";
pub const BASE_URL: &str = "https://yoyaku.e-kanagawa.lg.jp";

const SELECTION_PAGE: &str = "/Kanagawa/SmartPhone/Wsp_ShisetsuSentaku.aspx";
const TIME_TABLE_PAGE: &str = "/Kanagawa/SmartPhone/Wsp_JikanSentaku.aspx";
// Hodogaya park.
const PARK_CODE: &str = "000001";
const NO_VACANCY_MARKER: &str = "申込できる空きがありません";
const ERROR_MARKER: &str = "エラー";

/// Courts at the park, by `SJCode`.
pub const FACILITIES: &[(&str, &str)] = &[
    ("01", "サーティーフォー保土ケ谷球場"),
    ("08", "軟式野球場全面"),
    ("09", "軟式野球場半面Ａ"),
    ("10", "軟式野球場半面Ｂ"),
];

static UFPS_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"__ufps=(\d+)").expect("valid ufps regex"));
static TIME_RANGE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{2}:\d{2})\s*[\-～~]\s*(\d{2}:\d{2})").expect("valid time range regex")
});
static VIEWSTATE_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"input[name="__VIEWSTATE"]"#).expect("valid viewstate selector")
});

pub struct KanagawaScraper {
    timeout: Duration,
    horizon_days: u32,
}

impl KanagawaScraper {
    pub fn new(timeout: Duration, horizon_days: u32) -> Self {
        Self {
            timeout,
            horizon_days,
        }
    }
}

#[async_trait]
impl Scraper for KanagawaScraper {
    fn name(&self) -> &str {
        NAME
    }

    async fn scrape(&self) -> anyhow::Result<ScrapeResult> {
        let session = Session::new(BASE_URL, self.timeout)?;
        let mut result = ScrapeResult::started();

        let ufps = match select_park(&session).await {
            Ok(ufps) => ufps,
            Err(e) => return Ok(e.into_result(result)),
        };
        result.diagnostic("ufps", ufps.clone());

        let today = Local::now().date_naive();
        let mut slots = Vec::new();
        let mut tally = RequestTally::default();
        for offset in 0..self.horizon_days {
            let date = today + TimeDelta::days(i64::from(offset));
            for &(code, facility) in FACILITIES {
                tally.requested += 1;
                match fetch_time_table(&session, &ufps, code, date)
                    .await
                    .and_then(|body| parse_time_slots(&body, facility, date))
                {
                    Ok(found) => slots.extend(found),
                    Err(e) => {
                        tally.record(&e);
                        debug!(site = NAME, date = %date, court = facility, error = %e, "Skipping time table");
                    }
                }
            }
        }
        tally.write_diagnostics(&mut result, "tables");

        if let Some(status) = tally.all_failed() {
            return Ok(result.fail(
                status,
                format!(
                    "all {} time table requests failed ({} network, {} parse)",
                    tally.requested, tally.network_failed, tally.parse_failed
                ),
            ));
        }
        Ok(result.succeed(slots))
    }
}

async fn select_park(session: &Session) -> Result<String, StepError> {
    session
        .get("access top page", "/Portal/Web/Wgp_Map.aspx")
        .await?;
    session
        .get("access smartphone page", "/Kanagawa/SmartPhone")
        .await?;
    let body = session
        .get("access facility selection", SELECTION_PAGE)
        .await?;
    let view_state = extract_view_state(&body)
        .ok_or_else(|| StepError::Parse("failed to extract ViewState".to_string()))?;

    let body = session
        .post_form(
            "select facility",
            SELECTION_PAGE,
            &[
                ("__EVENTTARGET", "cmdNext"),
                ("__EVENTARGUMENT", ""),
                ("__VIEWSTATE", view_state.as_str()),
                ("slShisetsu$rbList", PARK_CODE),
                ("slNen", "0"),
                ("slTsuki", "0"),
                ("slHi", "0"),
                ("cmdNext", "次へ"),
            ],
        )
        .await?;
    extract_ufps(&body).ok_or_else(|| StepError::Parse("failed to extract UFPS".to_string()))
}

async fn fetch_time_table(
    session: &Session,
    ufps: &str,
    code: &str,
    date: NaiveDate,
) -> Result<String, StepError> {
    let mut url = session.url(TIME_TABLE_PAGE)?;
    url.query_pairs_mut()
        .append_pair("__ufps", ufps)
        .append_pair("SJCode", code)
        .append_pair("UseDate", &date.format("%Y%m%d").to_string());
    session.get_url("access time table", url).await
}

pub fn extract_view_state(body: &str) -> Option<String> {
    let document = Html::parse_document(body);
    document
        .select(&VIEWSTATE_SELECTOR)
        .find_map(|input| input.value().attr("value"))
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub fn extract_ufps(body: &str) -> Option<String> {
    UFPS_REGEX
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Reads one court's time table for one day. The page lists every time band;
/// it is only worth reading when it shows a vacancy mark.
pub fn parse_time_slots(
    body: &str,
    facility: &str,
    date: NaiveDate,
) -> Result<Vec<ScrapedSlot>, StepError> {
    if body.contains(ERROR_MARKER) {
        return Err(StepError::Parse("error page returned".to_string()));
    }
    if body.contains(NO_VACANCY_MARKER) || !(body.contains('空') || body.contains('○')) {
        return Ok(Vec::new());
    }

    let day = date.format("%Y-%m-%d").to_string();
    let mut seen = HashSet::new();
    let mut slots = Vec::new();
    for caps in TIME_RANGE_REGEX.captures_iter(body) {
        let (from, to) = (&caps[1], &caps[2]);
        if !seen.insert((from.to_string(), to.to_string())) {
            continue;
        }
        slots.push(ScrapedSlot {
            date: day.clone(),
            time_from: from.to_string(),
            time_to: to.to_string(),
            court_name: facility.to_string(),
            raw_text: format!("{day} {from}-{to} {facility}"),
        });
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sites::ScrapeStatus;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 7).unwrap()
    }

    #[test]
    fn extracts_view_state_and_ufps() {
        let page = r#"<form action="Wsp_ShisetsuSentaku.aspx?__ufps=481516" method="post">
            <input type="hidden" name="__VIEWSTATE" id="__VIEWSTATE" value="dDwtMTA4NzA=" />
            </form>"#;
        assert_eq!(extract_view_state(page).as_deref(), Some("dDwtMTA4NzA="));
        assert_eq!(extract_ufps(page).as_deref(), Some("481516"));

        assert_eq!(extract_view_state(r#"<input name="__VIEWSTATE" value="">"#), None);
        assert_eq!(extract_ufps("<form action=\"x.aspx\">"), None);
    }

    #[test]
    fn parses_vacant_time_bands() {
        let page = r##"<ul>
            <li><a href="#">○ 09:00～11:00</a></li>
            <li><a href="#">空 13:00 - 15:00</a></li>
            <li><a href="#">○ 09:00～11:00</a></li>
            </ul>"##;
        let slots = parse_time_slots(page, "軟式野球場全面", date()).unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].date, "2026-02-07");
        assert_eq!((slots[0].time_from.as_str(), slots[0].time_to.as_str()), ("09:00", "11:00"));
        assert_eq!((slots[1].time_from.as_str(), slots[1].time_to.as_str()), ("13:00", "15:00"));
        assert_eq!(slots[1].raw_text, "2026-02-07 13:00-15:00 軟式野球場全面");
    }

    #[test]
    fn no_vacancy_page_yields_nothing() {
        let page = "<p>申込できる空きがありません</p><p>09:00～11:00</p>";
        assert!(parse_time_slots(page, "軟式野球場全面", date()).unwrap().is_empty());
        let page = "<p>09:00～11:00 ×</p>";
        assert!(parse_time_slots(page, "軟式野球場全面", date()).unwrap().is_empty());
    }

    #[test]
    fn error_page_is_a_parse_error() {
        let err = parse_time_slots("<h1>システムエラー</h1>", "軟式野球場全面", date()).unwrap_err();
        assert!(matches!(err, StepError::Parse(_)));
    }

    #[test]
    fn error_pages_count_as_layout_changes() {
        let mut tally = RequestTally {
            requested: 2,
            ..RequestTally::default()
        };
        tally.record(&StepError::Network("timeout".to_string()));
        tally.record(&parse_time_slots("<h1>システムエラー</h1>", "軟式野球場全面", date()).unwrap_err());
        assert_eq!((tally.network_failed, tally.parse_failed), (1, 1));
        assert_eq!(tally.all_failed(), Some(ScrapeStatus::ParseError));
    }
}
