use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Nullable, Text};
use diesel::sqlite::SqliteConnection;
use tracing::warn;
use uuid::Uuid;

use super::DatabaseError;
use super::models::{
    CandidateSlot, Ground, JobCompletion, JobStatus, Municipality, NewSlot, NotificationStatus,
    PendingNotification, PendingScrapeJob, WatchCondition, parse_date_prefix, parse_days_of_week,
};
#[cfg(test)]
use super::models::ScrapeJob;
use crate::db::schema::{
    grounds, municipalities, notifications, scrape_jobs, slots, teams, watch_conditions,
};

// Fixed-width UTC timestamps so that text comparison orders them correctly.
pub(crate) fn datetime_to_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// Rows written by other processes may carry SQLite's `CURRENT_TIMESTAMP` format.
fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .map(|dt| dt.and_utc())
        .map_err(|e| DatabaseError::Query(format!("invalid datetime format: {}", e)))
}

fn optional_datetime(s: Option<&str>) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    s.map(string_to_datetime).transpose()
}

/// Where and how to open SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteTarget {
    pub path: String,
    pub busy_timeout_ms: u64,
}

pub(crate) fn establish_connection(target: &SqliteTarget) -> Result<SqliteConnection, DatabaseError> {
    let mut conn = SqliteConnection::establish(&target.path)
        .map_err(|e| DatabaseError::Connection(e.to_string()))?;
    conn.batch_execute(&format!(
        "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = {};",
        target.busy_timeout_ms
    ))
    .map_err(|e| DatabaseError::Connection(e.to_string()))?;
    Ok(conn)
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = municipalities)]
struct DbMunicipality {
    id: String,
    name: String,
    scraper_type: String,
    url: String,
    enabled: bool,
}

impl DbMunicipality {
    fn to_municipality(self) -> Municipality {
        Municipality {
            id: self.id,
            name: self.name,
            scraper_type: self.scraper_type,
            url: self.url,
            enabled: self.enabled,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = grounds)]
struct DbGround {
    id: String,
    municipality_id: String,
    name: String,
    court_pattern: Option<String>,
    enabled: bool,
}

impl DbGround {
    fn to_ground(self) -> Ground {
        Ground {
            id: self.id,
            municipality_id: self.municipality_id,
            name: self.name,
            court_pattern: self.court_pattern,
            enabled: self.enabled,
        }
    }
}

pub struct SqliteMunicipalityStore {
    target: Arc<SqliteTarget>,
}

impl SqliteMunicipalityStore {
    pub fn new(target: Arc<SqliteTarget>) -> Self {
        Self { target }
    }
}

#[async_trait]
impl super::MunicipalityStore for SqliteMunicipalityStore {
    async fn list_enabled(&self) -> Result<Vec<Municipality>, DatabaseError> {
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&target)?;
            let rows = municipalities::table
                .filter(municipalities::enabled.eq(true))
                .order(municipalities::name.asc())
                .select(DbMunicipality::as_select())
                .load::<DbMunicipality>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            Ok(rows.into_iter().map(DbMunicipality::to_municipality).collect())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    #[cfg(test)]
    async fn get_municipality(&self, id: &str) -> Result<Option<Municipality>, DatabaseError> {
        let municipality_id = id.to_string();
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&target)?;
            municipalities::table
                .filter(municipalities::id.eq(&municipality_id))
                .select(DbMunicipality::as_select())
                .first::<DbMunicipality>(&mut conn)
                .optional()
                .map(|row| row.map(DbMunicipality::to_municipality))
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn list_grounds(&self, municipality_id: &str) -> Result<Vec<Ground>, DatabaseError> {
        let municipality_id = municipality_id.to_string();
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&target)?;
            let rows = grounds::table
                .filter(grounds::municipality_id.eq(&municipality_id))
                .filter(grounds::enabled.eq(true))
                .order((grounds::created_at.asc(), grounds::id.asc()))
                .select(DbGround::as_select())
                .load::<DbGround>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            Ok(rows.into_iter().map(DbGround::to_ground).collect())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

#[derive(Insertable)]
#[diesel(table_name = slots)]
struct NewSlotRow<'a> {
    id: String,
    municipality_id: &'a str,
    ground_id: Option<&'a str>,
    slot_date: String,
    time_from: &'a str,
    time_to: &'a str,
    court_name: &'a str,
    raw_text: &'a str,
    scraped_at: String,
}

pub struct SqliteSlotStore {
    target: Arc<SqliteTarget>,
}

impl SqliteSlotStore {
    pub fn new(target: Arc<SqliteTarget>) -> Self {
        Self { target }
    }
}

#[async_trait]
impl super::SlotStore for SqliteSlotStore {
    async fn insert_slot(&self, slot: &NewSlot) -> Result<bool, DatabaseError> {
        let slot = slot.clone();
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&target)?;
            let row = NewSlotRow {
                id: Uuid::new_v4().to_string(),
                municipality_id: &slot.municipality_id,
                ground_id: slot.ground_id.as_deref(),
                slot_date: slot.slot_date.format("%Y-%m-%d").to_string(),
                time_from: &slot.time_from,
                time_to: &slot.time_to,
                court_name: &slot.court_name,
                raw_text: &slot.raw_text,
                scraped_at: datetime_to_string(&slot.scraped_at),
            };
            diesel::insert_or_ignore_into(slots::table)
                .values(&row)
                .execute(&mut conn)
                .map(|inserted| inserted > 0)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn recent_slots(
        &self,
        municipality_id: &str,
        since: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<Vec<CandidateSlot>, DatabaseError> {
        let municipality_id = municipality_id.to_string();
        let since = datetime_to_string(&since);
        let today = today.format("%Y-%m-%d").to_string();
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&target)?;
            let rows = slots::table
                .filter(slots::municipality_id.eq(&municipality_id))
                .filter(slots::ground_id.is_not_null())
                .filter(slots::scraped_at.gt(&since))
                .filter(slots::slot_date.ge(&today))
                .order((slots::slot_date.asc(), slots::time_from.asc()))
                .select((
                    slots::id,
                    slots::ground_id,
                    slots::slot_date,
                    slots::time_from,
                    slots::time_to,
                    slots::court_name,
                ))
                .load::<(String, Option<String>, String, String, String, String)>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            let mut candidates = Vec::with_capacity(rows.len());
            for (id, ground_id, slot_date, time_from, time_to, court_name) in rows {
                let (Some(ground_id), Some(date)) = (ground_id, parse_date_prefix(&slot_date))
                else {
                    warn!(slot_id = %id, slot_date = %slot_date, "Skipping slot with unreadable date");
                    continue;
                };
                candidates.push(CandidateSlot {
                    id,
                    ground_id,
                    slot_date: date,
                    time_from,
                    time_to,
                    court_name,
                });
            }
            Ok(candidates)
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    #[cfg(test)]
    async fn count_slots(&self, municipality_id: &str) -> Result<i64, DatabaseError> {
        let municipality_id = municipality_id.to_string();
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&target)?;
            slots::table
                .filter(slots::municipality_id.eq(&municipality_id))
                .count()
                .get_result(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

#[cfg(test)]
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = scrape_jobs)]
struct DbScrapeJob {
    id: String,
    municipality_id: String,
    status: String,
    scrape_status: Option<String>,
    slots_found: i32,
    error_message: Option<String>,
    diagnostics: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

#[cfg(test)]
impl DbScrapeJob {
    fn to_scrape_job(self) -> Result<ScrapeJob, DatabaseError> {
        let status = JobStatus::parse(&self.status).ok_or_else(|| {
            DatabaseError::Query(format!("unknown job status: {}", self.status))
        })?;
        Ok(ScrapeJob {
            status,
            created_at: string_to_datetime(&self.created_at)?,
            started_at: optional_datetime(self.started_at.as_deref())?,
            completed_at: optional_datetime(self.completed_at.as_deref())?,
            id: self.id,
            municipality_id: self.municipality_id,
            scrape_status: self.scrape_status,
            slots_found: self.slots_found,
            error_message: self.error_message,
            diagnostics: self.diagnostics,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = scrape_jobs)]
struct NewScrapeJob<'a> {
    id: &'a str,
    municipality_id: &'a str,
    status: &'a str,
    slots_found: i32,
    created_at: String,
}

pub struct SqliteJobStore {
    target: Arc<SqliteTarget>,
}

impl SqliteJobStore {
    pub fn new(target: Arc<SqliteTarget>) -> Self {
        Self { target }
    }
}

#[async_trait]
impl super::JobStore for SqliteJobStore {
    async fn create_job(&self, municipality_id: &str) -> Result<String, DatabaseError> {
        let municipality_id = municipality_id.to_string();
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&target)?;
            let job_id = Uuid::new_v4().to_string();
            diesel::insert_into(scrape_jobs::table)
                .values(&NewScrapeJob {
                    id: &job_id,
                    municipality_id: &municipality_id,
                    status: JobStatus::Pending.as_str(),
                    slots_found: 0,
                    created_at: datetime_to_string(&Utc::now()),
                })
                .execute(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            Ok(job_id)
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn mark_running(&self, job_id: &str) -> Result<bool, DatabaseError> {
        let job_id = job_id.to_string();
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&target)?;
            diesel::update(
                scrape_jobs::table
                    .filter(scrape_jobs::id.eq(&job_id))
                    .filter(scrape_jobs::status.eq(JobStatus::Pending.as_str())),
            )
            .set((
                scrape_jobs::status.eq(JobStatus::Running.as_str()),
                scrape_jobs::started_at.eq(Some(datetime_to_string(&Utc::now()))),
            ))
            .execute(&mut conn)
            .map(|updated| updated == 1)
            .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn finish_job(
        &self,
        job_id: &str,
        completion: &JobCompletion,
    ) -> Result<bool, DatabaseError> {
        if !completion.status.is_terminal() {
            return Err(DatabaseError::InvalidTransition(format!(
                "cannot finish job with non-terminal status {}",
                completion.status
            )));
        }
        let job_id = job_id.to_string();
        let completion = completion.clone();
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&target)?;
            diesel::update(
                scrape_jobs::table
                    .filter(scrape_jobs::id.eq(&job_id))
                    .filter(scrape_jobs::status.eq(JobStatus::Running.as_str())),
            )
            .set((
                scrape_jobs::status.eq(completion.status.as_str()),
                scrape_jobs::scrape_status.eq(Some(completion.scrape_status.as_str())),
                scrape_jobs::slots_found.eq(completion.slots_found),
                scrape_jobs::error_message.eq(completion.error_message.as_deref()),
                scrape_jobs::diagnostics.eq(completion.diagnostics.as_deref()),
                scrape_jobs::completed_at.eq(Some(datetime_to_string(&Utc::now()))),
            ))
            .execute(&mut conn)
            .map(|updated| updated == 1)
            .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn pending_jobs(&self, limit: i64) -> Result<Vec<PendingScrapeJob>, DatabaseError> {
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&target)?;
            let rows = scrape_jobs::table
                .inner_join(municipalities::table)
                .filter(scrape_jobs::status.eq(JobStatus::Pending.as_str()))
                .order((scrape_jobs::created_at.asc(), scrape_jobs::id.asc()))
                .limit(limit)
                .select((
                    scrape_jobs::id,
                    scrape_jobs::municipality_id,
                    municipalities::scraper_type,
                ))
                .load::<(String, String, String)>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            Ok(rows
                .into_iter()
                .map(|(job_id, municipality_id, scraper_type)| PendingScrapeJob {
                    job_id,
                    municipality_id,
                    scraper_type,
                })
                .collect())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    #[cfg(test)]
    async fn get_job(&self, job_id: &str) -> Result<Option<ScrapeJob>, DatabaseError> {
        let job_id = job_id.to_string();
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&target)?;
            scrape_jobs::table
                .filter(scrape_jobs::id.eq(&job_id))
                .select(DbScrapeJob::as_select())
                .first::<DbScrapeJob>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(DbScrapeJob::to_scrape_job)
                .transpose()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

type WatchRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
);

pub struct SqliteWatchStore {
    target: Arc<SqliteTarget>,
}

impl SqliteWatchStore {
    pub fn new(target: Arc<SqliteTarget>) -> Self {
        Self { target }
    }
}

#[async_trait]
impl super::WatchStore for SqliteWatchStore {
    async fn active_conditions(
        &self,
        municipality_id: &str,
    ) -> Result<Vec<WatchCondition>, DatabaseError> {
        let municipality_id = municipality_id.to_string();
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&target)?;
            let rows = watch_conditions::table
                .inner_join(teams::table)
                .inner_join(grounds::table)
                .filter(grounds::municipality_id.eq(&municipality_id))
                .filter(grounds::enabled.eq(true))
                .filter(watch_conditions::enabled.eq(true))
                .filter(teams::status.eq("active"))
                .order((watch_conditions::created_at.asc(), watch_conditions::id.asc()))
                .select((
                    watch_conditions::id,
                    watch_conditions::team_id,
                    teams::name,
                    watch_conditions::ground_id,
                    watch_conditions::days_of_week,
                    watch_conditions::time_from,
                    watch_conditions::time_to,
                    watch_conditions::date_from,
                    watch_conditions::date_to,
                ))
                .load::<WatchRow>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            Ok(rows
                .into_iter()
                .map(
                    |(id, team_id, team_name, ground_id, days, time_from, time_to, date_from, date_to)| {
                        let days_of_week = parse_days_of_week(&days).unwrap_or_else(|| {
                            warn!(condition_id = %id, days = %days, "Malformed days_of_week, treating as any day");
                            Vec::new()
                        });
                        WatchCondition {
                            date_from: date_from.as_deref().and_then(parse_date_prefix),
                            date_to: date_to.as_deref().and_then(parse_date_prefix),
                            id,
                            team_id,
                            team_name,
                            ground_id,
                            days_of_week,
                            time_from,
                            time_to,
                        }
                    },
                )
                .collect())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

#[derive(Insertable)]
#[diesel(table_name = notifications)]
struct NewNotification<'a> {
    id: String,
    team_id: &'a str,
    watch_condition_id: &'a str,
    slot_id: &'a str,
    channel: &'a str,
    status: &'a str,
    created_at: String,
}

#[derive(Debug, QueryableByName)]
struct DbPendingNotification {
    #[diesel(sql_type = Text)]
    id: String,
    #[diesel(sql_type = Text)]
    team_id: String,
    #[diesel(sql_type = Text)]
    team_name: String,
    #[diesel(sql_type = Text)]
    team_email: String,
    #[diesel(sql_type = Text)]
    channel: String,
    #[diesel(sql_type = Text)]
    slot_date: String,
    #[diesel(sql_type = Text)]
    time_from: String,
    #[diesel(sql_type = Text)]
    time_to: String,
    #[diesel(sql_type = Text)]
    court_name: String,
    #[diesel(sql_type = Text)]
    ground_name: String,
    #[diesel(sql_type = Nullable<Text>)]
    reservation_url: Option<String>,
}

impl DbPendingNotification {
    fn to_pending_notification(self) -> PendingNotification {
        PendingNotification {
            id: self.id,
            team_id: self.team_id,
            team_name: self.team_name,
            team_email: self.team_email,
            channel: self.channel,
            slot_date: self.slot_date,
            time_from: self.time_from,
            time_to: self.time_to,
            court_name: self.court_name,
            ground_name: self.ground_name,
            reservation_url: self.reservation_url.filter(|url| !url.trim().is_empty()),
        }
    }
}

pub struct SqliteNotificationStore {
    target: Arc<SqliteTarget>,
}

impl SqliteNotificationStore {
    pub fn new(target: Arc<SqliteTarget>) -> Self {
        Self { target }
    }
}

#[async_trait]
impl super::NotificationStore for SqliteNotificationStore {
    async fn create_if_absent(
        &self,
        team_id: &str,
        watch_condition_id: &str,
        slot_id: &str,
        channel: &str,
    ) -> Result<bool, DatabaseError> {
        let (team_id, watch_condition_id, slot_id, channel) = (
            team_id.to_string(),
            watch_condition_id.to_string(),
            slot_id.to_string(),
            channel.to_string(),
        );
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&target)?;
            diesel::insert_or_ignore_into(notifications::table)
                .values(&NewNotification {
                    id: Uuid::new_v4().to_string(),
                    team_id: &team_id,
                    watch_condition_id: &watch_condition_id,
                    slot_id: &slot_id,
                    channel: &channel,
                    status: NotificationStatus::Pending.as_str(),
                    created_at: datetime_to_string(&Utc::now()),
                })
                .execute(&mut conn)
                .map(|inserted| inserted > 0)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn pending_notifications(
        &self,
        channels: &[String],
        limit: i64,
    ) -> Result<Vec<PendingNotification>, DatabaseError> {
        if channels.is_empty() {
            return Ok(Vec::new());
        }
        let channels = serde_json::to_string(channels)
            .map_err(|e| DatabaseError::Query(format!("failed to encode channels: {e}")))?;
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&target)?;
            let rows = diesel::sql_query(
                r#"
                SELECT n.id AS id, n.team_id AS team_id, t.name AS team_name,
                       t.email AS team_email, n.channel AS channel,
                       s.slot_date AS slot_date, s.time_from AS time_from,
                       s.time_to AS time_to, s.court_name AS court_name,
                       COALESCE(g.name, s.court_name) AS ground_name,
                       m.url AS reservation_url
                FROM notifications n
                JOIN teams t ON t.id = n.team_id
                JOIN slots s ON s.id = n.slot_id
                LEFT JOIN grounds g ON g.id = s.ground_id
                LEFT JOIN municipalities m ON m.id = s.municipality_id
                WHERE n.status = 'pending'
                  AND n.channel IN (SELECT value FROM json_each(?))
                ORDER BY n.team_id, n.channel, s.slot_date, s.time_from, n.id
                LIMIT ?
                "#,
            )
            .bind::<Text, _>(channels)
            .bind::<BigInt, _>(limit)
            .load::<DbPendingNotification>(&mut conn)
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
            Ok(rows
                .into_iter()
                .map(DbPendingNotification::to_pending_notification)
                .collect())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn mark_sent(&self, ids: &[String], at: DateTime<Utc>) -> Result<usize, DatabaseError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids = ids.to_vec();
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&target)?;
            diesel::update(
                notifications::table
                    .filter(notifications::id.eq_any(&ids))
                    .filter(notifications::status.eq(NotificationStatus::Pending.as_str())),
            )
            .set((
                notifications::status.eq(NotificationStatus::Sent.as_str()),
                notifications::sent_at.eq(Some(datetime_to_string(&at))),
            ))
            .execute(&mut conn)
            .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn mark_failed(&self, ids: &[String]) -> Result<usize, DatabaseError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids = ids.to_vec();
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&target)?;
            diesel::update(
                notifications::table
                    .filter(notifications::id.eq_any(&ids))
                    .filter(notifications::status.eq(NotificationStatus::Pending.as_str())),
            )
            .set(notifications::status.eq(NotificationStatus::Failed.as_str()))
            .execute(&mut conn)
            .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    #[cfg(test)]
    async fn count_by_status(&self, status: &str) -> Result<i64, DatabaseError> {
        let status = status.to_string();
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&target)?;
            notifications::table
                .filter(notifications::status.eq(&status))
                .count()
                .get_result(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::db::testing::TestDatabase;
    use crate::db::{JobStore, MunicipalityStore, NotificationStore, SlotStore, WatchStore};

    fn slot(db: &TestDatabase, ground_id: Option<&str>, court: &str, from: &str) -> NewSlot {
        NewSlot {
            municipality_id: db.municipality_id.clone(),
            ground_id: ground_id.map(str::to_string),
            slot_date: Utc::now().date_naive() + Duration::days(3),
            time_from: from.to_string(),
            time_to: "11:00".to_string(),
            court_name: court.to_string(),
            raw_text: format!("{court} {from}"),
            scraped_at: Utc::now(),
        }
    }

    #[test]
    fn timestamps_compare_as_text() {
        let early = Utc::now();
        let late = early + Duration::milliseconds(1500);
        assert!(datetime_to_string(&early) < datetime_to_string(&late));
        assert_eq!(datetime_to_string(&early).len(), datetime_to_string(&late).len());
    }

    #[test]
    fn parses_sqlite_current_timestamp() {
        let parsed = string_to_datetime("2026-01-25 09:30:00").unwrap();
        assert_eq!(datetime_to_string(&parsed), "2026-01-25T09:30:00.000000Z");
    }

    #[tokio::test]
    async fn slot_insert_is_idempotent() {
        let db = TestDatabase::new().await;
        let store = SqliteSlotStore::new(db.target());
        let new_slot = slot(&db, Some(&db.ground_id), "大神グラウンド野球場", "09:00");

        assert!(store.insert_slot(&new_slot).await.unwrap());
        assert!(!store.insert_slot(&new_slot).await.unwrap());
        assert_eq!(store.count_slots(&db.municipality_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn recent_slots_skip_unresolved_grounds() {
        let db = TestDatabase::new().await;
        let store = SqliteSlotStore::new(db.target());
        store
            .insert_slot(&slot(&db, Some(&db.ground_id), "大神グラウンド野球場", "09:00"))
            .await
            .unwrap();
        store
            .insert_slot(&slot(&db, None, "別の公園", "09:00"))
            .await
            .unwrap();

        let since = Utc::now() - Duration::hours(24);
        let recent = store
            .recent_slots(&db.municipality_id, since, Utc::now().date_naive())
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].ground_id, db.ground_id);
    }

    #[tokio::test]
    async fn job_transitions_are_monotonic() {
        let db = TestDatabase::new().await;
        let store = SqliteJobStore::new(db.target());
        let job_id = store.create_job(&db.municipality_id).await.unwrap();

        let pending = store.pending_jobs(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].scraper_type, "hiratsuka");

        assert!(store.mark_running(&job_id).await.unwrap());
        assert!(!store.mark_running(&job_id).await.unwrap());

        let completion = JobCompletion {
            status: JobStatus::Completed,
            scrape_status: "success".to_string(),
            slots_found: 4,
            error_message: None,
            diagnostics: Some("{}".to_string()),
        };
        assert!(store.finish_job(&job_id, &completion).await.unwrap());
        assert!(!store.finish_job(&job_id, &completion).await.unwrap());

        let job = store.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.slots_found, 4);
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_some());
        assert!(store.pending_jobs(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn finish_rejects_non_terminal_status() {
        let db = TestDatabase::new().await;
        let store = SqliteJobStore::new(db.target());
        let job_id = store.create_job(&db.municipality_id).await.unwrap();
        let completion = JobCompletion {
            status: JobStatus::Running,
            scrape_status: "success".to_string(),
            slots_found: 0,
            error_message: None,
            diagnostics: None,
        };
        assert!(store.finish_job(&job_id, &completion).await.is_err());
    }

    #[tokio::test]
    async fn active_conditions_filter_inactive_teams() {
        let db = TestDatabase::new().await;
        let active_team = db.insert_team("Hawks", "hawks@example.com", "active");
        let paused_team = db.insert_team("Owls", "owls@example.com", "paused");
        db.insert_condition(&active_team, &db.ground_id, "[0,6]", "08:00", "12:00");
        db.insert_condition(&paused_team, &db.ground_id, "[0,6]", "08:00", "12:00");
        db.insert_condition(&active_team, &db.ground_id, "weekends", "08:00", "12:00");

        let store = SqliteWatchStore::new(db.target());
        let conditions = store.active_conditions(&db.municipality_id).await.unwrap();
        assert_eq!(conditions.len(), 2);
        assert!(conditions.iter().all(|c| c.team_id == active_team));
        assert!(conditions.iter().any(|c| c.days_of_week == vec![0, 6]));
        assert!(conditions.iter().any(|c| c.days_of_week.is_empty()));
    }

    #[tokio::test]
    async fn notifications_are_unique_and_finalised_once() {
        let db = TestDatabase::new().await;
        let team_id = db.insert_team("Hawks", "hawks@example.com", "active");
        let condition_id = db.insert_condition(&team_id, &db.ground_id, "[]", "08:00", "12:00");
        let slots = SqliteSlotStore::new(db.target());
        slots
            .insert_slot(&slot(&db, Some(&db.ground_id), "大神グラウンド野球場", "09:00"))
            .await
            .unwrap();
        let since = Utc::now() - Duration::hours(1);
        let slot_id = slots
            .recent_slots(&db.municipality_id, since, Utc::now().date_naive())
            .await
            .unwrap()[0]
            .id
            .clone();

        let store = SqliteNotificationStore::new(db.target());
        assert!(store.create_if_absent(&team_id, &condition_id, &slot_id, "email").await.unwrap());
        assert!(!store.create_if_absent(&team_id, &condition_id, &slot_id, "email").await.unwrap());

        let email = vec!["email".to_string()];
        assert!(store.pending_notifications(&["line".to_string()], 500).await.unwrap().is_empty());
        let pending = store.pending_notifications(&email, 500).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].team_email, "hawks@example.com");
        assert_eq!(pending[0].ground_name, "大神グラウンド");
        assert_eq!(
            pending[0].reservation_url.as_deref(),
            Some("https://shisetsu.city.hiratsuka.kanagawa.jp")
        );

        let ids = vec![pending[0].id.clone()];
        assert_eq!(store.mark_sent(&ids, Utc::now()).await.unwrap(), 1);
        assert_eq!(store.mark_failed(&ids).await.unwrap(), 0);
        assert_eq!(store.count_by_status("sent").await.unwrap(), 1);
        assert!(store.pending_notifications(&email, 500).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn grounds_listed_in_creation_order() {
        let db = TestDatabase::new().await;
        db.insert_ground("馬入ふれあい公園", Some("馬入"), true);
        db.insert_ground("休止中", Some("休止"), false);

        let store = SqliteMunicipalityStore::new(db.target());
        let grounds = store.list_grounds(&db.municipality_id).await.unwrap();
        let names: Vec<_> = grounds.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["大神グラウンド", "馬入ふれあい公園"]);

        let municipality = store.get_municipality(&db.municipality_id).await.unwrap().unwrap();
        assert_eq!(municipality.scraper_type, "hiratsuka");
        assert_eq!(store.list_enabled().await.unwrap().len(), 1);
    }
}
