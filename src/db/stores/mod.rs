use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use super::DatabaseError;
#[cfg(test)]
use super::models::ScrapeJob;
use super::models::{
    CandidateSlot, Ground, JobCompletion, Municipality, NewSlot, PendingNotification,
    PendingScrapeJob, WatchCondition,
};

#[async_trait]
pub trait MunicipalityStore: Send + Sync {
    async fn list_enabled(&self) -> Result<Vec<Municipality>, DatabaseError>;
    #[cfg(test)]
    async fn get_municipality(&self, id: &str) -> Result<Option<Municipality>, DatabaseError>;
    /// Enabled grounds of a municipality, oldest first.
    async fn list_grounds(&self, municipality_id: &str) -> Result<Vec<Ground>, DatabaseError>;
}

#[async_trait]
pub trait SlotStore: Send + Sync {
    /// Returns `false` when the slot already existed.
    async fn insert_slot(&self, slot: &NewSlot) -> Result<bool, DatabaseError>;
    /// Slots with a resolved ground, scraped after `since`, dated today or later.
    async fn recent_slots(
        &self,
        municipality_id: &str,
        since: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<Vec<CandidateSlot>, DatabaseError>;
    #[cfg(test)]
    async fn count_slots(&self, municipality_id: &str) -> Result<i64, DatabaseError>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, municipality_id: &str) -> Result<String, DatabaseError>;
    /// pending -> running. `false` if the job was not pending.
    async fn mark_running(&self, job_id: &str) -> Result<bool, DatabaseError>;
    /// running -> completed|failed. `false` if the job was not running.
    async fn finish_job(
        &self,
        job_id: &str,
        completion: &JobCompletion,
    ) -> Result<bool, DatabaseError>;
    async fn pending_jobs(&self, limit: i64) -> Result<Vec<PendingScrapeJob>, DatabaseError>;
    #[cfg(test)]
    async fn get_job(&self, job_id: &str) -> Result<Option<ScrapeJob>, DatabaseError>;
}

#[async_trait]
pub trait WatchStore: Send + Sync {
    /// Enabled conditions of active teams watching any ground of the municipality.
    async fn active_conditions(
        &self,
        municipality_id: &str,
    ) -> Result<Vec<WatchCondition>, DatabaseError>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Returns `false` when a notification for the triple already exists.
    async fn create_if_absent(
        &self,
        team_id: &str,
        watch_condition_id: &str,
        slot_id: &str,
        channel: &str,
    ) -> Result<bool, DatabaseError>;
    /// Pending rows on one of `channels`, ordered by team, channel, slot date
    /// and start time.
    async fn pending_notifications(
        &self,
        channels: &[String],
        limit: i64,
    ) -> Result<Vec<PendingNotification>, DatabaseError>;
    async fn mark_sent(&self, ids: &[String], at: DateTime<Utc>) -> Result<usize, DatabaseError>;
    async fn mark_failed(&self, ids: &[String]) -> Result<usize, DatabaseError>;
    #[cfg(test)]
    async fn count_by_status(&self, status: &str) -> Result<i64, DatabaseError>;
}
