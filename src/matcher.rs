use std::sync::Arc;

use chrono::{DateTime, Datelike, Local, Utc};
use tracing::{debug, info, warn};

use crate::db::{
    CandidateSlot, DatabaseError, DatabaseManager, NotificationStore, SlotStore, WatchCondition,
    WatchStore,
};

/// Minutes since midnight for `HH:MM` or `HHMM`. Anything else is 0.
pub fn parse_time_to_minutes(value: &str) -> u32 {
    let value = value.trim();
    if !value.is_ascii() {
        return 0;
    }
    let (hours, minutes) = match value.len() {
        5 if value.as_bytes()[2] == b':' => (&value[0..2], &value[3..5]),
        4 => (&value[0..2], &value[2..4]),
        _ => return 0,
    };
    match (hours.parse::<u32>(), minutes.parse::<u32>()) {
        (Ok(h), Ok(m)) => h * 60 + m,
        _ => 0,
    }
}

/// Day set (empty means any day), half-open time overlap and optional date bounds.
pub fn matches(slot: &CandidateSlot, condition: &WatchCondition) -> bool {
    let weekday = slot.slot_date.weekday().num_days_from_sunday() as u8;
    if !condition.days_of_week.is_empty() && !condition.days_of_week.contains(&weekday) {
        return false;
    }

    let slot_from = parse_time_to_minutes(&slot.time_from);
    let slot_to = parse_time_to_minutes(&slot.time_to);
    let cond_from = parse_time_to_minutes(&condition.time_from);
    let cond_to = parse_time_to_minutes(&condition.time_to);
    if slot_to <= cond_from || slot_from >= cond_to {
        return false;
    }

    if condition.date_from.is_some_and(|from| slot.slot_date < from) {
        return false;
    }
    if condition.date_to.is_some_and(|to| slot.slot_date > to) {
        return false;
    }
    true
}

/// Turns freshly scraped slots into pending notifications.
#[derive(Clone)]
pub struct Matcher {
    watches: Arc<dyn WatchStore>,
    slots: Arc<dyn SlotStore>,
    notifications: Arc<dyn NotificationStore>,
    channel: String,
}

impl Matcher {
    pub fn new(db: &DatabaseManager, channel: impl Into<String>) -> Self {
        Self {
            watches: db.watch_store(),
            slots: db.slot_store(),
            notifications: db.notification_store(),
            channel: channel.into(),
        }
    }

    /// Evaluates slots of the municipality scraped after `since` and dated
    /// today or later. Returns how many notifications were newly created.
    pub async fn process_municipality(
        &self,
        municipality_id: &str,
        since: DateTime<Utc>,
    ) -> Result<usize, DatabaseError> {
        let conditions = self.watches.active_conditions(municipality_id).await?;
        if conditions.is_empty() {
            debug!(municipality_id, "No active watch conditions");
            return Ok(0);
        }
        let today = Local::now().date_naive();
        let slots = self
            .slots
            .recent_slots(municipality_id, since, today)
            .await?;

        let mut created = 0;
        for slot in &slots {
            for condition in conditions.iter().filter(|c| c.ground_id == slot.ground_id) {
                if !matches(slot, condition) {
                    continue;
                }
                match self
                    .notifications
                    .create_if_absent(&condition.team_id, &condition.id, &slot.id, &self.channel)
                    .await
                {
                    Ok(true) => {
                        created += 1;
                        info!(
                            team_id = %condition.team_id,
                            team = %condition.team_name,
                            slot_date = %slot.slot_date,
                            time = %format!("{}-{}", slot.time_from, slot.time_to),
                            court = %slot.court_name,
                            "Match found"
                        );
                    }
                    Ok(false) => {}
                    Err(e) => warn!(
                        team_id = %condition.team_id,
                        condition_id = %condition.id,
                        slot_id = %slot.id,
                        error = %e,
                        "Failed to create notification"
                    ),
                }
            }
        }

        debug!(
            municipality_id,
            slots = slots.len(),
            conditions = conditions.len(),
            created,
            "Matching finished"
        );
        Ok(created)
    }
}
