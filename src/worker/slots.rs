use chrono::{DateTime, Utc};
use tracing::warn;

use crate::db::models::parse_date_prefix;
use crate::db::{DatabaseError, Ground, MunicipalityStore, NewSlot, SlotStore};
use crate::sites::ScrapedSlot;

/// What happened to each scraped slot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SaveReport {
    pub saved: usize,
    pub duplicates: usize,
    pub undated: usize,
    pub failed: usize,
}

/// First ground, in configured order, whose pattern occurs in the court name.
pub fn resolve_ground<'a>(grounds: &'a [Ground], court_name: &str) -> Option<&'a Ground> {
    grounds.iter().find(|ground| ground.matches_court(court_name))
}

/// Persists scraped slots, skipping duplicates and undated rows. Individual
/// insert failures are logged and skipped; `Err` means nothing could be written.
pub async fn save_slots(
    municipalities: &dyn MunicipalityStore,
    slots: &dyn SlotStore,
    municipality_id: &str,
    scraped: &[ScrapedSlot],
    scraped_at: DateTime<Utc>,
) -> Result<SaveReport, DatabaseError> {
    let grounds = municipalities.list_grounds(municipality_id).await?;
    let mut report = SaveReport::default();
    let mut last_error = None;

    for slot in scraped {
        let Some(slot_date) = parse_date_prefix(&slot.date) else {
            report.undated += 1;
            warn!(
                municipality_id,
                date = %slot.date,
                court_name = %slot.court_name,
                "Dropping slot without a parseable date"
            );
            continue;
        };

        let new_slot = NewSlot {
            municipality_id: municipality_id.to_string(),
            ground_id: resolve_ground(&grounds, &slot.court_name).map(|g| g.id.clone()),
            slot_date,
            time_from: slot.time_from.clone(),
            time_to: slot.time_to.clone(),
            court_name: slot.court_name.clone(),
            raw_text: slot.raw_text.clone(),
            scraped_at,
        };

        match slots.insert_slot(&new_slot).await {
            Ok(true) => report.saved += 1,
            Ok(false) => report.duplicates += 1,
            Err(e) => {
                report.failed += 1;
                warn!(
                    municipality_id,
                    date = %slot.date,
                    court_name = %slot.court_name,
                    error = %e,
                    "Failed to save slot"
                );
                last_error = Some(e);
            }
        }
    }

    let attempted = scraped.len() - report.undated;
    match last_error {
        Some(e) if report.failed == attempted => Err(DatabaseError::Query(format!(
            "all {attempted} slot inserts failed: {e}"
        ))),
        _ => Ok(report),
    }
}
