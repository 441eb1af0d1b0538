use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::{NotifierSet, SlotDigest, SlotSummary};
use crate::db::{DatabaseError, NotificationStore, PendingNotification};
use crate::worker::schedule::Shutdown;

/// Row counts for one sender pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SendSummary {
    pub sent: usize,
    pub failed: usize,
}

pub struct NotificationSender {
    store: Arc<dyn NotificationStore>,
    notifiers: Arc<NotifierSet>,
    batch_size: i64,
    shutdown: Shutdown,
}

struct Group {
    ids: Vec<String>,
    digest: SlotDigest,
}

impl Group {
    fn new(row: &PendingNotification) -> Self {
        Self {
            ids: Vec::new(),
            digest: SlotDigest {
                team_id: row.team_id.clone(),
                team_name: row.team_name.clone(),
                team_email: row.team_email.clone(),
                channel: row.channel.clone(),
                slots: Vec::new(),
            },
        }
    }

    fn push(&mut self, row: PendingNotification) {
        self.ids.push(row.id);
        self.digest.slots.push(SlotSummary {
            slot_date: row.slot_date,
            time_from: row.time_from,
            time_to: row.time_to,
            court_name: row.court_name,
            ground_name: row.ground_name,
            reservation_url: row.reservation_url,
        });
    }
}

// Rows arrive ordered by team, channel and slot time; the order survives grouping.
fn group_rows(rows: Vec<PendingNotification>) -> BTreeMap<(String, String), Group> {
    let mut groups: BTreeMap<(String, String), Group> = BTreeMap::new();
    for row in rows {
        groups
            .entry((row.team_id.clone(), row.channel.clone()))
            .or_insert_with(|| Group::new(&row))
            .push(row);
    }
    groups
}

impl NotificationSender {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        notifiers: Arc<NotifierSet>,
        batch_size: i64,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            store,
            notifiers,
            batch_size,
            shutdown,
        }
    }

    /// Sends one message per (team, channel) and records the outcome on every
    /// row of the group. Only rows on a registered channel are fetched, so rows
    /// for an unconfigured channel stay pending without filling the batch.
    /// Shutdown cancels an in-flight dispatch and leaves its rows pending.
    pub async fn process_pending(&self) -> Result<SendSummary, DatabaseError> {
        let channels = self.notifiers.channels();
        let rows = self
            .store
            .pending_notifications(&channels, self.batch_size)
            .await?;
        let mut summary = SendSummary::default();
        if rows.is_empty() {
            return Ok(summary);
        }
        let groups = group_rows(rows);
        debug!(groups = groups.len(), "Dispatching notification groups");

        let mut shutdown = self.shutdown.clone();
        for ((team_id, channel), group) in groups {
            if shutdown.is_triggered() {
                info!("Notification pass interrupted by shutdown");
                break;
            }
            let Some(notifier) = self.notifiers.get(&channel) else {
                continue;
            };

            let dispatched = tokio::select! {
                result = notifier.send(&group.digest) => result,
                _ = shutdown.triggered() => {
                    info!(
                        team_id = %team_id,
                        channel = %channel,
                        rows = group.ids.len(),
                        "Dispatch cancelled by shutdown, leaving rows pending"
                    );
                    break;
                }
            };

            match dispatched {
                Ok(()) => match self.store.mark_sent(&group.ids, Utc::now()).await {
                    Ok(updated) => {
                        summary.sent += updated;
                        info!(
                            team_id = %team_id,
                            team = %group.digest.team_name,
                            channel = %channel,
                            slots = group.ids.len(),
                            "Notification sent"
                        );
                    }
                    Err(e) => error!(
                        team_id = %team_id,
                        channel = %channel,
                        error = %e,
                        "Failed to mark notifications sent"
                    ),
                },
                Err(send_error) => {
                    warn!(
                        team_id = %team_id,
                        channel = %channel,
                        rows = group.ids.len(),
                        error = %send_error,
                        "Notification dispatch failed"
                    );
                    match self.store.mark_failed(&group.ids).await {
                        Ok(updated) => summary.failed += updated,
                        Err(e) => error!(
                            team_id = %team_id,
                            channel = %channel,
                            error = %e,
                            "Failed to mark notifications failed"
                        ),
                    }
                }
            }
        }

        if summary.sent > 0 || summary.failed > 0 {
            info!(
                sent = summary.sent,
                failed = summary.failed,
                "Notifications processed"
            );
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{Duration, Local};

    use super::*;
    use crate::db::NewSlot;
    use crate::db::testing::TestDatabase;
    use crate::matcher::Matcher;
    use crate::notifier::{Notifier, NotifyError};

    struct RecordingNotifier {
        channel: &'static str,
        failing_team: Option<String>,
        sent: Mutex<Vec<SlotDigest>>,
    }

    impl RecordingNotifier {
        fn new(channel: &'static str, failing_team: Option<String>) -> Arc<Self> {
            Arc::new(Self {
                channel,
                failing_team,
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn channel(&self) -> &str {
            self.channel
        }

        async fn send(&self, digest: &SlotDigest) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(digest.clone());
            if self.failing_team.as_deref() == Some(digest.team_id.as_str()) {
                return Err(NotifyError::Smtp("550 mailbox unavailable".to_string()));
            }
            Ok(())
        }
    }

    struct Fixture {
        db: TestDatabase,
        team_a: String,
        team_b: String,
    }

    // Team A matches three slots and team B one, all on `channel`.
    async fn fixture(channel: &str) -> Fixture {
        let db = TestDatabase::new().await;
        let team_a = db.insert_team("Hawks", "hawks@example.com", "active");
        let team_b = db.insert_team("Swallows", "swallows@example.com", "active");
        db.insert_condition(&team_a, &db.ground_id, "[]", "06:00", "20:00");
        db.insert_condition(&team_b, &db.ground_id, "[]", "06:00", "08:00");

        let slots = db.manager.slot_store();
        let date = Local::now().date_naive() + Duration::days(4);
        for (from, to) in [("07:00", "09:00"), ("09:00", "11:00"), ("13:00", "15:00")] {
            slots
                .insert_slot(&NewSlot {
                    municipality_id: db.municipality_id.clone(),
                    ground_id: Some(db.ground_id.clone()),
                    slot_date: date,
                    time_from: from.to_string(),
                    time_to: to.to_string(),
                    court_name: "大神グラウンド野球場Ａ面".to_string(),
                    raw_text: String::new(),
                    scraped_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let created = Matcher::new(&db.manager, channel)
            .process_municipality(&db.municipality_id, Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(created, 4);
        Fixture { db, team_a, team_b }
    }

    struct StalledNotifier;

    #[async_trait]
    impl Notifier for StalledNotifier {
        fn channel(&self) -> &str {
            "email"
        }

        async fn send(&self, _digest: &SlotDigest) -> Result<(), NotifyError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn sender(db: &TestDatabase, notifiers: NotifierSet, batch_size: i64) -> NotificationSender {
        let (_tx, shutdown) = Shutdown::new();
        NotificationSender::new(
            db.manager.notification_store(),
            Arc::new(notifiers),
            batch_size,
            shutdown,
        )
    }

    #[tokio::test]
    async fn one_message_per_team_and_channel() {
        let fixture = fixture("email").await;
        let email = RecordingNotifier::new("email", None);
        let mut notifiers = NotifierSet::default();
        notifiers.register(email.clone());

        let summary = sender(&fixture.db, notifiers, 500).process_pending().await.unwrap();
        assert_eq!(summary, SendSummary { sent: 4, failed: 0 });

        let sent = email.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        let a = sent.iter().find(|d| d.team_id == fixture.team_a).unwrap();
        assert_eq!(a.slots.len(), 3);
        assert_eq!(a.slots[0].time_from, "07:00");
        assert_eq!(a.slots[2].time_from, "13:00");
        assert_eq!(a.slots[0].ground_name, "大神グラウンド");
        assert!(a.slots[0].reservation_url.is_some());
        let b = sent.iter().find(|d| d.team_id == fixture.team_b).unwrap();
        assert_eq!(b.slots.len(), 1);

        let store = fixture.db.manager.notification_store();
        assert_eq!(store.count_by_status("sent").await.unwrap(), 4);
        assert_eq!(store.count_by_status("pending").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failing_group_marks_all_rows_failed() {
        let fixture = fixture("email").await;
        let email = RecordingNotifier::new("email", Some(fixture.team_a.clone()));
        let mut notifiers = NotifierSet::default();
        notifiers.register(email.clone());

        let summary = sender(&fixture.db, notifiers, 500).process_pending().await.unwrap();
        assert_eq!(summary, SendSummary { sent: 1, failed: 3 });

        let store = fixture.db.manager.notification_store();
        assert_eq!(store.count_by_status("failed").await.unwrap(), 3);
        assert_eq!(store.count_by_status("sent").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unregistered_channel_leaves_rows_pending() {
        let fixture = fixture("line").await;
        let email = RecordingNotifier::new("email", None);
        let mut notifiers = NotifierSet::default();
        notifiers.register(email.clone());

        let summary = sender(&fixture.db, notifiers, 500).process_pending().await.unwrap();
        assert_eq!(summary, SendSummary::default());
        assert!(email.sent.lock().unwrap().is_empty());
        assert_eq!(
            fixture.db.manager.notification_store().count_by_status("pending").await.unwrap(),
            4
        );
    }

    #[tokio::test]
    async fn unregistered_channel_does_not_starve_the_batch() {
        let fixture = fixture("line").await;
        let db = &fixture.db;
        let team_c = db.insert_team("Carp", "carp@example.com", "active");
        let condition = db.insert_condition(&team_c, &db.ground_id, "[]", "06:00", "20:00");
        let slot_id = db
            .manager
            .slot_store()
            .recent_slots(&db.municipality_id, Utc::now() - Duration::hours(1), Local::now().date_naive())
            .await
            .unwrap()[0]
            .id
            .clone();
        let store = db.manager.notification_store();
        assert!(store.create_if_absent(&team_c, &condition, &slot_id, "email").await.unwrap());

        let email = RecordingNotifier::new("email", None);
        let mut notifiers = NotifierSet::default();
        notifiers.register(email.clone());
        let sender = sender(db, notifiers, 1);

        let summary = sender.process_pending().await.unwrap();
        assert_eq!(summary, SendSummary { sent: 1, failed: 0 });
        assert_eq!(email.sent.lock().unwrap()[0].team_id, team_c);
        assert_eq!(sender.process_pending().await.unwrap(), SendSummary::default());
        assert_eq!(store.count_by_status("pending").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn shutdown_cancels_a_stalled_dispatch() {
        let fixture = fixture("email").await;
        let mut notifiers = NotifierSet::default();
        notifiers.register(Arc::new(StalledNotifier));
        let (tx, shutdown) = Shutdown::new();
        let sender = NotificationSender::new(
            fixture.db.manager.notification_store(),
            Arc::new(notifiers),
            500,
            shutdown,
        );

        let pass = tokio::spawn(async move { sender.process_pending().await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let summary = tokio::time::timeout(std::time::Duration::from_secs(3), pass)
            .await
            .expect("pass stops once shutdown is requested")
            .unwrap()
            .unwrap();
        assert_eq!(summary, SendSummary::default());
        assert_eq!(
            fixture.db.manager.notification_store().count_by_status("pending").await.unwrap(),
            4
        );
    }

    #[tokio::test]
    async fn nothing_pending_is_a_no_op() {
        let db = TestDatabase::new().await;
        let summary = sender(&db, NotifierSet::default(), 500).process_pending().await.unwrap();
        assert_eq!(summary, SendSummary::default());
    }
}
