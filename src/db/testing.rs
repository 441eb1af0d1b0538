//! Seeded throwaway databases for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{Duration, TimeZone, Utc};
use diesel::RunQueryDsl;
use diesel::sql_types::{Bool, Nullable, Text};
use tempfile::TempDir;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::db::DatabaseManager;
use crate::db::sqlite::{SqliteTarget, datetime_to_string, establish_connection};

pub const MUNICIPALITY_URL: &str = "https://shisetsu.city.hiratsuka.kanagawa.jp";

/// A migrated database holding one `hiratsuka` municipality and one ground
/// matching courts that contain `大神`.
pub struct TestDatabase {
    _dir: TempDir,
    pub manager: DatabaseManager,
    pub municipality_id: String,
    pub ground_id: String,
    clock: AtomicI64,
}

/// Moves every running job to `failed`, as a competing executor would.
pub fn fail_running_jobs(target: &SqliteTarget) {
    let mut conn = establish_connection(target).unwrap();
    diesel::sql_query("UPDATE scrape_jobs SET status = 'failed' WHERE status = 'running'")
        .execute(&mut conn)
        .unwrap();
}

impl TestDatabase {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("akigura.db").to_string_lossy().into_owned(),
            busy_timeout_ms: 1000,
        };
        let manager = DatabaseManager::new(&config).await.unwrap();
        manager.migrate().await.unwrap();

        let mut db = Self {
            _dir: dir,
            manager,
            municipality_id: String::new(),
            ground_id: String::new(),
            clock: AtomicI64::new(0),
        };
        db.municipality_id = db.insert_municipality("平塚市", "hiratsuka", true);
        db.ground_id = db.insert_ground("大神グラウンド", Some("大神"), true);
        db
    }

    pub fn target(&self) -> Arc<SqliteTarget> {
        self.manager.target()
    }

    // Strictly increasing creation times keep ordering assertions stable.
    fn next_created_at(&self) -> String {
        let tick = self.clock.fetch_add(1, Ordering::SeqCst);
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        datetime_to_string(&(base + Duration::seconds(tick)))
    }

    pub fn insert_municipality(&self, name: &str, scraper_type: &str, enabled: bool) -> String {
        let id = Uuid::new_v4().to_string();
        let mut conn = establish_connection(&self.target()).unwrap();
        diesel::sql_query(
            "INSERT INTO municipalities (id, name, scraper_type, url, enabled, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind::<Text, _>(&id)
        .bind::<Text, _>(name)
        .bind::<Text, _>(scraper_type)
        .bind::<Text, _>(MUNICIPALITY_URL)
        .bind::<Bool, _>(enabled)
        .bind::<Text, _>(self.next_created_at())
        .execute(&mut conn)
        .unwrap();
        id
    }

    pub fn insert_ground(&self, name: &str, court_pattern: Option<&str>, enabled: bool) -> String {
        self.insert_ground_for(&self.municipality_id, name, court_pattern, enabled)
    }

    pub fn insert_ground_for(
        &self,
        municipality_id: &str,
        name: &str,
        court_pattern: Option<&str>,
        enabled: bool,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let mut conn = establish_connection(&self.target()).unwrap();
        diesel::sql_query(
            "INSERT INTO grounds (id, municipality_id, name, court_pattern, enabled, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind::<Text, _>(&id)
        .bind::<Text, _>(municipality_id)
        .bind::<Text, _>(name)
        .bind::<Nullable<Text>, _>(court_pattern)
        .bind::<Bool, _>(enabled)
        .bind::<Text, _>(self.next_created_at())
        .execute(&mut conn)
        .unwrap();
        id
    }

    pub fn insert_team(&self, name: &str, email: &str, status: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let mut conn = establish_connection(&self.target()).unwrap();
        diesel::sql_query(
            "INSERT INTO teams (id, name, email, status, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind::<Text, _>(&id)
        .bind::<Text, _>(name)
        .bind::<Text, _>(email)
        .bind::<Text, _>(status)
        .bind::<Text, _>(self.next_created_at())
        .execute(&mut conn)
        .unwrap();
        id
    }

    pub fn insert_condition(
        &self,
        team_id: &str,
        ground_id: &str,
        days_of_week: &str,
        time_from: &str,
        time_to: &str,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let mut conn = establish_connection(&self.target()).unwrap();
        diesel::sql_query(
            "INSERT INTO watch_conditions (id, team_id, ground_id, days_of_week, time_from, time_to, enabled, created_at) VALUES (?, ?, ?, ?, ?, ?, 1, ?)",
        )
        .bind::<Text, _>(&id)
        .bind::<Text, _>(team_id)
        .bind::<Text, _>(ground_id)
        .bind::<Text, _>(days_of_week)
        .bind::<Text, _>(time_from)
        .bind::<Text, _>(time_to)
        .bind::<Text, _>(self.next_created_at())
        .execute(&mut conn)
        .unwrap();
        id
    }
}
