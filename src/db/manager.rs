use std::sync::Arc;

#[cfg(feature = "sqlite")]
use diesel::RunQueryDsl;
#[cfg(feature = "sqlite")]
use diesel::connection::SimpleConnection;

use crate::config::DatabaseConfig;
#[cfg(feature = "sqlite")]
use crate::db::sqlite::{
    SqliteJobStore, SqliteMunicipalityStore, SqliteNotificationStore, SqliteSlotStore,
    SqliteTarget, SqliteWatchStore, establish_connection,
};
use crate::db::{
    DatabaseError, JobStore, MunicipalityStore, NotificationStore, SlotStore, WatchStore,
};

#[derive(Clone)]
pub struct DatabaseManager {
    #[cfg(feature = "sqlite")]
    target: Arc<SqliteTarget>,
    municipality_store: Arc<dyn MunicipalityStore>,
    slot_store: Arc<dyn SlotStore>,
    job_store: Arc<dyn JobStore>,
    watch_store: Arc<dyn WatchStore>,
    notification_store: Arc<dyn NotificationStore>,
}

impl DatabaseManager {
    /// Opens the database once so that an unreachable file fails at startup.
    #[cfg(feature = "sqlite")]
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        if config.path.trim().is_empty() {
            return Err(DatabaseError::Connection(
                "database path is empty".to_string(),
            ));
        }

        let target = Arc::new(SqliteTarget {
            path: config.path.clone(),
            busy_timeout_ms: config.busy_timeout_ms,
        });

        let probe = target.clone();
        tokio::task::spawn_blocking(move || establish_connection(&probe).map(|_| ()))
            .await
            .map_err(|e| DatabaseError::Connection(format!("database task failed: {e}")))??;

        Ok(Self {
            municipality_store: Arc::new(SqliteMunicipalityStore::new(target.clone())),
            slot_store: Arc::new(SqliteSlotStore::new(target.clone())),
            job_store: Arc::new(SqliteJobStore::new(target.clone())),
            watch_store: Arc::new(SqliteWatchStore::new(target.clone())),
            notification_store: Arc::new(SqliteNotificationStore::new(target.clone())),
            target,
        })
    }

    #[cfg(not(feature = "sqlite"))]
    pub async fn new(_config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        Err(DatabaseError::Connection(
            "SQLite feature not enabled".to_string(),
        ))
    }

    #[cfg(feature = "sqlite")]
    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&target)?;

            conn.batch_execute("PRAGMA journal_mode = WAL;")
                .map_err(|e| DatabaseError::Migration(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS municipalities (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    scraper_type TEXT NOT NULL,
                    url TEXT NOT NULL DEFAULT '',
                    enabled INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS grounds (
                    id TEXT PRIMARY KEY,
                    municipality_id TEXT NOT NULL REFERENCES municipalities(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    court_pattern TEXT,
                    enabled INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS teams (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    email TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'active',
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS watch_conditions (
                    id TEXT PRIMARY KEY,
                    team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
                    ground_id TEXT NOT NULL REFERENCES grounds(id) ON DELETE CASCADE,
                    days_of_week TEXT NOT NULL DEFAULT '[]',
                    time_from TEXT NOT NULL,
                    time_to TEXT NOT NULL,
                    date_from TEXT,
                    date_to TEXT,
                    enabled INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS slots (
                    id TEXT PRIMARY KEY,
                    municipality_id TEXT NOT NULL REFERENCES municipalities(id) ON DELETE CASCADE,
                    ground_id TEXT REFERENCES grounds(id) ON DELETE SET NULL,
                    slot_date TEXT NOT NULL,
                    time_from TEXT NOT NULL,
                    time_to TEXT NOT NULL,
                    court_name TEXT NOT NULL,
                    raw_text TEXT NOT NULL DEFAULT '',
                    scraped_at TEXT NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS scrape_jobs (
                    id TEXT PRIMARY KEY,
                    municipality_id TEXT NOT NULL REFERENCES municipalities(id) ON DELETE CASCADE,
                    status TEXT NOT NULL DEFAULT 'pending',
                    scrape_status TEXT,
                    slots_found INTEGER NOT NULL DEFAULT 0,
                    error_message TEXT,
                    diagnostics TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    started_at TEXT,
                    completed_at TEXT
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS notifications (
                    id TEXT PRIMARY KEY,
                    team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
                    watch_condition_id TEXT NOT NULL REFERENCES watch_conditions(id) ON DELETE CASCADE,
                    slot_id TEXT NOT NULL REFERENCES slots(id) ON DELETE CASCADE,
                    channel TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    sent_at TEXT
                )
                "#,
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_slots_identity ON slots(municipality_id, slot_date, time_from, time_to, court_name)",
                "CREATE INDEX IF NOT EXISTS idx_slots_scraped_at ON slots(municipality_id, scraped_at)",
                "CREATE INDEX IF NOT EXISTS idx_grounds_municipality ON grounds(municipality_id)",
                "CREATE INDEX IF NOT EXISTS idx_watch_conditions_ground ON watch_conditions(ground_id)",
                "CREATE INDEX IF NOT EXISTS idx_scrape_jobs_status ON scrape_jobs(status, created_at)",
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_notifications_identity ON notifications(team_id, watch_condition_id, slot_id)",
                "CREATE INDEX IF NOT EXISTS idx_notifications_status ON notifications(status)",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    #[cfg(not(feature = "sqlite"))]
    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        Err(DatabaseError::Migration(
            "SQLite feature not enabled".to_string(),
        ))
    }

    #[cfg(all(test, feature = "sqlite"))]
    pub(crate) fn target(&self) -> Arc<SqliteTarget> {
        self.target.clone()
    }

    pub fn municipality_store(&self) -> Arc<dyn MunicipalityStore> {
        self.municipality_store.clone()
    }

    pub fn slot_store(&self) -> Arc<dyn SlotStore> {
        self.slot_store.clone()
    }

    pub fn job_store(&self) -> Arc<dyn JobStore> {
        self.job_store.clone()
    }

    pub fn watch_store(&self) -> Arc<dyn WatchStore> {
        self.watch_store.clone()
    }

    pub fn notification_store(&self) -> Arc<dyn NotificationStore> {
        self.notification_store.clone()
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrate_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("worker.db").to_string_lossy().into_owned(),
            busy_timeout_ms: 1000,
        };
        let manager = DatabaseManager::new(&config).await.unwrap();
        manager.migrate().await.unwrap();
        manager.migrate().await.unwrap();
        assert!(manager.municipality_store().list_enabled().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_path_is_rejected() {
        let config = DatabaseConfig {
            path: "  ".to_string(),
            busy_timeout_ms: 1000,
        };
        assert!(matches!(
            DatabaseManager::new(&config).await,
            Err(DatabaseError::Connection(_))
        ));
    }
}
