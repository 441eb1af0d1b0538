pub use self::error::DatabaseError;
pub use self::manager::DatabaseManager;
pub use self::models::{
    CandidateSlot, Ground, JobCompletion, JobStatus, Municipality, NewSlot, NotificationStatus,
    PendingNotification, PendingScrapeJob, ScrapeJob, WatchCondition,
};
pub use self::stores::{JobStore, MunicipalityStore, NotificationStore, SlotStore, WatchStore};

pub mod error;
pub mod manager;
pub mod models;
pub mod stores;

#[cfg(feature = "sqlite")]
pub mod schema;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(all(test, feature = "sqlite"))]
pub mod testing;
