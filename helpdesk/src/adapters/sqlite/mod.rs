pub mod conversations;
pub mod customers;
pub mod folders;
pub mod jobs;
pub mod mailboxes;
pub mod pool;
pub mod schema;
pub mod send_logs;
pub mod threads;
pub mod users;

// Re-export the pool type so callers can do `use crate::adapters::sqlite::DbPool`
pub use pool::DbPool;

use chrono::{DateTime, TimeZone, Utc};

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

pub(crate) fn to_datetime_opt(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.map(to_datetime)
}
