//! Rows of the persistent job queue.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{now_ms, to_datetime, to_datetime_opt};
use crate::error::HelpdeskError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: i64,
    pub job_type: String,
    pub payload: String,
    pub status: JobStatus,
    /// Attempts started so far, including the one in progress
    pub attempts: u32,
    pub max_tries: u32,
    pub available_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

const COLUMNS: &str = "id, job_type, payload, status, attempts, max_tries, available_at,
    last_error, created_at, completed_at";

fn row_to_job(row: &Row) -> rusqlite::Result<JobRecord> {
    Ok(JobRecord {
        id: row.get(0)?,
        job_type: row.get(1)?,
        payload: row.get(2)?,
        status: JobStatus::from_str(&row.get::<_, String>(3)?),
        attempts: row.get(4)?,
        max_tries: row.get(5)?,
        available_at: to_datetime(row.get(6)?),
        last_error: row.get(7)?,
        created_at: to_datetime(row.get(8)?),
        completed_at: to_datetime_opt(row.get(9)?),
    })
}

pub fn enqueue(
    conn: &Connection,
    job_type: &str,
    payload: &str,
    max_tries: u32,
) -> Result<i64, HelpdeskError> {
    let now = now_ms();
    conn.execute(
        "INSERT INTO jobs (job_type, payload, status, attempts, max_tries, available_at, created_at)
         VALUES (?1, ?2, 'pending', 0, ?3, ?4, ?4)",
        params![job_type, payload, max_tries, now],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<JobRecord>, HelpdeskError> {
    let sql = format!("SELECT {} FROM jobs WHERE id = ?1", COLUMNS);
    Ok(conn.query_row(&sql, params![id], row_to_job).optional()?)
}

/// Take the oldest available pending job and mark it processing.
///
/// The update is conditional on the row still being pending, so two workers
/// racing for the same row never both get it.
pub fn claim_next(conn: &Connection) -> Result<Option<JobRecord>, HelpdeskError> {
    let now = now_ms();
    loop {
        let candidate: Option<i64> = conn
            .query_row(
                "SELECT id FROM jobs WHERE status = 'pending' AND available_at <= ?1
                 ORDER BY available_at, id LIMIT 1",
                params![now],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = candidate else {
            return Ok(None);
        };

        let claimed = conn.execute(
            "UPDATE jobs SET status = 'processing', attempts = attempts + 1
             WHERE id = ?1 AND status = 'pending'",
            params![id],
        )?;

        if claimed == 1 {
            return get(conn, id);
        }
    }
}

pub fn complete(conn: &Connection, id: i64) -> Result<(), HelpdeskError> {
    conn.execute(
        "UPDATE jobs SET status = 'completed', completed_at = ?1, last_error = NULL WHERE id = ?2",
        params![now_ms(), id],
    )?;
    Ok(())
}

/// Put a failed job back in the queue after `available_at`.
pub fn reschedule(
    conn: &Connection,
    id: i64,
    error: &str,
    available_at: DateTime<Utc>,
) -> Result<(), HelpdeskError> {
    conn.execute(
        "UPDATE jobs SET status = 'pending', last_error = ?1, available_at = ?2 WHERE id = ?3",
        params![error, available_at.timestamp_millis(), id],
    )?;
    Ok(())
}

/// Dead-letter a job that ran out of tries.
pub fn mark_failed(conn: &Connection, id: i64, error: &str) -> Result<(), HelpdeskError> {
    conn.execute(
        "UPDATE jobs SET status = 'failed', last_error = ?1, completed_at = ?2 WHERE id = ?3",
        params![error, now_ms(), id],
    )?;
    Ok(())
}

/// Return jobs left in `processing` by a crashed process to the queue.
pub fn requeue_stale(conn: &Connection) -> Result<usize, HelpdeskError> {
    Ok(conn.execute(
        "UPDATE jobs SET status = 'pending' WHERE status = 'processing'",
        [],
    )?)
}

pub fn list_by_status(conn: &Connection, status: JobStatus) -> Result<Vec<JobRecord>, HelpdeskError> {
    let sql = format!("SELECT {} FROM jobs WHERE status = ?1 ORDER BY id", COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![status.as_str()], row_to_job)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn count_by_status(conn: &Connection, status: JobStatus) -> Result<i64, HelpdeskError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM jobs WHERE status = ?1",
        params![status.as_str()],
        |row| row.get(0),
    )?)
}

pub fn delete_completed(conn: &Connection) -> Result<usize, HelpdeskError> {
    Ok(conn.execute("DELETE FROM jobs WHERE status = 'completed'", [])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::pool;

    #[test]
    fn test_claim_marks_processing_once() {
        let db = pool::in_memory().unwrap();
        let conn = db.get().unwrap();

        let id = enqueue(&conn, "send_alert", "{}", 3).unwrap();
        let job = claim_next(&conn).unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 1);

        assert!(claim_next(&conn).unwrap().is_none());
    }

    #[test]
    fn test_reschedule_respects_available_at() {
        let db = pool::in_memory().unwrap();
        let conn = db.get().unwrap();

        let id = enqueue(&conn, "send_alert", "{}", 3).unwrap();
        claim_next(&conn).unwrap().unwrap();
        reschedule(&conn, id, "smtp down", Utc::now() + chrono::Duration::minutes(5)).unwrap();
        assert!(claim_next(&conn).unwrap().is_none());

        reschedule(&conn, id, "smtp down", Utc::now() - chrono::Duration::seconds(1)).unwrap();
        let job = claim_next(&conn).unwrap().unwrap();
        assert_eq!(job.attempts, 2);
        assert_eq!(job.last_error.as_deref(), Some("smtp down"));
    }

    #[test]
    fn test_complete_fail_and_requeue() {
        let db = pool::in_memory().unwrap();
        let conn = db.get().unwrap();

        let a = enqueue(&conn, "a", "{}", 1).unwrap();
        let b = enqueue(&conn, "b", "{}", 1).unwrap();
        let c = enqueue(&conn, "c", "{}", 1).unwrap();
        claim_next(&conn).unwrap();
        claim_next(&conn).unwrap();
        claim_next(&conn).unwrap();

        complete(&conn, a).unwrap();
        mark_failed(&conn, b, "boom").unwrap();
        assert_eq!(requeue_stale(&conn).unwrap(), 1);

        assert_eq!(get(&conn, a).unwrap().unwrap().status, JobStatus::Completed);
        assert_eq!(get(&conn, b).unwrap().unwrap().status, JobStatus::Failed);
        assert_eq!(get(&conn, c).unwrap().unwrap().status, JobStatus::Pending);
        assert_eq!(count_by_status(&conn, JobStatus::Failed).unwrap(), 1);
        assert_eq!(delete_completed(&conn).unwrap(), 1);
    }
}
