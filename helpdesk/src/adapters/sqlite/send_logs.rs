use rusqlite::{params, Connection, Row};

use super::{now_ms, to_datetime};
use crate::error::HelpdeskError;
use crate::types::{MailType, NewSendLog, SendLog, SendStatus};

const COLUMNS: &str = "id, thread_id, customer_id, user_id, message_id, email, mail_type,
    status, status_message, opens, clicks, created_at";

fn row_to_send_log(row: &Row) -> rusqlite::Result<SendLog> {
    Ok(SendLog {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        customer_id: row.get(2)?,
        user_id: row.get(3)?,
        message_id: row.get(4)?,
        email: row.get(5)?,
        mail_type: MailType::from_str(&row.get::<_, String>(6)?),
        status: SendStatus::from_str(&row.get::<_, String>(7)?),
        status_message: row.get(8)?,
        opens: row.get(9)?,
        clicks: row.get(10)?,
        created_at: to_datetime(row.get(11)?),
    })
}

pub fn insert(conn: &Connection, log: &NewSendLog) -> Result<i64, HelpdeskError> {
    conn.execute(
        "INSERT INTO send_logs (
            thread_id, customer_id, user_id, message_id, email, mail_type,
            status, status_message, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            log.thread_id,
            log.customer_id,
            log.user_id,
            log.message_id,
            log.email,
            log.mail_type.as_str(),
            log.status.as_str(),
            log.status_message,
            now_ms(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Logs for one `(thread, user)` notification pair, oldest first.
pub fn list_for_thread_user(
    conn: &Connection,
    thread_id: i64,
    user_id: i64,
) -> Result<Vec<SendLog>, HelpdeskError> {
    let sql = format!(
        "SELECT {} FROM send_logs WHERE thread_id = ?1 AND user_id = ?2 ORDER BY id",
        COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![thread_id, user_id], row_to_send_log)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Whether `user_id` already got a `mail_type` mail whose Message-ID starts
/// with `message_id_prefix` without a send error.
pub fn delivered_to_user(
    conn: &Connection,
    mail_type: MailType,
    user_id: i64,
    message_id_prefix: &str,
) -> Result<bool, HelpdeskError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM send_logs
         WHERE mail_type = ?1 AND user_id = ?2
           AND substr(message_id, 1, length(?3)) = ?3 AND status != ?4",
        params![mail_type.as_str(), user_id, message_id_prefix, SendStatus::SendError.as_str()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn list_by_type(conn: &Connection, mail_type: MailType) -> Result<Vec<SendLog>, HelpdeskError> {
    let sql = format!("SELECT {} FROM send_logs WHERE mail_type = ?1 ORDER BY id", COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![mail_type.as_str()], row_to_send_log)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Record a delivery status change reported for an outbound Message-ID.
pub fn update_status(
    conn: &Connection,
    message_id: &str,
    status: SendStatus,
    status_message: Option<&str>,
) -> Result<usize, HelpdeskError> {
    Ok(conn.execute(
        "UPDATE send_logs SET status = ?1, status_message = COALESCE(?2, status_message)
         WHERE message_id = ?3",
        params![status.as_str(), status_message, message_id],
    )?)
}

pub fn record_open(conn: &Connection, message_id: &str) -> Result<usize, HelpdeskError> {
    Ok(conn.execute(
        "UPDATE send_logs SET opens = opens + 1, status = 'opened'
         WHERE message_id = ?1 AND status != 'clicked'",
        params![message_id],
    )?)
}

pub fn record_click(conn: &Connection, message_id: &str) -> Result<usize, HelpdeskError> {
    Ok(conn.execute(
        "UPDATE send_logs SET clicks = clicks + 1, status = 'clicked' WHERE message_id = ?1",
        params![message_id],
    )?)
}

pub fn count(conn: &Connection) -> Result<i64, HelpdeskError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM send_logs", [], |row| row.get(0))?)
}
