//! Conversation rows plus the follower and star pivots.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{now_ms, to_datetime, to_datetime_opt};
use crate::error::HelpdeskError;
use crate::types::{
    Conversation, ConversationMeta, ConversationState, ConversationStatus, NewConversation,
};

const COLUMNS: &str = "id, number, mailbox_id, folder_id, user_id, customer_id, customer_email,
    status, state, subject, preview, threads_count, meta, closed_at, last_reply_at,
    created_at, updated_at";

fn row_to_conversation(row: &Row) -> rusqlite::Result<Conversation> {
    let meta_json: String = row.get(12)?;
    Ok(Conversation {
        id: row.get(0)?,
        number: row.get(1)?,
        mailbox_id: row.get(2)?,
        folder_id: row.get(3)?,
        user_id: row.get(4)?,
        customer_id: row.get(5)?,
        customer_email: row.get(6)?,
        status: ConversationStatus::from_str(&row.get::<_, String>(7)?),
        state: ConversationState::from_str(&row.get::<_, String>(8)?),
        subject: row.get(9)?,
        preview: row.get(10)?,
        threads_count: row.get(11)?,
        meta: serde_json::from_str(&meta_json).unwrap_or_default(),
        closed_at: to_datetime_opt(row.get(13)?),
        last_reply_at: to_datetime_opt(row.get(14)?),
        created_at: to_datetime(row.get(15)?),
        updated_at: to_datetime(row.get(16)?),
    })
}

pub fn insert(conn: &Connection, conversation: &NewConversation) -> Result<i64, HelpdeskError> {
    let now = now_ms();
    let closed_at = (conversation.status == ConversationStatus::Closed).then_some(now);

    conn.execute(
        "INSERT INTO conversations (
            number, mailbox_id, user_id, customer_id, customer_email,
            status, state, subject, preview, meta, closed_at, created_at, updated_at
        ) VALUES (
            (SELECT COALESCE(MAX(number), 0) + 1 FROM conversations),
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11
        )",
        params![
            conversation.mailbox_id,
            conversation.user_id,
            conversation.customer_id,
            conversation.customer_email,
            conversation.status.as_str(),
            conversation.state.as_str(),
            conversation.subject,
            conversation.preview,
            serde_json::to_string(&conversation.meta)?,
            closed_at,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<Conversation>, HelpdeskError> {
    let sql = format!("SELECT {} FROM conversations WHERE id = ?1", COLUMNS);
    Ok(conn.query_row(&sql, params![id], row_to_conversation).optional()?)
}

/// Like `get` but a missing row is an error.
pub fn require(conn: &Connection, id: i64) -> Result<Conversation, HelpdeskError> {
    get(conn, id)?.ok_or_else(|| HelpdeskError::NotFound(format!("conversation {}", id)))
}

fn ids_where(conn: &Connection, clause: &str, value: i64) -> Result<Vec<i64>, HelpdeskError> {
    let sql = format!("SELECT id FROM conversations WHERE {} = ?1 ORDER BY id", clause);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![value], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<i64>, _>>()?)
}

pub fn ids_for_mailbox(conn: &Connection, mailbox_id: i64) -> Result<Vec<i64>, HelpdeskError> {
    ids_where(conn, "mailbox_id", mailbox_id)
}

pub fn ids_for_customer(conn: &Connection, customer_id: i64) -> Result<Vec<i64>, HelpdeskError> {
    ids_where(conn, "customer_id", customer_id)
}

pub fn ids_assigned_to(conn: &Connection, user_id: i64) -> Result<Vec<i64>, HelpdeskError> {
    ids_where(conn, "user_id", user_id)
}

/// Conversation in `mailbox_id` that one of the message ids belongs to: either
/// a stored thread's own Message-ID or one we generated when sending from it.
pub fn find_by_message_ids(
    conn: &Connection,
    mailbox_id: i64,
    message_ids: &[String],
) -> Result<Option<i64>, HelpdeskError> {
    let mut stmt = conn.prepare(
        "SELECT c.id FROM conversations c
         JOIN threads t ON t.conversation_id = c.id
         WHERE c.mailbox_id = ?1 AND c.state != 'deleted'
           AND (t.message_id = ?2
                OR t.id IN (SELECT thread_id FROM send_logs
                            WHERE message_id = ?2 AND thread_id IS NOT NULL))
         LIMIT 1",
    )?;

    for message_id in message_ids {
        let found: Option<i64> = stmt
            .query_row(params![mailbox_id, message_id], |row| row.get(0))
            .optional()?;
        if found.is_some() {
            return Ok(found);
        }
    }
    Ok(None)
}

pub fn set_folder(conn: &Connection, id: i64, folder_id: i64) -> Result<(), HelpdeskError> {
    conn.execute(
        "UPDATE conversations SET folder_id = ?1 WHERE id = ?2",
        params![folder_id, id],
    )?;
    Ok(())
}

pub fn set_status(
    conn: &Connection,
    id: i64,
    status: ConversationStatus,
    closed_at: Option<DateTime<Utc>>,
) -> Result<(), HelpdeskError> {
    conn.execute(
        "UPDATE conversations SET status = ?1, closed_at = ?2, updated_at = ?3 WHERE id = ?4",
        params![status.as_str(), closed_at.map(|d| d.timestamp_millis()), now_ms(), id],
    )?;
    Ok(())
}

pub fn set_state(conn: &Connection, id: i64, state: ConversationState) -> Result<(), HelpdeskError> {
    conn.execute(
        "UPDATE conversations SET state = ?1, updated_at = ?2 WHERE id = ?3",
        params![state.as_str(), now_ms(), id],
    )?;
    Ok(())
}

pub fn set_user(conn: &Connection, id: i64, user_id: Option<i64>) -> Result<(), HelpdeskError> {
    conn.execute(
        "UPDATE conversations SET user_id = ?1, updated_at = ?2 WHERE id = ?3",
        params![user_id, now_ms(), id],
    )?;
    Ok(())
}

pub fn set_meta(conn: &Connection, id: i64, meta: &ConversationMeta) -> Result<(), HelpdeskError> {
    conn.execute(
        "UPDATE conversations SET meta = ?1, updated_at = ?2 WHERE id = ?3",
        params![serde_json::to_string(meta)?, now_ms(), id],
    )?;
    Ok(())
}

/// Bump `threads_count` and refresh the preview after a thread is added.
pub fn record_thread(
    conn: &Connection,
    id: i64,
    preview: Option<&str>,
    last_reply_at: Option<DateTime<Utc>>,
) -> Result<(), HelpdeskError> {
    conn.execute(
        "UPDATE conversations
         SET threads_count = threads_count + 1,
             preview = COALESCE(?1, preview),
             last_reply_at = COALESCE(?2, last_reply_at),
             updated_at = ?3
         WHERE id = ?4",
        params![preview, last_reply_at.map(|d| d.timestamp_millis()), now_ms(), id],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, id: i64) -> Result<(), HelpdeskError> {
    conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
    Ok(())
}

/// `(total, active)` of the conversations whose `folder_id` is this folder.
pub fn count_in_folder(conn: &Connection, folder_id: i64) -> Result<(i64, i64), HelpdeskError> {
    Ok(conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = 'active' THEN 1 ELSE 0 END), 0)
         FROM conversations WHERE folder_id = ?1",
        params![folder_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?)
}

// ---------------------------------------------------------------------------
// Followers
// ---------------------------------------------------------------------------

pub fn add_follower(conn: &Connection, conversation_id: i64, user_id: i64) -> Result<(), HelpdeskError> {
    conn.execute(
        "INSERT OR IGNORE INTO followers (conversation_id, user_id) VALUES (?1, ?2)",
        params![conversation_id, user_id],
    )?;
    Ok(())
}

pub fn remove_follower(conn: &Connection, conversation_id: i64, user_id: i64) -> Result<(), HelpdeskError> {
    conn.execute(
        "DELETE FROM followers WHERE conversation_id = ?1 AND user_id = ?2",
        params![conversation_id, user_id],
    )?;
    Ok(())
}

pub fn follower_ids(conn: &Connection, conversation_id: i64) -> Result<Vec<i64>, HelpdeskError> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM followers WHERE conversation_id = ?1 ORDER BY user_id")?;
    let rows = stmt.query_map(params![conversation_id], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<i64>, _>>()?)
}

pub fn remove_followers_of_conversation(conn: &Connection, conversation_id: i64) -> Result<(), HelpdeskError> {
    conn.execute("DELETE FROM followers WHERE conversation_id = ?1", params![conversation_id])?;
    Ok(())
}

pub fn remove_follows_by_user(conn: &Connection, user_id: i64) -> Result<(), HelpdeskError> {
    conn.execute("DELETE FROM followers WHERE user_id = ?1", params![user_id])?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Stars
// ---------------------------------------------------------------------------

/// Returns false if the star already existed.
pub fn add_star(conn: &Connection, conversation_id: i64, user_id: i64) -> Result<bool, HelpdeskError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO stars (conversation_id, user_id) VALUES (?1, ?2)",
        params![conversation_id, user_id],
    )?;
    Ok(inserted > 0)
}

/// Returns false if there was no star.
pub fn remove_star(conn: &Connection, conversation_id: i64, user_id: i64) -> Result<bool, HelpdeskError> {
    let removed = conn.execute(
        "DELETE FROM stars WHERE conversation_id = ?1 AND user_id = ?2",
        params![conversation_id, user_id],
    )?;
    Ok(removed > 0)
}

pub fn star_user_ids(conn: &Connection, conversation_id: i64) -> Result<Vec<i64>, HelpdeskError> {
    let mut stmt = conn.prepare("SELECT user_id FROM stars WHERE conversation_id = ?1")?;
    let rows = stmt.query_map(params![conversation_id], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<i64>, _>>()?)
}

pub fn starred_ids_for_user(conn: &Connection, user_id: i64) -> Result<Vec<i64>, HelpdeskError> {
    let mut stmt = conn.prepare("SELECT conversation_id FROM stars WHERE user_id = ?1")?;
    let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<i64>, _>>()?)
}

pub fn remove_stars_of_conversation(conn: &Connection, conversation_id: i64) -> Result<(), HelpdeskError> {
    conn.execute("DELETE FROM stars WHERE conversation_id = ?1", params![conversation_id])?;
    Ok(())
}

/// `(total, active)` of conversations the user starred in a mailbox.
pub fn count_starred(conn: &Connection, mailbox_id: i64, user_id: i64) -> Result<(i64, i64), HelpdeskError> {
    Ok(conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(CASE WHEN c.status = 'active' THEN 1 ELSE 0 END), 0)
         FROM stars s JOIN conversations c ON c.id = s.conversation_id
         WHERE s.user_id = ?1 AND c.mailbox_id = ?2",
        params![user_id, mailbox_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?)
}
