use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{now_ms, to_datetime};
use crate::error::HelpdeskError;
use crate::types::{ConversationStatus, NewThread, Thread, ThreadState, ThreadType};

const COLUMNS: &str = "id, conversation_id, type, state, status, body, headers, from_address,
    to_addresses, cc_addresses, bcc_addresses, message_id, in_reply_to,
    created_by_user_id, created_by_customer_id, created_at";

fn parse_addresses(json: &str) -> Vec<String> {
    serde_json::from_str(json).unwrap_or_default()
}

fn row_to_thread(row: &Row) -> rusqlite::Result<Thread> {
    Ok(Thread {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        thread_type: ThreadType::from_str(&row.get::<_, String>(2)?),
        state: ThreadState::from_str(&row.get::<_, String>(3)?),
        status: ConversationStatus::from_str(&row.get::<_, String>(4)?),
        body: row.get(5)?,
        headers: row.get(6)?,
        from: row.get(7)?,
        to: parse_addresses(&row.get::<_, String>(8)?),
        cc: parse_addresses(&row.get::<_, String>(9)?),
        bcc: parse_addresses(&row.get::<_, String>(10)?),
        message_id: row.get(11)?,
        in_reply_to: row.get(12)?,
        created_by_user_id: row.get(13)?,
        created_by_customer_id: row.get(14)?,
        created_at: to_datetime(row.get(15)?),
    })
}

/// Insert a thread, snapshotting the conversation's current status.
pub fn insert(
    conn: &Connection,
    thread: &NewThread,
    status: ConversationStatus,
) -> Result<i64, HelpdeskError> {
    conn.execute(
        "INSERT INTO threads (
            conversation_id, type, state, status, body, headers, from_address,
            to_addresses, cc_addresses, bcc_addresses, message_id, in_reply_to,
            created_by_user_id, created_by_customer_id, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            thread.conversation_id,
            thread.thread_type.as_str(),
            thread.state.as_str(),
            status.as_str(),
            thread.body,
            thread.headers,
            thread.from,
            serde_json::to_string(&thread.to)?,
            serde_json::to_string(&thread.cc)?,
            serde_json::to_string(&thread.bcc)?,
            thread.message_id,
            thread.in_reply_to,
            thread.created_by_user_id,
            thread.created_by_customer_id,
            now_ms(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<Thread>, HelpdeskError> {
    let sql = format!("SELECT {} FROM threads WHERE id = ?1", COLUMNS);
    Ok(conn.query_row(&sql, params![id], row_to_thread).optional()?)
}

pub fn get_many(conn: &Connection, ids: &[i64]) -> Result<Vec<Thread>, HelpdeskError> {
    let mut threads = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(thread) = get(conn, *id)? {
            threads.push(thread);
        }
    }
    threads.sort_by_key(|t| (t.created_at, t.id));
    Ok(threads)
}

/// Threads of a conversation, oldest first.
pub fn list_for_conversation(conn: &Connection, conversation_id: i64) -> Result<Vec<Thread>, HelpdeskError> {
    let sql = format!(
        "SELECT {} FROM threads WHERE conversation_id = ?1 ORDER BY created_at, id",
        COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![conversation_id], row_to_thread)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Whether a thread with this Message-ID was already imported into the mailbox.
pub fn message_id_exists(conn: &Connection, mailbox_id: i64, message_id: &str) -> Result<bool, HelpdeskError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM threads t
         JOIN conversations c ON c.id = t.conversation_id
         WHERE c.mailbox_id = ?1 AND t.message_id = ?2",
        params![mailbox_id, message_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Bounce threads written to a conversation since `since`.
pub fn count_bounces_since(
    conn: &Connection,
    conversation_id: i64,
    since: DateTime<Utc>,
) -> Result<i64, HelpdeskError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM threads
         WHERE conversation_id = ?1 AND type = 'bounce' AND created_at >= ?2",
        params![conversation_id, since.timestamp_millis()],
        |row| row.get(0),
    )?)
}

pub fn delete_for_conversation(conn: &Connection, conversation_id: i64) -> Result<usize, HelpdeskError> {
    Ok(conn.execute("DELETE FROM threads WHERE conversation_id = ?1", params![conversation_id])?)
}

/// Drop the customer reference from threads before the customer row goes away.
pub fn clear_customer(conn: &Connection, customer_id: i64) -> Result<(), HelpdeskError> {
    conn.execute(
        "UPDATE threads SET created_by_customer_id = NULL WHERE created_by_customer_id = ?1",
        params![customer_id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{conversations, mailboxes, pool};
    use crate::encryption::CredentialCipher;
    use crate::types::{NewConversation, NewMailbox};

    fn setup(conn: &Connection) -> (i64, i64) {
        let cipher = CredentialCipher::new("k").unwrap();
        let mailbox_id = mailboxes::insert(
            conn,
            &cipher,
            &NewMailbox {
                name: "Support".to_string(),
                email: "support@example.com".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        let conversation_id =
            conversations::insert(conn, &NewConversation::published(mailbox_id, "Hello")).unwrap();
        (mailbox_id, conversation_id)
    }

    #[test]
    fn test_insert_and_list() {
        let db = pool::in_memory().unwrap();
        let conn = db.get().unwrap();
        let (mailbox_id, conversation_id) = setup(&conn);

        let mut first = NewThread::new(conversation_id, ThreadType::Customer, "Hi there");
        first.message_id = Some("abc@mail.example.com".to_string());
        first.to = vec!["support@example.com".to_string()];
        insert(&conn, &first, ConversationStatus::Active).unwrap();
        insert(
            &conn,
            &NewThread::new(conversation_id, ThreadType::Note, "internal"),
            ConversationStatus::Pending,
        )
        .unwrap();

        let threads = list_for_conversation(&conn, conversation_id).unwrap();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].to, vec!["support@example.com".to_string()]);
        assert_eq!(threads[1].status, ConversationStatus::Pending);

        assert!(message_id_exists(&conn, mailbox_id, "abc@mail.example.com").unwrap());
        assert!(!message_id_exists(&conn, mailbox_id, "other@mail.example.com").unwrap());
    }

    #[test]
    fn test_count_bounces_since() {
        let db = pool::in_memory().unwrap();
        let conn = db.get().unwrap();
        let (_, conversation_id) = setup(&conn);

        for _ in 0..3 {
            insert(
                &conn,
                &NewThread::new(conversation_id, ThreadType::Bounce, "undeliverable"),
                ConversationStatus::Active,
            )
            .unwrap();
        }
        insert(
            &conn,
            &NewThread::new(conversation_id, ThreadType::Customer, "hi"),
            ConversationStatus::Active,
        )
        .unwrap();

        let hour_ago = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(count_bounces_since(&conn, conversation_id, hour_ago).unwrap(), 3);
        let future = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(count_bounces_since(&conn, conversation_id, future).unwrap(), 0);
    }
}
