//! Mailbox rows and the `mailbox_user` access pivot.

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;

use super::{now_ms, to_datetime};
use crate::encryption::CredentialCipher;
use crate::error::HelpdeskError;
use crate::types::{
    AccessLevel, Encryption, InProtocol, InboundSettings, Mailbox, NewMailbox, OutMethod,
    OutboundSettings,
};

const COLUMNS: &str = "id, name, email, from_name,
    in_server, in_port, in_protocol, in_encryption, in_username, in_password, in_imap_folders,
    out_method, out_server, out_port, out_encryption, out_username, out_password,
    auto_reply_enabled, auto_reply_subject, auto_reply_message, created_at, updated_at";

/// Maps a row with passwords still sealed; see `open_passwords`.
fn row_to_mailbox(row: &Row) -> rusqlite::Result<Mailbox> {
    let folders_json: String = row.get(10)?;
    Ok(Mailbox {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        from_name: row.get(3)?,
        inbound: InboundSettings {
            server: row.get(4)?,
            port: row.get(5)?,
            protocol: InProtocol::from_str(&row.get::<_, String>(6)?),
            encryption: Encryption::from_str(&row.get::<_, String>(7)?),
            username: row.get(8)?,
            password: row.get(9)?,
            imap_folders: serde_json::from_str(&folders_json).unwrap_or_default(),
        },
        outbound: OutboundSettings {
            method: OutMethod::from_str(&row.get::<_, String>(11)?),
            server: row.get(12)?,
            port: row.get(13)?,
            encryption: Encryption::from_str(&row.get::<_, String>(14)?),
            username: row.get(15)?,
            password: row.get(16)?,
        },
        auto_reply_enabled: row.get::<_, i64>(17)? != 0,
        auto_reply_subject: row.get(18)?,
        auto_reply_message: row.get(19)?,
        created_at: to_datetime(row.get(20)?),
        updated_at: to_datetime(row.get(21)?),
    })
}

fn open_passwords(mut mailbox: Mailbox, cipher: &CredentialCipher) -> Result<Mailbox, HelpdeskError> {
    mailbox.inbound.password = cipher.open(&mailbox.inbound.password)?;
    mailbox.outbound.password = cipher.open(&mailbox.outbound.password)?;
    Ok(mailbox)
}

pub fn insert(
    conn: &Connection,
    cipher: &CredentialCipher,
    mailbox: &NewMailbox,
) -> Result<i64, HelpdeskError> {
    let now = now_ms();
    conn.execute(
        "INSERT INTO mailboxes (
            name, email, from_name,
            in_server, in_port, in_protocol, in_encryption, in_username, in_password, in_imap_folders,
            out_method, out_server, out_port, out_encryption, out_username, out_password,
            auto_reply_enabled, auto_reply_subject, auto_reply_message, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?20)",
        params![
            mailbox.name,
            mailbox.email,
            mailbox.from_name,
            mailbox.inbound.server,
            mailbox.inbound.port,
            mailbox.inbound.protocol.as_str(),
            mailbox.inbound.encryption.as_str(),
            mailbox.inbound.username,
            cipher.seal(&mailbox.inbound.password)?,
            serde_json::to_string(&mailbox.inbound.imap_folders)?,
            mailbox.outbound.method.as_str(),
            mailbox.outbound.server,
            mailbox.outbound.port,
            mailbox.outbound.encryption.as_str(),
            mailbox.outbound.username,
            cipher.seal(&mailbox.outbound.password)?,
            mailbox.auto_reply_enabled as i64,
            mailbox.auto_reply_subject,
            mailbox.auto_reply_message,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get(
    conn: &Connection,
    cipher: &CredentialCipher,
    id: i64,
) -> Result<Option<Mailbox>, HelpdeskError> {
    let sql = format!("SELECT {} FROM mailboxes WHERE id = ?1", COLUMNS);
    let mailbox = conn.query_row(&sql, params![id], row_to_mailbox).optional()?;
    mailbox.map(|m| open_passwords(m, cipher)).transpose()
}

pub fn list(conn: &Connection, cipher: &CredentialCipher) -> Result<Vec<Mailbox>, HelpdeskError> {
    let sql = format!("SELECT {} FROM mailboxes ORDER BY id", COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_mailbox)?;

    let mut mailboxes = Vec::new();
    for row in rows {
        mailboxes.push(open_passwords(row?, cipher)?);
    }
    Ok(mailboxes)
}

pub fn set_auto_reply(
    conn: &Connection,
    id: i64,
    enabled: bool,
    subject: Option<&str>,
    message: Option<&str>,
) -> Result<(), HelpdeskError> {
    let changed = conn.execute(
        "UPDATE mailboxes SET auto_reply_enabled = ?1, auto_reply_subject = ?2,
                auto_reply_message = ?3, updated_at = ?4
         WHERE id = ?5",
        params![enabled as i64, subject, message, now_ms(), id],
    )?;
    if changed == 0 {
        return Err(HelpdeskError::NotFound(format!("mailbox {}", id)));
    }
    Ok(())
}

pub fn delete(conn: &Connection, id: i64) -> Result<(), HelpdeskError> {
    conn.execute("DELETE FROM mailboxes WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn count(conn: &Connection) -> Result<i64, HelpdeskError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM mailboxes", [], |row| row.get(0))?)
}

// ---------------------------------------------------------------------------
// Access pivot
// ---------------------------------------------------------------------------

pub fn set_access(
    conn: &Connection,
    mailbox_id: i64,
    user_id: i64,
    access: AccessLevel,
) -> Result<(), HelpdeskError> {
    conn.execute(
        "INSERT INTO mailbox_user (mailbox_id, user_id, access) VALUES (?1, ?2, ?3)
         ON CONFLICT(mailbox_id, user_id) DO UPDATE SET access = excluded.access",
        params![mailbox_id, user_id, access.code()],
    )?;
    Ok(())
}

pub fn remove_access(conn: &Connection, mailbox_id: i64, user_id: i64) -> Result<(), HelpdeskError> {
    conn.execute(
        "DELETE FROM mailbox_user WHERE mailbox_id = ?1 AND user_id = ?2",
        params![mailbox_id, user_id],
    )?;
    Ok(())
}

pub fn remove_all_access_for_mailbox(conn: &Connection, mailbox_id: i64) -> Result<(), HelpdeskError> {
    conn.execute("DELETE FROM mailbox_user WHERE mailbox_id = ?1", params![mailbox_id])?;
    Ok(())
}

pub fn remove_all_access_for_user(conn: &Connection, user_id: i64) -> Result<(), HelpdeskError> {
    conn.execute("DELETE FROM mailbox_user WHERE user_id = ?1", params![user_id])?;
    Ok(())
}

/// Access level per mailbox for one user. Mailboxes without a row are absent.
pub fn access_map_for_user(
    conn: &Connection,
    user_id: i64,
) -> Result<HashMap<i64, AccessLevel>, HelpdeskError> {
    let mut stmt = conn.prepare("SELECT mailbox_id, access FROM mailbox_user WHERE user_id = ?1")?;
    let rows = stmt.query_map(params![user_id], |row| {
        Ok((row.get::<_, i64>(0)?, AccessLevel::from_code(row.get(1)?)))
    })?;

    let mut map = HashMap::new();
    for row in rows {
        let (mailbox_id, access) = row?;
        map.insert(mailbox_id, access);
    }
    Ok(map)
}

/// Ids of users with at least `min` access to the mailbox.
pub fn user_ids_with_access(
    conn: &Connection,
    mailbox_id: i64,
    min: AccessLevel,
) -> Result<Vec<i64>, HelpdeskError> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM mailbox_user WHERE mailbox_id = ?1 AND access >= ?2 ORDER BY user_id",
    )?;
    let rows = stmt.query_map(params![mailbox_id, min.code()], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<i64>, _>>()?)
}
