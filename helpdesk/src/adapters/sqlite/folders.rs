use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::HelpdeskError;
use crate::types::{Folder, FolderType};

const COLUMNS: &str = "id, mailbox_id, user_id, type, total_count, active_count";

fn row_to_folder(row: &Row) -> rusqlite::Result<Folder> {
    let type_str: String = row.get(3)?;
    let folder_type = FolderType::from_str(&type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown folder type '{}'", type_str).into(),
        )
    })?;

    Ok(Folder {
        id: row.get(0)?,
        mailbox_id: row.get(1)?,
        user_id: row.get(2)?,
        folder_type,
        total_count: row.get(4)?,
        active_count: row.get(5)?,
    })
}

pub fn insert(
    conn: &Connection,
    mailbox_id: i64,
    user_id: Option<i64>,
    folder_type: FolderType,
) -> Result<i64, HelpdeskError> {
    conn.execute(
        "INSERT INTO folders (mailbox_id, user_id, type) VALUES (?1, ?2, ?3)",
        params![mailbox_id, user_id, folder_type.as_str()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<Folder>, HelpdeskError> {
    let sql = format!("SELECT {} FROM folders WHERE id = ?1", COLUMNS);
    Ok(conn.query_row(&sql, params![id], row_to_folder).optional()?)
}

/// Folder of a type in a mailbox. `user_id = None` matches mailbox-wide folders only.
pub fn find(
    conn: &Connection,
    mailbox_id: i64,
    folder_type: FolderType,
    user_id: Option<i64>,
) -> Result<Option<Folder>, HelpdeskError> {
    let sql = format!(
        "SELECT {} FROM folders WHERE mailbox_id = ?1 AND type = ?2 AND user_id IS ?3
         ORDER BY id LIMIT 1",
        COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![mailbox_id, folder_type.as_str(), user_id], row_to_folder)
        .optional()?)
}

pub fn list_for_mailbox(conn: &Connection, mailbox_id: i64) -> Result<Vec<Folder>, HelpdeskError> {
    let sql = format!("SELECT {} FROM folders WHERE mailbox_id = ?1 ORDER BY id", COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![mailbox_id], row_to_folder)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn list_personal(conn: &Connection, user_id: i64) -> Result<Vec<Folder>, HelpdeskError> {
    let sql = format!("SELECT {} FROM folders WHERE user_id = ?1 ORDER BY id", COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id], row_to_folder)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Add deltas to the denormalized counters, never going below zero.
pub fn adjust_counters(
    conn: &Connection,
    folder_id: i64,
    total_delta: i64,
    active_delta: i64,
) -> Result<(), HelpdeskError> {
    conn.execute(
        "UPDATE folders
         SET total_count = MAX(total_count + ?1, 0),
             active_count = MAX(active_count + ?2, 0)
         WHERE id = ?3",
        params![total_delta, active_delta, folder_id],
    )?;
    Ok(())
}

pub fn set_counters(
    conn: &Connection,
    folder_id: i64,
    total: i64,
    active: i64,
) -> Result<(), HelpdeskError> {
    conn.execute(
        "UPDATE folders SET total_count = ?1, active_count = ?2 WHERE id = ?3",
        params![total, active, folder_id],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, id: i64) -> Result<(), HelpdeskError> {
    conn.execute("DELETE FROM folders WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn delete_for_mailbox(conn: &Connection, mailbox_id: i64) -> Result<(), HelpdeskError> {
    conn.execute("DELETE FROM folders WHERE mailbox_id = ?1", params![mailbox_id])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{mailboxes, pool, users};
    use crate::encryption::CredentialCipher;
    use crate::types::{InviteState, NewMailbox, NewUser, UserRole, UserStatus};

    #[test]
    fn test_find_distinguishes_personal_folders() {
        let db = pool::in_memory().unwrap();
        let conn = db.get().unwrap();
        let cipher = CredentialCipher::new("k").unwrap();

        let mailbox_id = mailboxes::insert(
            &conn,
            &cipher,
            &NewMailbox {
                name: "Sales".to_string(),
                email: "sales@example.com".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        let user_id = users::insert(
            &conn,
            &NewUser {
                first_name: "Bo".to_string(),
                last_name: String::new(),
                email: "bo@example.com".to_string(),
                role: UserRole::User,
                status: UserStatus::Active,
                invite_state: InviteState::Activated,
            },
        )
        .unwrap();

        let shared = insert(&conn, mailbox_id, None, FolderType::Unassigned).unwrap();
        let personal = insert(&conn, mailbox_id, Some(user_id), FolderType::Assigned).unwrap();

        assert_eq!(find(&conn, mailbox_id, FolderType::Unassigned, None).unwrap().unwrap().id, shared);
        assert_eq!(
            find(&conn, mailbox_id, FolderType::Assigned, Some(user_id)).unwrap().unwrap().id,
            personal
        );
        assert!(find(&conn, mailbox_id, FolderType::Assigned, None).unwrap().is_none());
        assert!(find(&conn, mailbox_id, FolderType::Unassigned, Some(user_id)).unwrap().is_none());
    }

    #[test]
    fn test_counters_never_negative() {
        let db = pool::in_memory().unwrap();
        let conn = db.get().unwrap();
        let cipher = CredentialCipher::new("k").unwrap();

        let mailbox_id = mailboxes::insert(
            &conn,
            &cipher,
            &NewMailbox {
                name: "Sales".to_string(),
                email: "sales@example.com".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        let folder_id = insert(&conn, mailbox_id, None, FolderType::Spam).unwrap();

        adjust_counters(&conn, folder_id, 2, 1).unwrap();
        adjust_counters(&conn, folder_id, -5, -5).unwrap();

        let folder = get(&conn, folder_id).unwrap().unwrap();
        assert_eq!(folder.total_count, 0);
        assert_eq!(folder.active_count, 0);
    }
}
