use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{now_ms, to_datetime};
use crate::error::HelpdeskError;
use crate::types::{InviteState, NewUser, User, UserRole, UserStatus};

const COLUMNS: &str = "id, first_name, last_name, email, role, status, invite_state, created_at";

fn row_to_user(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        email: row.get(3)?,
        role: UserRole::from_str(&row.get::<_, String>(4)?),
        status: UserStatus::from_str(&row.get::<_, String>(5)?),
        invite_state: InviteState::from_str(&row.get::<_, String>(6)?),
        created_at: to_datetime(row.get(7)?),
    })
}

pub fn insert(conn: &Connection, user: &NewUser) -> Result<i64, HelpdeskError> {
    conn.execute(
        "INSERT INTO users (first_name, last_name, email, role, status, invite_state, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            user.first_name,
            user.last_name,
            user.email,
            user.role.as_str(),
            user.status.as_str(),
            user.invite_state.as_str(),
            now_ms(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<User>, HelpdeskError> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", COLUMNS);
    Ok(conn.query_row(&sql, params![id], row_to_user).optional()?)
}

pub fn get_many(conn: &Connection, ids: &[i64]) -> Result<Vec<User>, HelpdeskError> {
    let mut users = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(user) = get(conn, *id)? {
            users.push(user);
        }
    }
    Ok(users)
}

pub fn list_admins(conn: &Connection) -> Result<Vec<User>, HelpdeskError> {
    let sql = format!("SELECT {} FROM users WHERE role = 'admin' ORDER BY id", COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_user)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn set_status(conn: &Connection, id: i64, status: UserStatus) -> Result<(), HelpdeskError> {
    let changed = conn.execute(
        "UPDATE users SET status = ?1 WHERE id = ?2",
        params![status.as_str(), id],
    )?;
    if changed == 0 {
        return Err(HelpdeskError::NotFound(format!("user {}", id)));
    }
    Ok(())
}

pub fn set_invite_state(conn: &Connection, id: i64, state: InviteState) -> Result<(), HelpdeskError> {
    conn.execute(
        "UPDATE users SET invite_state = ?1 WHERE id = ?2",
        params![state.as_str(), id],
    )?;
    Ok(())
}
