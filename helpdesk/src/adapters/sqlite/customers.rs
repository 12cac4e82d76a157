//! Customers and their (sanitized) email addresses.

use rusqlite::{params, Connection, OptionalExtension};

use super::{now_ms, to_datetime};
use crate::error::HelpdeskError;
use crate::types::Customer;

pub fn get(conn: &Connection, id: i64) -> Result<Option<Customer>, HelpdeskError> {
    let row = conn
        .query_row(
            "SELECT id, first_name, last_name, created_at FROM customers WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;

    let Some((id, first_name, last_name, created_at)) = row else {
        return Ok(None);
    };

    Ok(Some(Customer {
        id,
        first_name,
        last_name,
        emails: emails_for(conn, id)?,
        created_at: to_datetime(created_at),
    }))
}

pub fn emails_for(conn: &Connection, customer_id: i64) -> Result<Vec<String>, HelpdeskError> {
    let mut stmt =
        conn.prepare("SELECT email FROM customer_emails WHERE customer_id = ?1 ORDER BY id")?;
    let rows = stmt.query_map(params![customer_id], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<String>, _>>()?)
}

pub fn find_by_email(conn: &Connection, email: &str) -> Result<Option<Customer>, HelpdeskError> {
    let id: Option<i64> = conn
        .query_row(
            "SELECT customer_id FROM customer_emails WHERE email = ?1",
            params![email],
            |row| row.get(0),
        )
        .optional()?;

    match id {
        Some(id) => get(conn, id),
        None => Ok(None),
    }
}

/// Find the customer owning `email` (already sanitized) or create one.
pub fn find_or_create(
    conn: &Connection,
    email: &str,
    first_name: Option<&str>,
    last_name: Option<&str>,
) -> Result<Customer, HelpdeskError> {
    if let Some(customer) = find_by_email(conn, email)? {
        return Ok(customer);
    }

    conn.execute(
        "INSERT INTO customers (first_name, last_name, created_at) VALUES (?1, ?2, ?3)",
        params![first_name, last_name, now_ms()],
    )?;
    let id = conn.last_insert_rowid();
    add_email(conn, id, email)?;

    get(conn, id)?.ok_or_else(|| HelpdeskError::NotFound(format!("customer {}", id)))
}

pub fn add_email(conn: &Connection, customer_id: i64, email: &str) -> Result<(), HelpdeskError> {
    conn.execute(
        "INSERT OR IGNORE INTO customer_emails (customer_id, email) VALUES (?1, ?2)",
        params![customer_id, email],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, id: i64) -> Result<(), HelpdeskError> {
    conn.execute("DELETE FROM customer_emails WHERE customer_id = ?1", params![id])?;
    conn.execute("DELETE FROM customers WHERE id = ?1", params![id])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::pool;

    #[test]
    fn test_find_or_create_reuses_email() {
        let db = pool::in_memory().unwrap();
        let conn = db.get().unwrap();

        let first = find_or_create(&conn, "jane@example.com", Some("Jane"), None).unwrap();
        let again = find_or_create(&conn, "jane@example.com", Some("Other"), None).unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(again.first_name.as_deref(), Some("Jane"));
        assert_eq!(again.emails, vec!["jane@example.com".to_string()]);
        assert_eq!(again.display_name(), "Jane");
    }

    #[test]
    fn test_delete_removes_emails() {
        let db = pool::in_memory().unwrap();
        let conn = db.get().unwrap();

        let customer = find_or_create(&conn, "gone@example.com", None, None).unwrap();
        assert_eq!(customer.display_name(), "gone@example.com");
        delete(&conn, customer.id).unwrap();

        assert!(get(&conn, customer.id).unwrap().is_none());
        assert!(find_by_email(&conn, "gone@example.com").unwrap().is_none());
    }
}
