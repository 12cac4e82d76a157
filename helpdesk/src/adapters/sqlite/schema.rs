use rusqlite::Connection;

use crate::error::HelpdeskError;

pub fn initialize_schema(conn: &Connection) -> Result<(), HelpdeskError> {
    conn.execute_batch("
        -- Support email accounts. Passwords are stored encrypted.
        CREATE TABLE IF NOT EXISTS mailboxes (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            name                TEXT NOT NULL,
            email               TEXT NOT NULL UNIQUE,
            from_name           TEXT,
            in_server           TEXT NOT NULL DEFAULT '',
            in_port             INTEGER NOT NULL DEFAULT 993,
            in_protocol         TEXT NOT NULL DEFAULT 'imap',
            in_encryption       TEXT NOT NULL DEFAULT 'ssl',
            in_username         TEXT NOT NULL DEFAULT '',
            in_password         TEXT NOT NULL DEFAULT '',
            in_imap_folders     TEXT NOT NULL DEFAULT '[]',    -- JSON array
            out_method          TEXT NOT NULL DEFAULT 'smtp',
            out_server          TEXT NOT NULL DEFAULT '',
            out_port            INTEGER NOT NULL DEFAULT 587,
            out_encryption      TEXT NOT NULL DEFAULT 'tls',
            out_username        TEXT NOT NULL DEFAULT '',
            out_password        TEXT NOT NULL DEFAULT '',
            auto_reply_enabled  INTEGER NOT NULL DEFAULT 0,
            auto_reply_subject  TEXT,
            auto_reply_message  TEXT,
            created_at          INTEGER NOT NULL,   -- unix epoch ms
            updated_at          INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            first_name      TEXT NOT NULL,
            last_name       TEXT NOT NULL DEFAULT '',
            email           TEXT NOT NULL UNIQUE,
            role            TEXT NOT NULL DEFAULT 'user',          -- 'user' | 'admin'
            status          TEXT NOT NULL DEFAULT 'active',        -- 'active' | 'inactive' | 'deleted'
            invite_state    TEXT NOT NULL DEFAULT 'not_invited',   -- 'activated' | 'sent' | 'not_invited'
            created_at      INTEGER NOT NULL
        );

        -- Mailbox membership with ordinal access level (10 view, 20 reply, 30 admin)
        CREATE TABLE IF NOT EXISTS mailbox_user (
            mailbox_id      INTEGER NOT NULL REFERENCES mailboxes(id),
            user_id         INTEGER NOT NULL REFERENCES users(id),
            access          INTEGER NOT NULL DEFAULT 10,
            PRIMARY KEY (mailbox_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS folders (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            mailbox_id      INTEGER NOT NULL REFERENCES mailboxes(id),
            user_id         INTEGER REFERENCES users(id),   -- set for personal folders
            type            TEXT NOT NULL,
            total_count     INTEGER NOT NULL DEFAULT 0,
            active_count    INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_folders_lookup ON folders(mailbox_id, type, user_id);

        CREATE TABLE IF NOT EXISTS customers (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            first_name      TEXT,
            last_name       TEXT,
            created_at      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS customer_emails (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            customer_id     INTEGER NOT NULL REFERENCES customers(id),
            email           TEXT NOT NULL UNIQUE    -- sanitized
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            number          INTEGER NOT NULL,
            mailbox_id      INTEGER NOT NULL REFERENCES mailboxes(id),
            folder_id       INTEGER REFERENCES folders(id),
            user_id         INTEGER REFERENCES users(id),
            customer_id     INTEGER REFERENCES customers(id),
            customer_email  TEXT,
            status          TEXT NOT NULL DEFAULT 'active',     -- 'active' | 'pending' | 'closed' | 'spam'
            state           TEXT NOT NULL DEFAULT 'published',  -- 'draft' | 'published' | 'deleted'
            subject         TEXT NOT NULL DEFAULT '',
            preview         TEXT NOT NULL DEFAULT '',
            threads_count   INTEGER NOT NULL DEFAULT 0,
            meta            TEXT NOT NULL DEFAULT '{}',          -- JSON
            closed_at       INTEGER,
            last_reply_at   INTEGER,
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_folder   ON conversations(folder_id);
        CREATE INDEX IF NOT EXISTS idx_conversations_mailbox  ON conversations(mailbox_id, status);
        CREATE INDEX IF NOT EXISTS idx_conversations_customer ON conversations(customer_id);

        CREATE TABLE IF NOT EXISTS threads (
            id                      INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id         INTEGER NOT NULL REFERENCES conversations(id),
            type                    TEXT NOT NULL,     -- 'customer' | 'message' | 'note' | 'lineitem' | 'bounce'
            state                   TEXT NOT NULL,     -- 'draft' | 'published'
            status                  TEXT NOT NULL,     -- conversation status when written
            body                    TEXT NOT NULL DEFAULT '',
            headers                 TEXT,
            from_address            TEXT,
            to_addresses            TEXT NOT NULL DEFAULT '[]',  -- JSON array
            cc_addresses            TEXT NOT NULL DEFAULT '[]',  -- JSON array
            bcc_addresses           TEXT NOT NULL DEFAULT '[]',  -- JSON array
            message_id              TEXT,              -- RFC 5322 Message-ID, no brackets
            in_reply_to             TEXT,
            created_by_user_id      INTEGER REFERENCES users(id),
            created_by_customer_id  INTEGER REFERENCES customers(id),
            created_at              INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_threads_conversation ON threads(conversation_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_threads_message_id   ON threads(message_id);

        CREATE TABLE IF NOT EXISTS followers (
            conversation_id INTEGER NOT NULL REFERENCES conversations(id),
            user_id         INTEGER NOT NULL REFERENCES users(id),
            PRIMARY KEY (conversation_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS stars (
            conversation_id INTEGER NOT NULL REFERENCES conversations(id),
            user_id         INTEGER NOT NULL REFERENCES users(id),
            PRIMARY KEY (conversation_id, user_id)
        );

        -- Outbound email audit. thread_id is kept after the thread is deleted.
        CREATE TABLE IF NOT EXISTS send_logs (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            thread_id       INTEGER,
            customer_id     INTEGER,
            user_id         INTEGER,
            message_id      TEXT NOT NULL,
            email           TEXT NOT NULL,
            mail_type       TEXT NOT NULL,
            status          TEXT NOT NULL,
            status_message  TEXT,
            opens           INTEGER NOT NULL DEFAULT 0,
            clicks          INTEGER NOT NULL DEFAULT 0,
            created_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_send_logs_thread  ON send_logs(thread_id, user_id);
        CREATE INDEX IF NOT EXISTS idx_send_logs_message ON send_logs(message_id);

        -- Persistent task queue
        CREATE TABLE IF NOT EXISTS jobs (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            job_type        TEXT NOT NULL,
            payload         TEXT NOT NULL,      -- JSON
            status          TEXT NOT NULL DEFAULT 'pending',  -- 'pending' | 'processing' | 'completed' | 'failed'
            attempts        INTEGER NOT NULL DEFAULT 0,
            max_tries       INTEGER NOT NULL,
            available_at    INTEGER NOT NULL,
            last_error      TEXT,
            created_at      INTEGER NOT NULL,
            completed_at    INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, available_at);
    ")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_creation() {
        let conn = Connection::open_in_memory().expect("Failed to open database");
        initialize_schema(&conn).expect("Failed to create schema");
        // Idempotent
        initialize_schema(&conn).expect("Failed to re-run schema");

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for table in [
            "mailboxes", "users", "mailbox_user", "folders", "customers",
            "customer_emails", "conversations", "threads", "followers",
            "stars", "send_logs", "jobs",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }
    }
}
