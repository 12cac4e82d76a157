//! Infrastructure adapters: SQLite storage, IMAP for inbound mail and
//! lettre for outbound mail.

pub mod imap;
pub mod smtp;
pub mod sqlite;
