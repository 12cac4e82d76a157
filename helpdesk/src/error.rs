//! Unified error type for the helpdesk services
//!
//! Variants carry plain strings so errors can be stored in the job queue
//! (`jobs.last_error`) and logged without holding on to driver types.

use serde::Serialize;

#[derive(Debug, Clone, thiserror::Error)]
pub enum HelpdeskError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IMAP error: {0}")]
    Imap(String),

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Job timed out after {0}s")]
    Timeout(u64),

    #[error("{0}")]
    Other(String),
}

// Serialize as a plain string so errors can be embedded in JSON payloads.
impl Serialize for HelpdeskError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<r2d2::Error> for HelpdeskError {
    fn from(e: r2d2::Error) -> Self {
        HelpdeskError::Database(e.to_string())
    }
}

impl From<rusqlite::Error> for HelpdeskError {
    fn from(e: rusqlite::Error) -> Self {
        HelpdeskError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for HelpdeskError {
    fn from(e: serde_json::Error) -> Self {
        HelpdeskError::Parse(e.to_string())
    }
}

impl From<toml::de::Error> for HelpdeskError {
    fn from(e: toml::de::Error) -> Self {
        HelpdeskError::Config(e.to_string())
    }
}

impl From<std::io::Error> for HelpdeskError {
    fn from(e: std::io::Error) -> Self {
        HelpdeskError::Io(e.to_string())
    }
}

impl From<mailparse::MailParseError> for HelpdeskError {
    fn from(e: mailparse::MailParseError) -> Self {
        HelpdeskError::Parse(e.to_string())
    }
}

impl From<lettre::error::Error> for HelpdeskError {
    fn from(e: lettre::error::Error) -> Self {
        HelpdeskError::Smtp(e.to_string())
    }
}

impl From<lettre::address::AddressError> for HelpdeskError {
    fn from(e: lettre::address::AddressError) -> Self {
        HelpdeskError::InvalidInput(e.to_string())
    }
}

impl From<&str> for HelpdeskError {
    fn from(e: &str) -> Self {
        HelpdeskError::Other(e.to_string())
    }
}

/// Result type alias using HelpdeskError
pub type Result<T> = std::result::Result<T, HelpdeskError>;
