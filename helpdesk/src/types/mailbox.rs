use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transport encryption for inbound and outbound connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encryption {
    #[default]
    None,
    /// Implicit TLS (IMAPS 993, SMTPS 465)
    Ssl,
    /// STARTTLS upgrade on a plain connection
    Tls,
}

impl Encryption {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Ssl => "ssl",
            Self::Tls => "tls",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "ssl" => Self::Ssl,
            "tls" | "starttls" => Self::Tls,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InProtocol {
    #[default]
    Imap,
    Pop3,
}

impl InProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Imap => "imap",
            Self::Pop3 => "pop3",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pop3" => Self::Pop3,
            _ => Self::Imap,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutMethod {
    #[default]
    Smtp,
    Sendmail,
}

impl OutMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Smtp => "smtp",
            Self::Sendmail => "sendmail",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "sendmail" => Self::Sendmail,
            _ => Self::Smtp,
        }
    }
}

/// Inbound (fetch) connection settings of a mailbox.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundSettings {
    pub server: String,
    pub port: u16,
    pub protocol: InProtocol,
    pub encryption: Encryption,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// IMAP folders to fetch from; empty means INBOX
    #[serde(default)]
    pub imap_folders: Vec<String>,
}

impl InboundSettings {
    pub fn folders(&self) -> Vec<String> {
        if self.imap_folders.is_empty() {
            vec!["INBOX".to_string()]
        } else {
            self.imap_folders.clone()
        }
    }
}

/// Outbound (send) transport settings, used by mailboxes and the system mailer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboundSettings {
    #[serde(default)]
    pub method: OutMethod,
    #[serde(default)]
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub encryption: Encryption,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
}

fn default_smtp_port() -> u16 {
    587
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mailbox {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub from_name: Option<String>,
    pub inbound: InboundSettings,
    pub outbound: OutboundSettings,
    pub auto_reply_enabled: bool,
    pub auto_reply_subject: Option<String>,
    pub auto_reply_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mailbox {
    /// Display name used in From headers.
    pub fn sender_name(&self) -> &str {
        self.from_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewMailbox {
    pub name: String,
    pub email: String,
    pub from_name: Option<String>,
    pub inbound: InboundSettings,
    pub outbound: OutboundSettings,
    pub auto_reply_enabled: bool,
    pub auto_reply_subject: Option<String>,
    pub auto_reply_message: Option<String>,
}

/// Per-user access level on a mailbox (`mailbox_user.access`). Ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    None,
    View,
    Reply,
    Admin,
}

impl AccessLevel {
    pub fn code(&self) -> i64 {
        match self {
            Self::None => 0,
            Self::View => 10,
            Self::Reply => 20,
            Self::Admin => 30,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            c if c >= 30 => Self::Admin,
            c if c >= 20 => Self::Reply,
            c if c >= 10 => Self::View,
            _ => Self::None,
        }
    }
}
