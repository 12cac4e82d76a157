use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Pending,
    Closed,
    Spam,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Pending => "pending",
            Self::Closed => "closed",
            Self::Spam => "spam",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "closed" => Self::Closed,
            "spam" => Self::Spam,
            _ => Self::Active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationState {
    Draft,
    Published,
    Deleted,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Deleted => "deleted",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "draft" => Self::Draft,
            "deleted" => Self::Deleted,
            _ => Self::Published,
        }
    }
}

/// Free-form per-conversation flags persisted as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationMeta {
    /// Auto-replies and user notifications are switched off
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ar_off: bool,
    /// Message-ID of the first imported email, for threading replies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_message_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub number: i64,
    pub mailbox_id: i64,
    pub folder_id: Option<i64>,
    pub user_id: Option<i64>,
    pub customer_id: Option<i64>,
    pub customer_email: Option<String>,
    pub status: ConversationStatus,
    pub state: ConversationState,
    pub subject: String,
    pub preview: String,
    pub threads_count: i64,
    pub meta: ConversationMeta,
    pub closed_at: Option<DateTime<Utc>>,
    pub last_reply_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_active(&self) -> bool {
        self.status == ConversationStatus::Active
    }
}

#[derive(Debug, Clone)]
pub struct NewConversation {
    pub mailbox_id: i64,
    pub user_id: Option<i64>,
    pub customer_id: Option<i64>,
    pub customer_email: Option<String>,
    pub status: ConversationStatus,
    pub state: ConversationState,
    pub subject: String,
    pub preview: String,
    pub meta: ConversationMeta,
}

impl NewConversation {
    pub fn published(mailbox_id: i64, subject: &str) -> Self {
        Self {
            mailbox_id,
            user_id: None,
            customer_id: None,
            customer_email: None,
            status: ConversationStatus::Active,
            state: ConversationState::Published,
            subject: subject.to_string(),
            preview: String::new(),
            meta: ConversationMeta::default(),
        }
    }
}

/// Cut text to at most `max` characters on a char boundary.
pub fn truncate_preview(text: &str, max: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(max) {
        Some((idx, _)) => collapsed[..idx].to_string(),
        None => collapsed,
    }
}
