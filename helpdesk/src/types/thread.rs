use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::conversation::ConversationStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadType {
    /// Email received from a customer
    Customer,
    /// Reply written by a user
    Message,
    /// Internal note
    Note,
    /// Status/assignment change record
    LineItem,
    /// Delivery status notification
    Bounce,
}

impl ThreadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Message => "message",
            Self::Note => "note",
            Self::LineItem => "lineitem",
            Self::Bounce => "bounce",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "message" => Self::Message,
            "note" => Self::Note,
            "lineitem" => Self::LineItem,
            "bounce" => Self::Bounce,
            _ => Self::Customer,
        }
    }

    /// Threads that count as a reply on the conversation.
    pub fn is_reply(&self) -> bool {
        matches!(self, Self::Customer | Self::Message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadState {
    Draft,
    Published,
}

impl ThreadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "draft" => Self::Draft,
            _ => Self::Published,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: i64,
    pub conversation_id: i64,
    pub thread_type: ThreadType,
    pub state: ThreadState,
    /// Conversation status at the time the thread was written
    pub status: ConversationStatus,
    pub body: String,
    pub headers: Option<String>,
    pub from: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub created_by_user_id: Option<i64>,
    pub created_by_customer_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Thread {
    pub fn is_draft(&self) -> bool {
        self.state == ThreadState::Draft
    }

    pub fn is_bounce(&self) -> bool {
        self.thread_type == ThreadType::Bounce
    }
}

#[derive(Debug, Clone)]
pub struct NewThread {
    pub conversation_id: i64,
    pub thread_type: ThreadType,
    pub state: ThreadState,
    pub body: String,
    pub headers: Option<String>,
    pub from: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub created_by_user_id: Option<i64>,
    pub created_by_customer_id: Option<i64>,
}

impl NewThread {
    pub fn new(conversation_id: i64, thread_type: ThreadType, body: &str) -> Self {
        Self {
            conversation_id,
            thread_type,
            state: ThreadState::Published,
            body: body.to_string(),
            headers: None,
            from: None,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            message_id: None,
            in_reply_to: None,
            created_by_user_id: None,
            created_by_customer_id: None,
        }
    }
}
