use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailType {
    UserNotification,
    AutoReply,
    Alert,
    ConversationReply,
}

impl MailType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserNotification => "user_notification",
            Self::AutoReply => "auto_reply",
            Self::Alert => "alert",
            Self::ConversationReply => "conversation_reply",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "auto_reply" => Self::AutoReply,
            "alert" => Self::Alert,
            "conversation_reply" => Self::ConversationReply,
            _ => Self::UserNotification,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Accepted,
    SendError,
    DeliverySuccess,
    DeliveryError,
    Opened,
    Clicked,
}

impl SendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::SendError => "send_error",
            Self::DeliverySuccess => "delivery_success",
            Self::DeliveryError => "delivery_error",
            Self::Opened => "opened",
            Self::Clicked => "clicked",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "send_error" => Self::SendError,
            "delivery_success" => Self::DeliverySuccess,
            "delivery_error" => Self::DeliveryError,
            "opened" => Self::Opened,
            "clicked" => Self::Clicked,
            _ => Self::Accepted,
        }
    }
}

/// Audit row for one outbound email attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendLog {
    pub id: i64,
    pub thread_id: Option<i64>,
    pub customer_id: Option<i64>,
    pub user_id: Option<i64>,
    pub message_id: String,
    pub email: String,
    pub mail_type: MailType,
    pub status: SendStatus,
    pub status_message: Option<String>,
    pub opens: i64,
    pub clicks: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSendLog {
    pub thread_id: Option<i64>,
    pub customer_id: Option<i64>,
    pub user_id: Option<i64>,
    pub message_id: String,
    pub email: String,
    pub mail_type: MailType,
    pub status: SendStatus,
    pub status_message: Option<String>,
}
