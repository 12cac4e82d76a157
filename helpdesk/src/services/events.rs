//! Real-time events for connected agents.
//!
//! Two channel families: `presence-conversation.{id}` tracks who is looking
//! at (or replying to) a conversation, `private-mailbox.{id}` carries
//! conversation updates for a mailbox's list views. Delivery is in-process
//! over a tokio broadcast channel; a transport layer can subscribe and
//! forward.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::{truncate_preview, Conversation, ConversationStatus, Customer, User};

pub const PREVIEW_LENGTH: usize = 100;
const CHANNEL_CAPACITY: usize = 256;

pub fn conversation_channel(conversation_id: i64) -> String {
    format!("presence-conversation.{}", conversation_id)
}

pub fn mailbox_channel(mailbox_id: i64) -> String {
    format!("private-mailbox.{}", mailbox_id)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Viewer {
    pub user_id: i64,
    pub user_name: String,
    pub replying: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationUpdate {
    pub mailbox_id: i64,
    pub conversation_id: i64,
    pub conversation_number: i64,
    pub subject: String,
    pub status: ConversationStatus,
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    pub customer_name: Option<String>,
    /// At most `PREVIEW_LENGTH` characters
    pub preview: String,
}

impl ConversationUpdate {
    pub fn new(conversation: &Conversation, user: Option<&User>, customer: Option<&Customer>) -> Self {
        Self {
            mailbox_id: conversation.mailbox_id,
            conversation_id: conversation.id,
            conversation_number: conversation.number,
            subject: conversation.subject.clone(),
            status: conversation.status,
            user_id: conversation.user_id,
            user_name: user.map(|u| u.full_name()),
            customer_name: customer.map(|c| c.display_name()),
            preview: truncate_preview(&conversation.preview, PREVIEW_LENGTH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventPayload {
    ViewerJoined { conversation_id: i64, viewer: Viewer },
    ViewerLeft { conversation_id: i64, user_id: i64 },
    ViewerReplying { conversation_id: i64, viewer: Viewer },
    ConversationUpdated(ConversationUpdate),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BroadcastEvent {
    pub channel: String,
    pub payload: EventPayload,
}

pub struct EventBus {
    tx: broadcast::Sender<BroadcastEvent>,
    viewers: Mutex<HashMap<i64, Vec<Viewer>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            viewers: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, channel: String, payload: EventPayload) {
        debug!(channel = %channel, "Broadcasting event");
        // No subscribers is not an error
        let _ = self.tx.send(BroadcastEvent { channel, payload });
    }

    pub fn conversation_updated(
        &self,
        conversation: &Conversation,
        user: Option<&User>,
        customer: Option<&Customer>,
    ) {
        self.publish(
            mailbox_channel(conversation.mailbox_id),
            EventPayload::ConversationUpdated(ConversationUpdate::new(conversation, user, customer)),
        );
    }

    pub fn join(&self, conversation_id: i64, user: &User) {
        let viewer = Viewer {
            user_id: user.id,
            user_name: user.full_name(),
            replying: false,
        };
        {
            let mut viewers = self.viewers.lock().unwrap_or_else(|e| e.into_inner());
            let list = viewers.entry(conversation_id).or_default();
            list.retain(|v| v.user_id != user.id);
            list.push(viewer.clone());
        }
        self.publish(
            conversation_channel(conversation_id),
            EventPayload::ViewerJoined { conversation_id, viewer },
        );
    }

    pub fn leave(&self, conversation_id: i64, user_id: i64) {
        {
            let mut viewers = self.viewers.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(list) = viewers.get_mut(&conversation_id) {
                list.retain(|v| v.user_id != user_id);
                if list.is_empty() {
                    viewers.remove(&conversation_id);
                }
            }
        }
        self.publish(
            conversation_channel(conversation_id),
            EventPayload::ViewerLeft { conversation_id, user_id },
        );
    }

    /// Flag a viewer as typing a reply. Ignored for users not viewing.
    pub fn set_replying(&self, conversation_id: i64, user_id: i64, replying: bool) {
        let viewer = {
            let mut viewers = self.viewers.lock().unwrap_or_else(|e| e.into_inner());
            viewers
                .get_mut(&conversation_id)
                .and_then(|list| list.iter_mut().find(|v| v.user_id == user_id))
                .map(|v| {
                    v.replying = replying;
                    v.clone()
                })
        };
        if let Some(viewer) = viewer {
            self.publish(
                conversation_channel(conversation_id),
                EventPayload::ViewerReplying { conversation_id, viewer },
            );
        }
    }

    pub fn viewers(&self, conversation_id: i64) -> Vec<Viewer> {
        let viewers = self.viewers.lock().unwrap_or_else(|e| e.into_inner());
        viewers.get(&conversation_id).cloned().unwrap_or_default()
    }

    /// Drop presence state for a conversation that no longer exists.
    pub fn forget_conversation(&self, conversation_id: i64) {
        let mut viewers = self.viewers.lock().unwrap_or_else(|e| e.into_inner());
        viewers.remove(&conversation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConversationMeta, ConversationState, InviteState, UserRole, UserStatus};
    use chrono::Utc;

    fn user(id: i64) -> User {
        User {
            id,
            first_name: "Kim".to_string(),
            last_name: "Lee".to_string(),
            email: "kim@example.com".to_string(),
            role: UserRole::User,
            status: UserStatus::Active,
            invite_state: InviteState::Activated,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_presence_tracking() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.join(7, &user(1));
        bus.join(7, &user(1));
        bus.set_replying(7, 1, true);
        assert_eq!(bus.viewers(7).len(), 1);
        assert!(bus.viewers(7)[0].replying);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.channel, "presence-conversation.7");
        assert!(matches!(first.payload, EventPayload::ViewerJoined { conversation_id: 7, .. }));

        bus.leave(7, 1);
        assert!(bus.viewers(7).is_empty());

        // Replying for someone not viewing is dropped
        bus.set_replying(7, 2, true);
        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[2].payload, EventPayload::ViewerLeft { user_id: 1, .. }));
    }

    #[test]
    fn test_conversation_update_payload() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let conversation = Conversation {
            id: 3,
            number: 42,
            mailbox_id: 5,
            folder_id: None,
            user_id: Some(1),
            customer_id: None,
            customer_email: None,
            status: ConversationStatus::Active,
            state: ConversationState::Published,
            subject: "Broken".to_string(),
            preview: "x".repeat(250),
            threads_count: 1,
            meta: ConversationMeta::default(),
            closed_at: None,
            last_reply_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        bus.conversation_updated(&conversation, Some(&user(1)), None);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.channel, "private-mailbox.5");
        match event.payload {
            EventPayload::ConversationUpdated(update) => {
                assert_eq!(update.preview.chars().count(), PREVIEW_LENGTH);
                assert_eq!(update.user_name.as_deref(), Some("Kim Lee"));
                assert_eq!(update.conversation_number, 42);
            }
            other => panic!("unexpected payload {:?}", other),
        }

        let json = serde_json::to_value(&EventPayload::ViewerLeft { conversation_id: 1, user_id: 2 }).unwrap();
        assert_eq!(json["event"], "viewer_left");
    }
}
