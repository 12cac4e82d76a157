//! Capability checks: `(actor, resource) -> bool`.
//!
//! An active admin passes every check except deleting their own account.
//! Everyone else is judged by the `mailbox_user.access` level they hold on
//! the resource's mailbox.

use std::collections::HashMap;

use rusqlite::Connection;

use crate::adapters::sqlite::mailboxes;
use crate::error::HelpdeskError;
use crate::types::{AccessLevel, Conversation, Mailbox, Thread, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ability {
    View,
    Update,
    Reply,
    Delete,
    /// Move a conversation to another mailbox
    Move,
    /// Change mailbox settings and permissions
    Admin,
}

/// The acting user with their mailbox access levels loaded.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user: User,
    access: HashMap<i64, AccessLevel>,
}

impl Actor {
    pub fn new(user: User, access: HashMap<i64, AccessLevel>) -> Self {
        Self { user, access }
    }

    pub fn load(conn: &Connection, user: User) -> Result<Self, HelpdeskError> {
        let access = mailboxes::access_map_for_user(conn, user.id)?;
        Ok(Self::new(user, access))
    }

    pub fn is_admin(&self) -> bool {
        self.user.is_admin() && self.user.is_active()
    }

    pub fn access_to(&self, mailbox_id: i64) -> AccessLevel {
        if !self.user.is_active() {
            return AccessLevel::None;
        }
        self.access.get(&mailbox_id).copied().unwrap_or(AccessLevel::None)
    }

    fn has(&self, mailbox_id: i64, level: AccessLevel) -> bool {
        self.is_admin() || self.access_to(mailbox_id) >= level
    }

    /// Number of mailboxes the actor can at least view.
    pub fn visible_mailboxes(&self) -> usize {
        if !self.user.is_active() {
            return 0;
        }
        self.access.values().filter(|a| **a >= AccessLevel::View).count()
    }

    pub fn can<R: Policy>(&self, ability: Ability, resource: &R) -> bool {
        resource.allows(self, ability)
    }
}

pub trait Policy {
    fn allows(&self, actor: &Actor, ability: Ability) -> bool;
}

impl Policy for Mailbox {
    fn allows(&self, actor: &Actor, ability: Ability) -> bool {
        match ability {
            Ability::View => actor.has(self.id, AccessLevel::View),
            Ability::Reply | Ability::Update => actor.has(self.id, AccessLevel::Reply),
            Ability::Admin => actor.has(self.id, AccessLevel::Admin),
            Ability::Delete | Ability::Move => actor.is_admin(),
        }
    }
}

impl Policy for Conversation {
    fn allows(&self, actor: &Actor, ability: Ability) -> bool {
        match ability {
            Ability::View => actor.has(self.mailbox_id, AccessLevel::View),
            Ability::Update | Ability::Reply => actor.has(self.mailbox_id, AccessLevel::Reply),
            Ability::Delete | Ability::Admin => actor.has(self.mailbox_id, AccessLevel::Admin),
            Ability::Move => {
                actor.is_admin()
                    || (actor.visible_mailboxes() > 1
                        && actor.access_to(self.mailbox_id) >= AccessLevel::Reply)
            }
        }
    }
}

/// A thread is checked together with the conversation holding it.
pub struct ThreadResource<'a> {
    pub thread: &'a Thread,
    pub conversation: &'a Conversation,
}

impl Policy for ThreadResource<'_> {
    fn allows(&self, actor: &Actor, ability: Ability) -> bool {
        let mailbox_id = self.conversation.mailbox_id;
        match ability {
            Ability::View => actor.has(mailbox_id, AccessLevel::View),
            Ability::Reply => actor.has(mailbox_id, AccessLevel::Reply),
            // Authors may edit their own threads; mailbox admins may edit any
            Ability::Update | Ability::Delete => {
                actor.has(mailbox_id, AccessLevel::Admin)
                    || (self.thread.created_by_user_id == Some(actor.user.id)
                        && actor.has(mailbox_id, AccessLevel::Reply))
            }
            Ability::Move | Ability::Admin => actor.has(mailbox_id, AccessLevel::Admin),
        }
    }
}

impl Policy for User {
    fn allows(&self, actor: &Actor, ability: Ability) -> bool {
        let is_self = actor.user.id == self.id && actor.user.is_active();
        match ability {
            Ability::View | Ability::Update => actor.is_admin() || is_self,
            Ability::Delete => actor.is_admin() && actor.user.id != self.id,
            Ability::Reply | Ability::Move | Ability::Admin => actor.is_admin(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ConversationMeta, ConversationState, ConversationStatus, InviteState, ThreadState,
        ThreadType, UserRole, UserStatus,
    };
    use chrono::Utc;

    fn user(id: i64, role: UserRole, status: UserStatus) -> User {
        User {
            id,
            first_name: "U".to_string(),
            last_name: id.to_string(),
            email: format!("u{}@example.com", id),
            role,
            status,
            invite_state: InviteState::Activated,
            created_at: Utc::now(),
        }
    }

    fn actor(id: i64, role: UserRole, access: &[(i64, AccessLevel)]) -> Actor {
        Actor::new(
            user(id, role, UserStatus::Active),
            access.iter().copied().collect(),
        )
    }

    fn conversation(mailbox_id: i64) -> Conversation {
        Conversation {
            id: 1,
            number: 1,
            mailbox_id,
            folder_id: None,
            user_id: None,
            customer_id: None,
            customer_email: None,
            status: ConversationStatus::Active,
            state: ConversationState::Published,
            subject: String::new(),
            preview: String::new(),
            threads_count: 0,
            meta: ConversationMeta::default(),
            closed_at: None,
            last_reply_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn thread(author: Option<i64>) -> Thread {
        Thread {
            id: 1,
            conversation_id: 1,
            thread_type: ThreadType::Message,
            state: ThreadState::Published,
            status: ConversationStatus::Active,
            body: String::new(),
            headers: None,
            from: None,
            to: vec![],
            cc: vec![],
            bcc: vec![],
            message_id: None,
            in_reply_to: None,
            created_by_user_id: author,
            created_by_customer_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_access_levels_are_ordinal() {
        let conv = conversation(1);

        let viewer = actor(2, UserRole::User, &[(1, AccessLevel::View)]);
        assert!(viewer.can(Ability::View, &conv));
        assert!(!viewer.can(Ability::Reply, &conv));

        let replier = actor(3, UserRole::User, &[(1, AccessLevel::Reply)]);
        assert!(replier.can(Ability::View, &conv));
        assert!(replier.can(Ability::Update, &conv));
        assert!(!replier.can(Ability::Delete, &conv));

        let stranger = actor(4, UserRole::User, &[(2, AccessLevel::Admin)]);
        assert!(!stranger.can(Ability::View, &conv));
    }

    #[test]
    fn test_admin_passes_unless_inactive() {
        let conv = conversation(9);
        let admin = actor(1, UserRole::Admin, &[]);
        assert!(admin.can(Ability::Delete, &conv));
        assert!(admin.can(Ability::Move, &conv));

        let inactive = Actor::new(user(1, UserRole::Admin, UserStatus::Inactive), HashMap::new());
        assert!(!inactive.can(Ability::View, &conv));
    }

    #[test]
    fn test_move_needs_more_than_one_mailbox() {
        let conv = conversation(1);
        let single = actor(2, UserRole::User, &[(1, AccessLevel::Admin)]);
        assert!(!single.can(Ability::Move, &conv));

        let multi = actor(2, UserRole::User, &[(1, AccessLevel::Reply), (2, AccessLevel::View)]);
        assert!(multi.can(Ability::Move, &conv));

        // A `none` pivot row does not count as access
        let none_row = actor(2, UserRole::User, &[(1, AccessLevel::Reply), (2, AccessLevel::None)]);
        assert!(!none_row.can(Ability::Move, &conv));
    }

    #[test]
    fn test_thread_edit_own_only() {
        let conv = conversation(1);
        let agent = actor(5, UserRole::User, &[(1, AccessLevel::Reply)]);
        let own = thread(Some(5));
        let other = thread(Some(6));

        assert!(agent.can(Ability::Update, &ThreadResource { thread: &own, conversation: &conv }));
        assert!(!agent.can(Ability::Update, &ThreadResource { thread: &other, conversation: &conv }));
    }

    #[test]
    fn test_user_policy() {
        let admin = actor(1, UserRole::Admin, &[]);
        let agent = actor(2, UserRole::User, &[]);
        let agent_user = agent.user.clone();
        let admin_user = admin.user.clone();

        assert!(agent.can(Ability::Update, &agent_user));
        assert!(!agent.can(Ability::View, &admin_user));
        assert!(!agent.can(Ability::Delete, &agent_user));
        assert!(admin.can(Ability::Delete, &agent_user));
        assert!(!admin.can(Ability::Delete, &admin_user));
    }
}
