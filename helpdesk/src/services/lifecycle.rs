//! Explicit lifecycle operations.
//!
//! Every function here runs its row changes in one transaction: the entity
//! change, cascades to dependent rows and the folder counter updates commit
//! together or not at all. Events are published after commit.

use std::sync::Arc;

use rusqlite::Connection;
use tracing::{debug, info, warn};

use super::events::EventBus;
use super::folder_classifier::{update_folder, FolderUpdate};
use crate::adapters::sqlite::{
    conversations, customers, folders, mailboxes, threads, users, DbPool,
};
use crate::encryption::CredentialCipher;
use crate::error::HelpdeskError;
use crate::types::{
    truncate_preview, AccessLevel, Conversation, ConversationState, ConversationStatus, Folder,
    FolderType, Mailbox, NewConversation, NewMailbox, NewThread, Thread, ThreadType, UserStatus,
};

/// Stored preview length; broadcast payloads cut it further.
const STORED_PREVIEW_LENGTH: usize = 255;

#[derive(Clone)]
pub struct Lifecycle {
    pool: DbPool,
    cipher: Arc<CredentialCipher>,
    events: Arc<EventBus>,
}

/// Folder membership of a conversation as seen by the counters.
fn placement(conversation: &Conversation) -> Option<(i64, bool)> {
    conversation
        .folder_id
        .map(|folder_id| (folder_id, conversation.is_active()))
}

fn move_counters(
    conn: &Connection,
    before: Option<(i64, bool)>,
    after: Option<(i64, bool)>,
) -> Result<(), HelpdeskError> {
    if before == after {
        return Ok(());
    }
    if let Some((folder_id, active)) = before {
        folders::adjust_counters(conn, folder_id, -1, -(active as i64))?;
    }
    if let Some((folder_id, active)) = after {
        folders::adjust_counters(conn, folder_id, 1, active as i64)?;
    }
    Ok(())
}

/// Re-run the classifier and move counters to match.
fn reclassify(
    conn: &Connection,
    conversation: &mut Conversation,
    before: Option<(i64, bool)>,
) -> Result<FolderUpdate, HelpdeskError> {
    let outcome = update_folder(conn, conversation)?;
    move_counters(conn, before, placement(conversation))?;
    Ok(outcome)
}

/// Keep the Starred folders of users who starred the conversation in step
/// with an active/inactive flip.
fn sync_starred_active(
    conn: &Connection,
    conversation: &Conversation,
    was_active: bool,
) -> Result<(), HelpdeskError> {
    let delta = conversation.is_active() as i64 - was_active as i64;
    if delta == 0 {
        return Ok(());
    }
    for user_id in conversations::star_user_ids(conn, conversation.id)? {
        if let Some(folder) =
            folders::find(conn, conversation.mailbox_id, FolderType::Starred, Some(user_id))?
        {
            folders::adjust_counters(conn, folder.id, 0, delta)?;
        }
    }
    Ok(())
}

fn unstar_in_tx(
    conn: &Connection,
    conversation: &Conversation,
    user_id: i64,
) -> Result<bool, HelpdeskError> {
    if !conversations::remove_star(conn, conversation.id, user_id)? {
        return Ok(false);
    }
    if let Some(folder) =
        folders::find(conn, conversation.mailbox_id, FolderType::Starred, Some(user_id))?
    {
        folders::adjust_counters(conn, folder.id, -1, -(conversation.is_active() as i64))?;
    }
    Ok(true)
}

/// Remove a conversation and everything hanging off it.
fn delete_conversation_in_tx(conn: &Connection, conversation: &Conversation) -> Result<(), HelpdeskError> {
    for user_id in conversations::star_user_ids(conn, conversation.id)? {
        unstar_in_tx(conn, conversation, user_id)?;
    }
    conversations::remove_followers_of_conversation(conn, conversation.id)?;
    let removed_threads = threads::delete_for_conversation(conn, conversation.id)?;
    move_counters(conn, placement(conversation), None)?;
    conversations::delete(conn, conversation.id)?;

    debug!(
        conversation_id = conversation.id,
        threads = removed_threads,
        "Deleted conversation"
    );
    Ok(())
}

fn insert_conversation_in_tx(
    conn: &Connection,
    new_conversation: &NewConversation,
) -> Result<Conversation, HelpdeskError> {
    let id = conversations::insert(conn, new_conversation)?;
    let mut conversation = conversations::require(conn, id)?;
    reclassify(conn, &mut conversation, None)?;
    Ok(conversation)
}

/// Insert a thread and update the conversation it belongs to.
fn add_thread_in_tx(conn: &Connection, new_thread: &NewThread) -> Result<Thread, HelpdeskError> {
    let mut conversation = conversations::require(conn, new_thread.conversation_id)?;

    if new_thread.thread_type == ThreadType::Customer
        && conversation.status == ConversationStatus::Closed
    {
        let before = placement(&conversation);
        conversations::set_status(conn, conversation.id, ConversationStatus::Active, None)?;
        conversation.status = ConversationStatus::Active;
        reclassify(conn, &mut conversation, before)?;
        sync_starred_active(conn, &conversation, false)?;
    }

    let thread_id = threads::insert(conn, new_thread, conversation.status)?;
    let thread = threads::get(conn, thread_id)?
        .ok_or_else(|| HelpdeskError::NotFound(format!("thread {}", thread_id)))?;

    let preview = (!thread.is_draft() && thread.thread_type != ThreadType::LineItem)
        .then(|| truncate_preview(&thread.body, STORED_PREVIEW_LENGTH));
    let last_reply_at = thread.thread_type.is_reply().then_some(thread.created_at);
    conversations::record_thread(conn, conversation.id, preview.as_deref(), last_reply_at)?;

    if let Some(user_id) = thread.created_by_user_id {
        conversations::add_follower(conn, conversation.id, user_id)?;
    }

    Ok(thread)
}

/// Create the user's personal folders in a mailbox if they don't exist yet.
fn ensure_personal_folders(conn: &Connection, mailbox_id: i64, user_id: i64) -> Result<(), HelpdeskError> {
    for folder_type in FolderType::personal() {
        if folders::find(conn, mailbox_id, *folder_type, Some(user_id))?.is_none() {
            folders::insert(conn, mailbox_id, Some(user_id), *folder_type)?;
        }
    }
    Ok(())
}

/// Unassign the user's conversations in one mailbox (or all when `None`),
/// drop their stars there and remove their personal folders.
fn remove_personal_state(
    conn: &Connection,
    user_id: i64,
    mailbox_id: Option<i64>,
) -> Result<Vec<i64>, HelpdeskError> {
    let mut touched = Vec::new();

    for conversation_id in conversations::ids_assigned_to(conn, user_id)? {
        let mut conversation = conversations::require(conn, conversation_id)?;
        if mailbox_id.is_some_and(|m| m != conversation.mailbox_id) {
            continue;
        }
        let before = placement(&conversation);
        conversations::set_user(conn, conversation.id, None)?;
        conversation.user_id = None;
        reclassify(conn, &mut conversation, before)?;
        touched.push(conversation.id);
    }

    for conversation_id in conversations::starred_ids_for_user(conn, user_id)? {
        let conversation = conversations::require(conn, conversation_id)?;
        if mailbox_id.is_some_and(|m| m != conversation.mailbox_id) {
            continue;
        }
        unstar_in_tx(conn, &conversation, user_id)?;
    }

    for folder in folders::list_personal(conn, user_id)? {
        if mailbox_id.map_or(true, |m| m == folder.mailbox_id) {
            folders::delete(conn, folder.id)?;
        }
    }

    Ok(touched)
}

impl Lifecycle {
    pub fn new(pool: DbPool, cipher: Arc<CredentialCipher>, events: Arc<EventBus>) -> Self {
        Self { pool, cipher, events }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn cipher(&self) -> &Arc<CredentialCipher> {
        &self.cipher
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Rows are committed by the time this runs, so a failure here is only logged.
    fn publish_update(&self, conversation_ids: &[i64]) {
        if conversation_ids.is_empty() {
            return;
        }
        if let Err(e) = self.try_publish_update(conversation_ids) {
            warn!(?conversation_ids, error = %e, "Could not publish conversation update");
        }
    }

    fn try_publish_update(&self, conversation_ids: &[i64]) -> Result<(), HelpdeskError> {
        let conn = self.pool.get()?;
        for id in conversation_ids {
            let Some(conversation) = conversations::get(&conn, *id)? else {
                continue;
            };
            let user = match conversation.user_id {
                Some(user_id) => users::get(&conn, user_id)?,
                None => None,
            };
            let customer = match conversation.customer_id {
                Some(customer_id) => customers::get(&conn, customer_id)?,
                None => None,
            };
            self.events
                .conversation_updated(&conversation, user.as_ref(), customer.as_ref());
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Mailboxes and membership
    // -----------------------------------------------------------------------

    /// Insert a mailbox together with its default folders.
    pub fn create_mailbox(&self, new_mailbox: &NewMailbox) -> Result<Mailbox, HelpdeskError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let mailbox_id = mailboxes::insert(&tx, &self.cipher, new_mailbox)?;
        for folder_type in FolderType::mailbox_defaults() {
            folders::insert(&tx, mailbox_id, None, *folder_type)?;
        }
        let mailbox = mailboxes::get(&tx, &self.cipher, mailbox_id)?
            .ok_or_else(|| HelpdeskError::NotFound(format!("mailbox {}", mailbox_id)))?;

        tx.commit()?;
        info!(mailbox_id, email = %mailbox.email, "Created mailbox");
        Ok(mailbox)
    }

    /// Grant (or change) a user's access and make sure their personal folders exist.
    pub fn attach_user(
        &self,
        mailbox_id: i64,
        user_id: i64,
        access: AccessLevel,
    ) -> Result<(), HelpdeskError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        mailboxes::set_access(&tx, mailbox_id, user_id, access)?;
        ensure_personal_folders(&tx, mailbox_id, user_id)?;

        tx.commit()?;
        debug!(mailbox_id, user_id, access = access.code(), "Attached user to mailbox");
        Ok(())
    }

    /// Revoke access. The user's conversations in the mailbox become unassigned.
    pub fn detach_user(&self, mailbox_id: i64, user_id: i64) -> Result<(), HelpdeskError> {
        let touched = {
            let mut conn = self.pool.get()?;
            let tx = conn.transaction()?;

            let touched = remove_personal_state(&tx, user_id, Some(mailbox_id))?;
            mailboxes::remove_access(&tx, mailbox_id, user_id)?;

            tx.commit()?;
            touched
        };
        debug!(mailbox_id, user_id, unassigned = touched.len(), "Detached user from mailbox");
        self.publish_update(&touched);
        Ok(())
    }

    pub fn delete_mailbox(&self, mailbox_id: i64) -> Result<(), HelpdeskError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let conversation_ids = conversations::ids_for_mailbox(&tx, mailbox_id)?;
        for conversation_id in &conversation_ids {
            let conversation = conversations::require(&tx, *conversation_id)?;
            delete_conversation_in_tx(&tx, &conversation)?;
        }
        folders::delete_for_mailbox(&tx, mailbox_id)?;
        mailboxes::remove_all_access_for_mailbox(&tx, mailbox_id)?;
        mailboxes::delete(&tx, mailbox_id)?;

        tx.commit()?;
        for conversation_id in &conversation_ids {
            self.events.forget_conversation(*conversation_id);
        }
        info!(mailbox_id, conversations = conversation_ids.len(), "Deleted mailbox");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Conversations
    // -----------------------------------------------------------------------

    /// Insert a conversation, classify it into a folder and bump that folder's counters.
    pub fn create_conversation(&self, new_conversation: &NewConversation) -> Result<Conversation, HelpdeskError> {
        let conversation = {
            let mut conn = self.pool.get()?;
            let tx = conn.transaction()?;

            let conversation = insert_conversation_in_tx(&tx, new_conversation)?;
            tx.commit()?;
            conversation
        };

        debug!(
            conversation_id = conversation.id,
            number = conversation.number,
            folder_id = ?conversation.folder_id,
            "Created conversation"
        );
        self.publish_update(&[conversation.id]);
        Ok(conversation)
    }

    /// Create a conversation together with its first thread. Nothing is stored
    /// unless both rows are. `first_thread.conversation_id` is ignored.
    pub fn create_conversation_with_thread(
        &self,
        new_conversation: &NewConversation,
        first_thread: &NewThread,
    ) -> Result<(Conversation, Thread), HelpdeskError> {
        let (conversation, thread) = {
            let mut conn = self.pool.get()?;
            let tx = conn.transaction()?;

            let conversation = insert_conversation_in_tx(&tx, new_conversation)?;
            let thread = add_thread_in_tx(
                &tx,
                &NewThread {
                    conversation_id: conversation.id,
                    ..first_thread.clone()
                },
            )?;
            let conversation = conversations::require(&tx, conversation.id)?;

            tx.commit()?;
            (conversation, thread)
        };

        debug!(
            conversation_id = conversation.id,
            thread_id = thread.id,
            folder_id = ?conversation.folder_id,
            "Created conversation with first thread"
        );
        self.publish_update(&[conversation.id]);
        Ok((conversation, thread))
    }

    /// Change status. `by_user` records a line item on the conversation.
    pub fn change_status(
        &self,
        conversation_id: i64,
        status: ConversationStatus,
        by_user: Option<i64>,
    ) -> Result<Conversation, HelpdeskError> {
        let conversation = {
            let mut conn = self.pool.get()?;
            let tx = conn.transaction()?;

            let mut conversation = conversations::require(&tx, conversation_id)?;
            if conversation.status == status {
                return Ok(conversation);
            }

            let before = placement(&conversation);
            let was_active = conversation.is_active();
            let closed_at = (status == ConversationStatus::Closed).then(chrono::Utc::now);

            conversations::set_status(&tx, conversation.id, status, closed_at)?;
            conversation.status = status;
            conversation.closed_at = closed_at;
            reclassify(&tx, &mut conversation, before)?;
            sync_starred_active(&tx, &conversation, was_active)?;

            if let Some(user_id) = by_user {
                let mut line = NewThread::new(
                    conversation.id,
                    ThreadType::LineItem,
                    &format!("Status changed to {}", status.as_str()),
                );
                line.created_by_user_id = Some(user_id);
                threads::insert(&tx, &line, status)?;
                conversations::record_thread(&tx, conversation.id, None, None)?;
            }

            tx.commit()?;
            conversation
        };

        self.publish_update(&[conversation.id]);
        Ok(conversation)
    }

    /// Assign to a user, or unassign with `None`.
    pub fn change_user(
        &self,
        conversation_id: i64,
        user_id: Option<i64>,
        by_user: Option<i64>,
    ) -> Result<Conversation, HelpdeskError> {
        let conversation = {
            let mut conn = self.pool.get()?;
            let tx = conn.transaction()?;

            let mut conversation = conversations::require(&tx, conversation_id)?;
            if conversation.user_id == user_id {
                return Ok(conversation);
            }
            if let Some(assignee) = user_id {
                let user = users::get(&tx, assignee)?
                    .ok_or_else(|| HelpdeskError::NotFound(format!("user {}", assignee)))?;
                if user.status == UserStatus::Deleted {
                    return Err(HelpdeskError::InvalidInput(format!(
                        "user {} is deleted",
                        assignee
                    )));
                }
            }

            let before = placement(&conversation);
            conversations::set_user(&tx, conversation.id, user_id)?;
            conversation.user_id = user_id;
            reclassify(&tx, &mut conversation, before)?;

            if let Some(actor) = by_user {
                let body = match user_id {
                    Some(id) => format!("Assigned to user {}", id),
                    None => "Unassigned".to_string(),
                };
                let mut line = NewThread::new(conversation.id, ThreadType::LineItem, &body);
                line.created_by_user_id = Some(actor);
                threads::insert(&tx, &line, conversation.status)?;
                conversations::record_thread(&tx, conversation.id, None, None)?;
            }

            tx.commit()?;
            conversation
        };

        self.publish_update(&[conversation.id]);
        Ok(conversation)
    }

    /// Append a thread. Customer replies reopen closed conversations.
    pub fn add_thread(&self, new_thread: &NewThread) -> Result<Thread, HelpdeskError> {
        let thread = {
            let mut conn = self.pool.get()?;
            let tx = conn.transaction()?;
            let thread = add_thread_in_tx(&tx, new_thread)?;
            tx.commit()?;
            thread
        };

        self.publish_update(&[thread.conversation_id]);
        Ok(thread)
    }

    /// Move to the Deleted folder without removing anything.
    pub fn trash_conversation(&self, conversation_id: i64) -> Result<Conversation, HelpdeskError> {
        let conversation = {
            let mut conn = self.pool.get()?;
            let tx = conn.transaction()?;

            let mut conversation = conversations::require(&tx, conversation_id)?;
            let before = placement(&conversation);
            conversations::set_state(&tx, conversation.id, ConversationState::Deleted)?;
            conversation.state = ConversationState::Deleted;
            reclassify(&tx, &mut conversation, before)?;

            tx.commit()?;
            conversation
        };

        self.publish_update(&[conversation.id]);
        Ok(conversation)
    }

    /// Delete threads, followers and stars, then the conversation; counters follow.
    pub fn delete_conversation(&self, conversation_id: i64) -> Result<(), HelpdeskError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let conversation = conversations::require(&tx, conversation_id)?;
        delete_conversation_in_tx(&tx, &conversation)?;

        tx.commit()?;
        self.events.forget_conversation(conversation_id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Customers and users
    // -----------------------------------------------------------------------

    pub fn delete_customer(&self, customer_id: i64) -> Result<(), HelpdeskError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let conversation_ids = conversations::ids_for_customer(&tx, customer_id)?;
        for conversation_id in &conversation_ids {
            let conversation = conversations::require(&tx, *conversation_id)?;
            delete_conversation_in_tx(&tx, &conversation)?;
        }
        threads::clear_customer(&tx, customer_id)?;
        customers::delete(&tx, customer_id)?;

        tx.commit()?;
        for conversation_id in &conversation_ids {
            self.events.forget_conversation(*conversation_id);
        }
        info!(customer_id, conversations = conversation_ids.len(), "Deleted customer");
        Ok(())
    }

    /// Soft delete: the row stays with status `deleted` so history keeps its author.
    pub fn delete_user(&self, user_id: i64) -> Result<(), HelpdeskError> {
        let touched = {
            let mut conn = self.pool.get()?;
            let tx = conn.transaction()?;

            let touched = remove_personal_state(&tx, user_id, None)?;
            conversations::remove_follows_by_user(&tx, user_id)?;
            mailboxes::remove_all_access_for_user(&tx, user_id)?;
            users::set_status(&tx, user_id, UserStatus::Deleted)?;

            tx.commit()?;
            touched
        };

        info!(user_id, unassigned = touched.len(), "Deleted user");
        self.publish_update(&touched);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Stars and counters
    // -----------------------------------------------------------------------

    /// Star for a user. Returns false if it was already starred.
    pub fn star(&self, conversation_id: i64, user_id: i64) -> Result<bool, HelpdeskError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let conversation = conversations::require(&tx, conversation_id)?;
        if !conversations::add_star(&tx, conversation_id, user_id)? {
            return Ok(false);
        }
        if let Some(folder) =
            folders::find(&tx, conversation.mailbox_id, FolderType::Starred, Some(user_id))?
        {
            folders::adjust_counters(&tx, folder.id, 1, conversation.is_active() as i64)?;
        }

        tx.commit()?;
        Ok(true)
    }

    pub fn unstar(&self, conversation_id: i64, user_id: i64) -> Result<bool, HelpdeskError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let conversation = conversations::require(&tx, conversation_id)?;
        let removed = unstar_in_tx(&tx, &conversation, user_id)?;

        tx.commit()?;
        Ok(removed)
    }

    /// Recompute a folder's counters from conversation rows.
    pub fn recalculate_counters(&self, folder_id: i64) -> Result<Folder, HelpdeskError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        let folder = folders::get(&tx, folder_id)?
            .ok_or_else(|| HelpdeskError::NotFound(format!("folder {}", folder_id)))?;

        let (total, active) = match (folder.folder_type, folder.user_id) {
            (FolderType::Starred, Some(user_id)) => {
                conversations::count_starred(&tx, folder.mailbox_id, user_id)?
            }
            _ => conversations::count_in_folder(&tx, folder.id)?,
        };
        folders::set_counters(&tx, folder.id, total, active)?;
        let folder = folders::get(&tx, folder_id)?
            .ok_or_else(|| HelpdeskError::NotFound(format!("folder {}", folder_id)))?;

        tx.commit()?;
        Ok(folder)
    }
}
