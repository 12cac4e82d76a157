//! Keeps `conversations.folder_id` in line with the conversation's status,
//! state and assignee.

use rusqlite::Connection;
use tracing::debug;

use crate::adapters::sqlite::{conversations, folders};
use crate::error::HelpdeskError;
use crate::types::{Conversation, ConversationState, ConversationStatus, FolderType};

/// Outcome of `update_folder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderUpdate {
    /// `folder_id` changed
    Moved { from: Option<i64>, to: i64 },
    /// Already in the right folder
    Unchanged(i64),
    /// The mailbox has no folder for the derived type; `folder_id` was left as is
    NoMatchingFolder(FolderType),
}

/// Folder type (and owning user for personal folders) a conversation belongs in.
/// First match wins.
pub fn target_folder(
    status: ConversationStatus,
    state: ConversationState,
    user_id: Option<i64>,
) -> (FolderType, Option<i64>) {
    match (state, status, user_id) {
        (ConversationState::Deleted, _, _) => (FolderType::Deleted, None),
        (ConversationState::Draft, _, _) => (FolderType::Drafts, None),
        (_, ConversationStatus::Closed, _) => (FolderType::Closed, None),
        (_, ConversationStatus::Spam, _) => (FolderType::Spam, None),
        (_, ConversationStatus::Pending, _) => (FolderType::Unassigned, None),
        (_, ConversationStatus::Active, Some(user_id)) => (FolderType::Assigned, Some(user_id)),
        (_, ConversationStatus::Active, None) => (FolderType::Unassigned, None),
    }
}

/// Point the conversation at the folder matching its current fields and
/// persist the change. The struct is updated in place.
pub fn update_folder(
    conn: &Connection,
    conversation: &mut Conversation,
) -> Result<FolderUpdate, HelpdeskError> {
    let (folder_type, owner) =
        target_folder(conversation.status, conversation.state, conversation.user_id);

    let Some(folder) = folders::find(conn, conversation.mailbox_id, folder_type, owner)? else {
        debug!(
            conversation_id = conversation.id,
            mailbox_id = conversation.mailbox_id,
            folder_type = folder_type.as_str(),
            "No matching folder, leaving folder_id unchanged"
        );
        return Ok(FolderUpdate::NoMatchingFolder(folder_type));
    };

    if conversation.folder_id == Some(folder.id) {
        return Ok(FolderUpdate::Unchanged(folder.id));
    }

    let from = conversation.folder_id;
    conversations::set_folder(conn, conversation.id, folder.id)?;
    conversation.folder_id = Some(folder.id);

    Ok(FolderUpdate::Moved { from, to: folder.id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{mailboxes, pool, users};
    use crate::encryption::CredentialCipher;
    use crate::types::{InviteState, NewConversation, NewMailbox, NewUser, UserRole, UserStatus};

    struct Fixture {
        mailbox_id: i64,
        user_id: i64,
        unassigned: i64,
        closed: i64,
        spam: i64,
        assigned: i64,
    }

    fn fixture(conn: &Connection) -> Fixture {
        let cipher = CredentialCipher::new("k").unwrap();
        let mailbox_id = mailboxes::insert(
            conn,
            &cipher,
            &NewMailbox {
                name: "Support".to_string(),
                email: "support@example.com".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        let user_id = users::insert(
            conn,
            &NewUser {
                first_name: "Ana".to_string(),
                last_name: "Diaz".to_string(),
                email: "ana@example.com".to_string(),
                role: UserRole::User,
                status: UserStatus::Active,
                invite_state: InviteState::Activated,
            },
        )
        .unwrap();

        Fixture {
            mailbox_id,
            user_id,
            unassigned: folders::insert(conn, mailbox_id, None, FolderType::Unassigned).unwrap(),
            closed: folders::insert(conn, mailbox_id, None, FolderType::Closed).unwrap(),
            spam: folders::insert(conn, mailbox_id, None, FolderType::Spam).unwrap(),
            assigned: folders::insert(conn, mailbox_id, Some(user_id), FolderType::Assigned)
                .unwrap(),
        }
    }

    fn conversation(conn: &Connection, mailbox_id: i64) -> Conversation {
        let id = conversations::insert(conn, &NewConversation::published(mailbox_id, "Help")).unwrap();
        conversations::get(conn, id).unwrap().unwrap()
    }

    #[test]
    fn test_target_folder_priority() {
        use ConversationState::*;
        use ConversationStatus::*;

        assert_eq!(target_folder(Closed, Published, Some(3)), (FolderType::Closed, None));
        assert_eq!(target_folder(Spam, Published, Some(3)), (FolderType::Spam, None));
        assert_eq!(target_folder(Pending, Published, Some(3)), (FolderType::Unassigned, None));
        assert_eq!(target_folder(Active, Published, Some(3)), (FolderType::Assigned, Some(3)));
        assert_eq!(target_folder(Active, Published, None), (FolderType::Unassigned, None));
        assert_eq!(target_folder(Closed, Deleted, None), (FolderType::Deleted, None));
        assert_eq!(target_folder(Active, Draft, Some(3)), (FolderType::Drafts, None));
    }

    #[test]
    fn test_active_assigned_goes_to_users_folder() {
        let db = pool::in_memory().unwrap();
        let conn = db.get().unwrap();
        let f = fixture(&conn);

        let mut conv = conversation(&conn, f.mailbox_id);
        conv.user_id = Some(f.user_id);

        let outcome = update_folder(&conn, &mut conv).unwrap();
        assert_eq!(outcome, FolderUpdate::Moved { from: None, to: f.assigned });
        assert_eq!(conversations::get(&conn, conv.id).unwrap().unwrap().folder_id, Some(f.assigned));

        assert_eq!(update_folder(&conn, &mut conv).unwrap(), FolderUpdate::Unchanged(f.assigned));
    }

    #[test]
    fn test_status_mapping() {
        let db = pool::in_memory().unwrap();
        let conn = db.get().unwrap();
        let f = fixture(&conn);
        let mut conv = conversation(&conn, f.mailbox_id);

        update_folder(&conn, &mut conv).unwrap();
        assert_eq!(conv.folder_id, Some(f.unassigned));

        conv.status = ConversationStatus::Closed;
        update_folder(&conn, &mut conv).unwrap();
        assert_eq!(conv.folder_id, Some(f.closed));

        conv.status = ConversationStatus::Spam;
        update_folder(&conn, &mut conv).unwrap();
        assert_eq!(conv.folder_id, Some(f.spam));

        conv.status = ConversationStatus::Pending;
        conv.user_id = Some(f.user_id);
        update_folder(&conn, &mut conv).unwrap();
        assert_eq!(conv.folder_id, Some(f.unassigned));
    }

    #[test]
    fn test_missing_folder_leaves_folder_id() {
        let db = pool::in_memory().unwrap();
        let conn = db.get().unwrap();
        let f = fixture(&conn);
        let mut conv = conversation(&conn, f.mailbox_id);
        update_folder(&conn, &mut conv).unwrap();

        // No Drafts folder in this mailbox
        conv.state = ConversationState::Draft;
        let outcome = update_folder(&conn, &mut conv).unwrap();
        assert_eq!(outcome, FolderUpdate::NoMatchingFolder(FolderType::Drafts));
        assert_eq!(conv.folder_id, Some(f.unassigned));
        assert_eq!(
            conversations::get(&conn, conv.id).unwrap().unwrap().folder_id,
            Some(f.unassigned)
        );
    }
}
