use serde::{Deserialize, Serialize};

/// Kind of conversation bucket inside a mailbox.
///
/// Stored as a string key. `code()` gives the numeric value used by older
/// exports; those numbers are not used for lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderType {
    Unassigned,
    Starred,
    Drafts,
    Assigned,
    Closed,
    Deleted,
    Spam,
}

impl FolderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unassigned => "unassigned",
            Self::Starred => "starred",
            Self::Drafts => "drafts",
            Self::Assigned => "assigned",
            Self::Closed => "closed",
            Self::Deleted => "deleted",
            Self::Spam => "spam",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unassigned" => Some(Self::Unassigned),
            "starred" => Some(Self::Starred),
            "drafts" => Some(Self::Drafts),
            "assigned" => Some(Self::Assigned),
            "closed" => Some(Self::Closed),
            "deleted" => Some(Self::Deleted),
            "spam" => Some(Self::Spam),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::Unassigned => 1,
            Self::Starred => 25,
            Self::Drafts => 30,
            Self::Assigned => 40,
            Self::Closed => 60,
            Self::Deleted => 70,
            Self::Spam => 80,
        }
    }

    /// Folders every mailbox gets on creation.
    pub fn mailbox_defaults() -> &'static [FolderType] {
        &[
            Self::Unassigned,
            Self::Drafts,
            Self::Closed,
            Self::Deleted,
            Self::Spam,
        ]
    }

    /// Folders created for each user with access to a mailbox. The
    /// user-scoped `Assigned` folder is that user's "Mine" view.
    pub fn personal() -> &'static [FolderType] {
        &[Self::Assigned, Self::Starred]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub id: i64,
    pub mailbox_id: i64,
    pub user_id: Option<i64>,
    pub folder_type: FolderType,
    pub total_count: i64,
    pub active_count: i64,
}
