//! Domain records shared by the storage adapters and services

pub mod conversation;
pub mod customer;
pub mod folder;
pub mod mailbox;
pub mod send_log;
pub mod thread;
pub mod user;

pub use conversation::{
    truncate_preview, Conversation, ConversationMeta, ConversationState, ConversationStatus,
    NewConversation,
};
pub use customer::Customer;
pub use folder::{Folder, FolderType};
pub use mailbox::{
    AccessLevel, Encryption, InProtocol, InboundSettings, Mailbox, NewMailbox, OutMethod,
    OutboundSettings,
};
pub use send_log::{MailType, NewSendLog, SendLog, SendStatus};
pub use thread::{NewThread, Thread, ThreadState, ThreadType};
pub use user::{InviteState, NewUser, User, UserRole, UserStatus};
