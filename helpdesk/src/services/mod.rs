//! Business logic services
//!
//! Services own the rules: which folder a conversation belongs in, who may
//! do what, what happens when an entity is created or deleted, how mail is
//! imported and which notifications go out. Storage goes through
//! `adapters::sqlite`, network I/O through the `adapters::imap` and
//! `adapters::smtp` traits so every service can be tested in isolation.

pub mod events;
pub mod fetch;
pub mod folder_classifier;
pub mod jobs;
pub mod lifecycle;
pub mod policy;

#[cfg(test)]
pub(crate) mod testing;

pub use events::EventBus;
pub use fetch::{FetchResult, Fetcher};
pub use folder_classifier::{update_folder, FolderUpdate};
pub use jobs::{Job, JobContext, JobQueue, RetryPolicy, WorkerPool};
pub use lifecycle::Lifecycle;
pub use policy::{Ability, Actor, Policy};
