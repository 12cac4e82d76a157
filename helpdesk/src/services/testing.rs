//! Shared fixtures for service tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::events::EventBus;
use super::jobs::{JobContext, JobQueue, RetryPolicy};
use super::lifecycle::Lifecycle;
use crate::adapters::smtp::{Mailer, OutgoingMail};
use crate::adapters::sqlite::{pool, users, DbPool};
use crate::config::AppConfig;
use crate::encryption::CredentialCipher;
use crate::error::HelpdeskError;
use crate::types::{
    AccessLevel, InviteState, Mailbox, NewMailbox, NewUser, OutboundSettings, UserRole, UserStatus,
};

/// Mailer that keeps every message instead of sending it.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(OutboundSettings, OutgoingMail)>>,
    rejected: Mutex<HashSet<String>>,
}

impl RecordingMailer {
    /// Fail every send to `email`.
    pub fn reject(&self, email: &str) {
        self.rejected.lock().unwrap().insert(email.to_string());
    }

    pub fn accept_all(&self) {
        self.rejected.lock().unwrap().clear();
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn transports(&self) -> Vec<OutboundSettings> {
        self.sent.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn recipients(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.to_email).collect()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, transport: &OutboundSettings, mail: &OutgoingMail) -> Result<(), HelpdeskError> {
        if self.rejected.lock().unwrap().contains(&mail.to_email) {
            return Err(HelpdeskError::Smtp(format!("550 mailbox unavailable: {}", mail.to_email)));
        }
        self.sent
            .lock()
            .unwrap()
            .push((transport.clone(), mail.clone()));
        Ok(())
    }
}

pub struct Fixture {
    pub pool: DbPool,
    pub lifecycle: Lifecycle,
    pub queue: JobQueue,
    pub context: JobContext,
    pub mailer: Arc<RecordingMailer>,
}

impl Fixture {
    pub fn new() -> Self {
        let pool = pool::in_memory().unwrap();
        let cipher = Arc::new(CredentialCipher::new("test").unwrap());
        let mailer = Arc::new(RecordingMailer::default());

        let mut config = AppConfig::default();
        config.app.url = "https://help.example.com".to_string();
        config.mail.from_address = "alerts@help.example.com".to_string();

        let lifecycle = Lifecycle::new(pool.clone(), cipher.clone(), Arc::new(EventBus::new()));
        let queue = JobQueue::new(
            pool.clone(),
            RetryPolicy {
                tries: 3,
                timeout: std::time::Duration::from_secs(5),
                retry_delay: std::time::Duration::from_secs(0),
            },
        );
        let context = JobContext {
            pool: pool.clone(),
            cipher,
            mailer: mailer.clone(),
            config: Arc::new(config),
        };

        Self {
            pool,
            lifecycle,
            queue,
            context,
            mailer,
        }
    }

    pub fn mailbox(&self, auto_reply: bool) -> Mailbox {
        self.lifecycle
            .create_mailbox(&NewMailbox {
                name: "Support".to_string(),
                email: "support@example.com".to_string(),
                auto_reply_enabled: auto_reply,
                auto_reply_subject: Some("We got your message".to_string()),
                auto_reply_message: Some("Thanks, we will get back to you shortly.".to_string()),
                ..Default::default()
            })
            .unwrap()
    }

    pub fn user(&self, email: &str, role: UserRole, status: UserStatus, invite_state: InviteState) -> i64 {
        let conn = self.pool.get().unwrap();
        let name = email.split('@').next().unwrap_or(email);
        users::insert(
            &conn,
            &NewUser {
                first_name: name.to_string(),
                last_name: "Tester".to_string(),
                email: email.to_string(),
                role,
                status,
                invite_state,
            },
        )
        .unwrap()
    }

    /// Active agent with reply access to the mailbox.
    pub fn agent(&self, mailbox_id: i64, email: &str) -> i64 {
        let id = self.user(email, UserRole::User, UserStatus::Active, InviteState::Activated);
        self.lifecycle
            .attach_user(mailbox_id, id, AccessLevel::Reply)
            .unwrap();
        id
    }
}
