//! One module per job. Each task loads what it needs, drops the connection,
//! sends, then writes a send log for every attempt.

pub mod alert;
pub mod auto_reply;
pub mod conversation_reply;
pub mod user_notification;

use sha2::{Digest, Sha256};

use super::worker::JobContext;
use crate::adapters::smtp::OutgoingMail;
use crate::adapters::sqlite::send_logs;
use crate::error::HelpdeskError;
use crate::types::{Mailbox, MailType, NewSendLog, OutMethod, OutboundSettings, SendStatus, Thread, ThreadType};

/// Who a send log row is about.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LogTarget {
    pub thread_id: Option<i64>,
    pub customer_id: Option<i64>,
    pub user_id: Option<i64>,
    pub mail_type: MailType,
}

/// `{prefix}-{hash}@{domain}`, unique per call.
pub(crate) fn message_id(prefix: &str, domain: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(uuid::Uuid::new_v4().as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    format!("{}-{}@{}", prefix, &hash[..16], domain)
}

/// The mailbox transport, or the system transport when the mailbox has none.
pub(crate) fn transport_for<'a>(context: &'a JobContext, mailbox: &'a Mailbox) -> &'a OutboundSettings {
    let configured = match mailbox.outbound.method {
        OutMethod::Sendmail => true,
        OutMethod::Smtp => !mailbox.outbound.server.is_empty(),
    };
    if configured {
        &mailbox.outbound
    } else {
        &context.config.mail.transport
    }
}

/// Plain text label for a thread's author.
pub(crate) fn author_label(thread: &Thread) -> String {
    if let Some(from) = thread.from.as_deref().filter(|f| !f.is_empty()) {
        return from.to_string();
    }
    match thread.thread_type {
        ThreadType::Customer => "Customer".to_string(),
        ThreadType::Note => "Note".to_string(),
        ThreadType::Bounce => "Mail delivery system".to_string(),
        ThreadType::Message | ThreadType::LineItem => "Support".to_string(),
    }
}

/// Threads rendered newest first, separated by a rule.
pub(crate) fn render_threads<'a>(threads: impl Iterator<Item = &'a Thread>) -> String {
    threads
        .map(|t| format!("{} ({}):\n\n{}", author_label(t), t.created_at.format("%Y-%m-%d %H:%M"), t.body.trim()))
        .collect::<Vec<_>>()
        .join("\n\n----\n\n")
}

/// Send `mail` and record the attempt. A failed send is logged as
/// `send_error` and the error is returned so the queue retries.
pub(crate) async fn deliver(
    context: &JobContext,
    transport: &OutboundSettings,
    mail: &OutgoingMail,
    target: LogTarget,
) -> Result<(), HelpdeskError> {
    let result = context.mailer.send(transport, mail).await;

    let (status, status_message) = match &result {
        Ok(()) => (SendStatus::Accepted, None),
        Err(e) => (SendStatus::SendError, Some(e.to_string())),
    };

    let conn = context.pool.get()?;
    send_logs::insert(
        &conn,
        &NewSendLog {
            thread_id: target.thread_id,
            customer_id: target.customer_id,
            user_id: target.user_id,
            message_id: mail.message_id.clone(),
            email: mail.to_email.clone(),
            mail_type: target.mail_type,
            status,
            status_message,
        },
    )?;

    result
}
