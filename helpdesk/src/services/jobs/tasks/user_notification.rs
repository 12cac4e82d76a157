use chrono::{Duration, Utc};
use tracing::{debug, error, info, warn};

use super::{deliver, message_id, render_threads, transport_for, LogTarget};
use crate::adapters::smtp::OutgoingMail;
use crate::adapters::sqlite::{conversations, mailboxes, send_logs, threads, users};
use crate::error::HelpdeskError;
use crate::services::jobs::JobContext;
use crate::types::{MailType, SendStatus, User};

pub async fn run(
    context: &JobContext,
    user_ids: &[i64],
    conversation_id: i64,
    thread_ids: &[i64],
) -> Result<(), HelpdeskError> {
    if user_ids.is_empty() || thread_ids.is_empty() {
        return Ok(());
    }

    let limits = &context.config.notifications;

    let (conversation, mailbox, notified_threads, recipients, latest) = {
        let conn = context.pool.get()?;

        let Some(conversation) = conversations::get(&conn, conversation_id)? else {
            warn!(conversation_id, "Conversation gone, dropping notification");
            return Ok(());
        };

        let mailbox = match mailboxes::get(&conn, &context.cipher, conversation.mailbox_id) {
            Ok(Some(mailbox)) => mailbox,
            Ok(None) => {
                error!(conversation_id, mailbox_id = conversation.mailbox_id, "Mailbox not found for notification");
                return Ok(());
            }
            Err(e) => {
                error!(conversation_id, mailbox_id = conversation.mailbox_id, error = %e, "Mailbox lookup failed");
                return Ok(());
            }
        };

        if conversation.meta.ar_off {
            debug!(conversation_id, "Notifications switched off for conversation");
            return Ok(());
        }

        let all = threads::list_for_conversation(&conn, conversation_id)?;
        let Some(latest) = all.iter().rev().find(|t| !t.is_draft()).cloned() else {
            return Ok(());
        };

        if latest.is_bounce() {
            let since = Utc::now() - Duration::minutes(limits.bounce_window_minutes);
            let bounces = threads::count_bounces_since(&conn, conversation_id, since)?;
            if bounces > i64::from(limits.bounce_limit) {
                info!(conversation_id, bounces, "Bounce limit exceeded, not notifying users");
                return Ok(());
            }
        }

        let mut notified: Vec<_> = threads::get_many(&conn, thread_ids)?
            .into_iter()
            .filter(|t| !t.is_draft() && t.conversation_id == conversation_id)
            .collect();
        notified.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        // Users already notified for the latest thread were handled by an
        // earlier attempt of this job.
        let mut recipients: Vec<User> = Vec::new();
        for user in users::get_many(&conn, user_ids)? {
            if !user.is_active() {
                continue;
            }
            let already_sent = send_logs::list_for_thread_user(&conn, latest.id, user.id)?
                .iter()
                .any(|log| log.status != SendStatus::SendError);
            if !already_sent {
                recipients.push(user);
            }
        }

        (conversation, mailbox, notified, recipients, latest)
    };

    if notified_threads.is_empty() || recipients.is_empty() {
        return Ok(());
    }

    let domain = context.config.app_domain();
    let subject = format!("[#{}] {}", conversation.number, conversation.subject);
    let text = format!(
        "{}\n\nConversation #{} in {}",
        render_threads(notified_threads.iter()),
        conversation.number,
        mailbox.name
    );
    let transport = transport_for(context, &mailbox);

    let mut first_error = None;
    for user in &recipients {
        let mail = OutgoingMail {
            from_email: mailbox.email.clone(),
            from_name: Some(mailbox.sender_name().to_string()),
            to_email: user.email.clone(),
            to_name: Some(user.full_name()),
            subject: subject.clone(),
            text: text.clone(),
            html: None,
            message_id: message_id(&format!("notify-{}-{}", latest.id, user.id), &domain),
            in_reply_to: None,
            references: Vec::new(),
            auto_submitted: true,
        };

        let target = LogTarget {
            thread_id: Some(latest.id),
            customer_id: None,
            user_id: Some(user.id),
            mail_type: MailType::UserNotification,
        };

        match deliver(context, transport, &mail, target).await {
            Ok(()) => debug!(conversation_id, user_id = user.id, "Notification sent"),
            Err(e) => {
                warn!(conversation_id, user_id = user.id, error = %e, "Notification failed");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
