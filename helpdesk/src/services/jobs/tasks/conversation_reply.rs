use tracing::{info, warn};

use super::{deliver, message_id, render_threads, transport_for, LogTarget};
use crate::adapters::smtp::OutgoingMail;
use crate::adapters::sqlite::{conversations, mailboxes, threads};
use crate::error::HelpdeskError;
use crate::services::jobs::JobContext;
use crate::types::{MailType, ThreadType};

/// Mail the conversation up to `thread_id` to an arbitrary address.
pub async fn run(
    context: &JobContext,
    conversation_id: i64,
    thread_id: i64,
    recipient: &str,
) -> Result<(), HelpdeskError> {
    let Some(recipient) = mail_rules::sanitize_email(recipient) else {
        warn!(conversation_id, recipient, "Invalid recipient, dropping conversation reply");
        return Ok(());
    };

    let (conversation, mailbox, history, thread) = {
        let conn = context.pool.get()?;
        let conversation = conversations::require(&conn, conversation_id)?;
        let mailbox = mailboxes::get(&conn, &context.cipher, conversation.mailbox_id)?
            .ok_or_else(|| HelpdeskError::NotFound(format!("mailbox {}", conversation.mailbox_id)))?;

        let all = threads::list_for_conversation(&conn, conversation_id)?;
        let position = all
            .iter()
            .position(|t| t.id == thread_id)
            .ok_or_else(|| HelpdeskError::NotFound(format!("thread {}", thread_id)))?;
        let thread = all[position].clone();

        let history: Vec<_> = all
            .into_iter()
            .take(position + 1)
            .filter(|t| !t.is_draft() && t.thread_type != ThreadType::LineItem)
            .rev()
            .collect();

        (conversation, mailbox, history, thread)
    };

    let mail = OutgoingMail {
        from_email: mailbox.email.clone(),
        from_name: Some(mailbox.sender_name().to_string()),
        to_email: recipient,
        to_name: None,
        subject: format!("Re: {}", conversation.subject),
        text: render_threads(history.iter()),
        html: None,
        message_id: message_id(&format!("reply-{}", thread.id), &context.config.app_domain()),
        in_reply_to: thread.message_id.clone(),
        references: thread.message_id.iter().cloned().collect(),
        auto_submitted: false,
    };

    deliver(
        context,
        transport_for(context, &mailbox),
        &mail,
        LogTarget {
            thread_id: Some(thread.id),
            customer_id: conversation.customer_id,
            user_id: None,
            mail_type: MailType::ConversationReply,
        },
    )
    .await?;

    info!(conversation_id, thread_id, to = %mail.to_email, "Conversation sent");
    Ok(())
}
