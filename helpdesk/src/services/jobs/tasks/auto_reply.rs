use tracing::{debug, info};

use super::{deliver, message_id, transport_for, LogTarget};
use crate::adapters::smtp::OutgoingMail;
use crate::adapters::sqlite::{conversations, customers, mailboxes, threads};
use crate::error::HelpdeskError;
use crate::services::jobs::JobContext;
use crate::types::MailType;

const DEFAULT_MESSAGE: &str = "Thank you for contacting us. We have received your message and will reply as soon as possible.";

pub async fn run(
    context: &JobContext,
    conversation_id: i64,
    thread_id: i64,
    mailbox_id: i64,
    customer_id: Option<i64>,
) -> Result<(), HelpdeskError> {
    let (conversation, thread, mailbox, customer) = {
        let conn = context.pool.get()?;
        let conversation = conversations::require(&conn, conversation_id)?;
        let thread = threads::get(&conn, thread_id)?
            .ok_or_else(|| HelpdeskError::NotFound(format!("thread {}", thread_id)))?;
        let mailbox = mailboxes::get(&conn, &context.cipher, mailbox_id)?
            .ok_or_else(|| HelpdeskError::NotFound(format!("mailbox {}", mailbox_id)))?;
        let customer = match customer_id {
            Some(id) => customers::get(&conn, id)?,
            None => None,
        };
        (conversation, thread, mailbox, customer)
    };

    if conversation.meta.ar_off || !mailbox.auto_reply_enabled {
        debug!(conversation_id, "Auto reply switched off");
        return Ok(());
    }

    let Some(customer_email) = conversation.customer_email.clone() else {
        debug!(conversation_id, "No customer email, skipping auto reply");
        return Ok(());
    };

    let subject = mailbox
        .auto_reply_subject
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| format!("Re: {}", conversation.subject));
    let text = mailbox
        .auto_reply_message
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_MESSAGE.to_string());

    let mail = OutgoingMail {
        from_email: mailbox.email.clone(),
        from_name: Some(mailbox.sender_name().to_string()),
        to_email: customer_email,
        to_name: customer.as_ref().map(|c| c.full_name()).filter(|n| !n.is_empty()),
        subject,
        text,
        html: None,
        message_id: message_id(&format!("auto-reply-{}", thread.id), &context.config.app_domain()),
        in_reply_to: thread.message_id.clone(),
        references: thread.message_id.iter().cloned().collect(),
        auto_submitted: true,
    };

    deliver(
        context,
        transport_for(context, &mailbox),
        &mail,
        LogTarget {
            thread_id: Some(thread.id),
            customer_id: conversation.customer_id,
            user_id: None,
            mail_type: MailType::AutoReply,
        },
    )
    .await?;

    info!(conversation_id, to = %mail.to_email, "Auto reply sent");
    Ok(())
}
