use tracing::{debug, info, warn};

use super::{deliver, message_id, LogTarget};
use crate::adapters::smtp::OutgoingMail;
use crate::adapters::sqlite::{send_logs, users};
use crate::error::HelpdeskError;
use crate::services::jobs::JobContext;
use crate::types::{InviteState, MailType};

const DEFAULT_TITLE: &str = "Helpdesk alert";

/// Mail `text` to every active admin who accepted their invitation. Admins
/// who already got this alert on an earlier attempt are skipped.
pub async fn run(
    context: &JobContext,
    alert_id: &str,
    text: &str,
    title: Option<&str>,
) -> Result<(), HelpdeskError> {
    let prefix = format!("alert-{}", alert_id);

    let (admins, already_sent) = {
        let conn = context.pool.get()?;
        let admins = users::list_admins(&conn)?
            .into_iter()
            .filter(|u| u.is_active() && u.invite_state == InviteState::Activated)
            .collect::<Vec<_>>();

        let mut pending = Vec::with_capacity(admins.len());
        let mut already_sent = 0;
        for admin in admins {
            if send_logs::delivered_to_user(&conn, MailType::Alert, admin.id, &format!("{}-", prefix))? {
                already_sent += 1;
            } else {
                pending.push(admin);
            }
        }
        (pending, already_sent)
    };

    if admins.is_empty() {
        if already_sent == 0 {
            warn!(alert_id, "No active admins to alert");
        }
        return Ok(());
    }

    let system = &context.config.mail;
    let domain = context.config.app_domain();
    let subject = match title.filter(|t| !t.trim().is_empty()) {
        Some(title) => format!("[{}] {}", system.from_name, title),
        None => format!("[{}] {}", system.from_name, DEFAULT_TITLE),
    };

    let mut first_error = None;
    for admin in &admins {
        let mail = OutgoingMail {
            from_email: system.from_address.clone(),
            from_name: Some(system.from_name.clone()),
            to_email: admin.email.clone(),
            to_name: Some(admin.full_name()),
            subject: subject.clone(),
            text: text.to_string(),
            html: None,
            message_id: message_id(&prefix, &domain),
            in_reply_to: None,
            references: Vec::new(),
            auto_submitted: true,
        };

        let target = LogTarget {
            thread_id: None,
            customer_id: None,
            user_id: Some(admin.id),
            mail_type: MailType::Alert,
        };

        match deliver(context, &system.transport, &mail, target).await {
            Ok(()) => debug!(user_id = admin.id, "Alert sent"),
            Err(e) => {
                warn!(user_id = admin.id, error = %e, "Alert failed");
                first_error.get_or_insert(e);
            }
        }
    }

    info!(alert_id, recipients = admins.len(), already_sent, "Alert fanned out");
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
