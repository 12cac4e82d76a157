//! Outbound mail through lettre.
//!
//! Jobs talk to the `Mailer` trait; `LettreMailer` builds the message and
//! picks an SMTP or sendmail transport from the mailbox's outbound settings.

use async_trait::async_trait;
use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::{Mailbox as Address, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{
    AsyncSendmailTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, info};

use crate::error::HelpdeskError;
use crate::types::{Encryption, OutMethod, OutboundSettings};

#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub from_email: String,
    pub from_name: Option<String>,
    pub to_email: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
    /// Without angle brackets
    pub message_id: String,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    /// Adds `Auto-Submitted: auto-replied` so other systems don't answer back
    pub auto_submitted: bool,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(
        &self,
        transport: &OutboundSettings,
        mail: &OutgoingMail,
    ) -> Result<(), HelpdeskError>;
}

#[derive(Debug, Clone, Default)]
pub struct LettreMailer;

impl LettreMailer {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Clone)]
struct AutoSubmitted(String);

impl Header for AutoSubmitted {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("Auto-Submitted")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

fn address(email: &str, name: Option<&str>) -> Result<Address, HelpdeskError> {
    Ok(Address::new(
        name.filter(|n| !n.is_empty()).map(|n| n.to_string()),
        email.parse()?,
    ))
}

fn angle(id: &str) -> String {
    format!("<{}>", id.trim_matches(|c| c == '<' || c == '>'))
}

/// Build the RFC 5322 message for `mail`.
pub fn build_message(mail: &OutgoingMail) -> Result<Message, HelpdeskError> {
    let mut builder = Message::builder()
        .from(address(&mail.from_email, mail.from_name.as_deref())?)
        .to(address(&mail.to_email, mail.to_name.as_deref())?)
        .subject(&mail.subject)
        .message_id(Some(angle(&mail.message_id)));

    if let Some(in_reply_to) = mail.in_reply_to.as_deref().filter(|s| !s.is_empty()) {
        builder = builder.in_reply_to(angle(in_reply_to));
    }

    if !mail.references.is_empty() {
        let references = mail
            .references
            .iter()
            .map(|r| angle(r))
            .collect::<Vec<_>>()
            .join(" ");
        builder = builder.references(references);
    }

    if mail.auto_submitted {
        builder = builder.header(AutoSubmitted("auto-replied".to_string()));
    }

    let message = match &mail.html {
        Some(html) => builder.multipart(
            MultiPart::alternative()
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_PLAIN)
                        .body(mail.text.clone()),
                )
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(html.clone()),
                ),
        )?,
        None => builder
            .header(ContentType::TEXT_PLAIN)
            .body(mail.text.clone())?,
    };

    Ok(message)
}

fn smtp_transport(
    settings: &OutboundSettings,
) -> Result<AsyncSmtpTransport<Tokio1Executor>, HelpdeskError> {
    let host = settings.server.as_str();
    if host.is_empty() {
        return Err(HelpdeskError::Config("SMTP server not configured".to_string()));
    }

    let builder = match settings.encryption {
        Encryption::Ssl => {
            let tls = TlsParameters::builder(host.to_string())
                .build_rustls()
                .map_err(|e| HelpdeskError::Smtp(format!("TLS params error: {}", e)))?;
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| HelpdeskError::Smtp(format!("SMTP relay error: {}", e)))?
                .tls(Tls::Wrapper(tls))
        }
        Encryption::Tls => {
            let tls = TlsParameters::builder(host.to_string())
                .build_rustls()
                .map_err(|e| HelpdeskError::Smtp(format!("TLS params error: {}", e)))?;
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| HelpdeskError::Smtp(format!("SMTP STARTTLS relay error: {}", e)))?
                .tls(Tls::Required(tls))
        }
        Encryption::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
    }
    .port(settings.port);

    let builder = if settings.username.is_empty() {
        builder
    } else {
        builder.credentials(Credentials::new(
            settings.username.clone(),
            settings.password.clone(),
        ))
    };

    Ok(builder.build())
}

#[async_trait]
impl Mailer for LettreMailer {
    async fn send(
        &self,
        transport: &OutboundSettings,
        mail: &OutgoingMail,
    ) -> Result<(), HelpdeskError> {
        let message = build_message(mail)?;
        debug!(to = %mail.to_email, message_id = %mail.message_id, method = transport.method.as_str(), "Sending mail");

        match transport.method {
            OutMethod::Smtp => {
                smtp_transport(transport)?
                    .send(message)
                    .await
                    .map_err(|e| HelpdeskError::Smtp(format!("SMTP send failed: {}", e)))?;
            }
            OutMethod::Sendmail => {
                AsyncSendmailTransport::<Tokio1Executor>::new()
                    .send(message)
                    .await
                    .map_err(|e| HelpdeskError::Smtp(format!("sendmail failed: {}", e)))?;
            }
        }

        info!(to = %mail.to_email, message_id = %mail.message_id, "Mail sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail() -> OutgoingMail {
        OutgoingMail {
            from_email: "support@example.com".to_string(),
            from_name: Some("Support".to_string()),
            to_email: "jane@example.org".to_string(),
            to_name: None,
            subject: "Re: Printer".to_string(),
            text: "We got your message.".to_string(),
            html: None,
            message_id: "auto-reply-1-abc@example.com".to_string(),
            in_reply_to: Some("<orig@example.org>".to_string()),
            references: vec!["orig@example.org".to_string()],
            auto_submitted: true,
        }
    }

    #[test]
    fn test_build_message_headers() {
        let formatted = String::from_utf8(build_message(&mail()).unwrap().formatted()).unwrap();

        assert!(formatted.contains("Message-ID: <auto-reply-1-abc@example.com>"));
        assert!(formatted.contains("In-Reply-To: <orig@example.org>"));
        assert!(formatted.contains("References: <orig@example.org>"));
        assert!(formatted.contains("Auto-Submitted: auto-replied"));
        assert!(formatted.contains("To: jane@example.org"));
    }

    #[test]
    fn test_invalid_recipient() {
        let mut bad = mail();
        bad.to_email = "not an address".to_string();
        assert!(matches!(build_message(&bad), Err(HelpdeskError::InvalidInput(_))));
    }

    #[test]
    fn test_smtp_requires_server() {
        let err = smtp_transport(&OutboundSettings::default()).unwrap_err();
        assert!(matches!(err, HelpdeskError::Config(_)));
    }
}
