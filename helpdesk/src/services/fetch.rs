//! Mail fetching.
//!
//! `fetch_emails` never fails: connection problems, missing folders and
//! unparseable messages are counted in the result and logged, so one broken
//! mailbox cannot stop the fetch loop for the others.

use std::sync::Arc;

use mailparse::{MailAddr, MailHeaderMap, ParsedMail};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::jobs::{Job, JobQueue};
use super::lifecycle::Lifecycle;
use crate::adapters::imap::{InboundClient, InboundSession};
use crate::adapters::sqlite::{conversations, customers, mailboxes, threads};
use crate::error::HelpdeskError;
use crate::types::{
    truncate_preview, AccessLevel, ConversationMeta, InProtocol, Mailbox, NewConversation,
    NewThread, ThreadType,
};

/// Outcome of one fetch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchResult {
    /// Messages downloaded
    pub fetched: usize,
    /// Threads created from them
    pub created: usize,
    pub errors: usize,
    /// Human-readable status lines
    pub messages: Vec<String>,
}

impl FetchResult {
    fn note(&mut self, line: String) {
        self.messages.push(line);
    }

    fn fail(&mut self, line: String) {
        self.errors += 1;
        self.messages.push(line);
    }

    fn absorb(&mut self, other: FetchResult) {
        self.fetched += other.fetched;
        self.created += other.created;
        self.errors += other.errors;
        self.messages.extend(other.messages);
    }
}

/// What happened to one downloaded message.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Imported {
    Thread {
        conversation_id: i64,
        thread_id: i64,
        new_conversation: bool,
    },
    Skipped(String),
}

/// Fields pulled out of a raw message.
#[derive(Debug, Clone)]
struct IncomingMail {
    from: String,
    from_name: Option<String>,
    to: Vec<String>,
    cc: Vec<String>,
    subject: String,
    body: String,
    headers: String,
    message_id: String,
    in_reply_to: Option<String>,
    references: Vec<String>,
    auto_responder: bool,
    bounce: bool,
}

#[derive(Clone)]
pub struct Fetcher {
    lifecycle: Lifecycle,
    client: Arc<dyn InboundClient>,
    queue: JobQueue,
}

impl Fetcher {
    pub fn new(lifecycle: Lifecycle, client: Arc<dyn InboundClient>, queue: JobQueue) -> Self {
        Self {
            lifecycle,
            client,
            queue,
        }
    }

    /// Fetch every mailbox in turn.
    pub async fn fetch_all(&self) -> FetchResult {
        let mut total = FetchResult::default();

        let list = self
            .lifecycle
            .pool()
            .get()
            .map_err(HelpdeskError::from)
            .and_then(|conn| mailboxes::list(&conn, self.lifecycle.cipher()));

        let list = match list {
            Ok(list) => list,
            Err(e) => {
                error!("Failed to list mailboxes: {}", e);
                total.fail(format!("Failed to list mailboxes: {}", e));
                return total;
            }
        };

        for mailbox in &list {
            total.absorb(self.fetch_emails(mailbox).await);
        }
        total
    }

    /// Import unseen mail of one mailbox.
    pub async fn fetch_emails(&self, mailbox: &Mailbox) -> FetchResult {
        let mut result = FetchResult::default();
        let settings = &mailbox.inbound;

        if settings.server.trim().is_empty() {
            debug!(mailbox_id = mailbox.id, "No incoming server configured");
            return result;
        }

        if settings.protocol == InProtocol::Pop3 {
            warn!(mailbox_id = mailbox.id, "POP3 fetching is not supported");
            result.note(format!("{}: POP3 fetching is not supported", mailbox.name));
            return result;
        }

        let mut session = match self.client.connect(settings).await {
            Ok(session) => session,
            Err(e) => {
                error!(mailbox_id = mailbox.id, server = %settings.server, error = %e, "Could not connect to mailbox");
                result.fail(format!("{}: {}", mailbox.name, e));
                return result;
            }
        };

        for folder in settings.folders() {
            self.fetch_folder(mailbox, session.as_mut(), &folder, &mut result)
                .await;
        }

        if let Err(e) = session.logout().await {
            debug!(mailbox_id = mailbox.id, error = %e, "Logout failed");
        }

        info!(
            mailbox_id = mailbox.id,
            fetched = result.fetched,
            created = result.created,
            errors = result.errors,
            "Fetched mailbox"
        );
        result
    }

    async fn fetch_folder(
        &self,
        mailbox: &Mailbox,
        session: &mut dyn InboundSession,
        folder: &str,
        result: &mut FetchResult,
    ) {
        match session.select(folder).await {
            Ok(()) => {}
            Err(HelpdeskError::NotFound(_)) => {
                warn!(mailbox_id = mailbox.id, folder, "IMAP folder not found, skipping");
                result.note(format!("{}: folder {} not found", mailbox.name, folder));
                return;
            }
            Err(e) => {
                error!(mailbox_id = mailbox.id, folder, error = %e, "Could not select folder");
                result.fail(format!("{}: {}", mailbox.name, e));
                return;
            }
        }

        let messages = match session.fetch_unseen().await {
            Ok(messages) => messages,
            Err(e) => {
                error!(mailbox_id = mailbox.id, folder, error = %e, "Could not fetch messages");
                result.fail(format!("{}: {}", mailbox.name, e));
                return;
            }
        };

        debug!(mailbox_id = mailbox.id, folder, count = messages.len(), "Unseen messages");

        for raw in messages {
            result.fetched += 1;

            match self.import(mailbox, &raw.body) {
                Ok(Imported::Thread {
                    conversation_id,
                    thread_id,
                    new_conversation,
                }) => {
                    result.created += 1;
                    debug!(mailbox_id = mailbox.id, uid = raw.uid, conversation_id, thread_id, new_conversation, "Imported message");
                }
                Ok(Imported::Skipped(reason)) => {
                    debug!(mailbox_id = mailbox.id, uid = raw.uid, %reason, "Skipped message");
                    result.note(format!("{}: skipped message {}: {}", mailbox.name, raw.uid, reason));
                }
                Err(e) => {
                    // Left unseen so the next run tries again
                    error!(mailbox_id = mailbox.id, folder, uid = raw.uid, error = %e, "Could not import message");
                    result.fail(format!("{}: message {}: {}", mailbox.name, raw.uid, e));
                    continue;
                }
            }

            if let Err(e) = session.mark_seen(raw.uid).await {
                warn!(mailbox_id = mailbox.id, uid = raw.uid, error = %e, "Could not mark message seen");
                result.fail(format!("{}: message {}: {}", mailbox.name, raw.uid, e));
            }
        }
    }

    /// Store one message as a customer thread and queue its notifications.
    fn import(&self, mailbox: &Mailbox, raw: &[u8]) -> Result<Imported, HelpdeskError> {
        let Some(mail) = parse_incoming(raw, mailbox)? else {
            return Ok(Imported::Skipped("no valid sender".to_string()));
        };

        if mail_rules::sanitize_email(&mailbox.email).as_deref() == Some(mail.from.as_str()) {
            return Ok(Imported::Skipped("sent by the mailbox itself".to_string()));
        }

        let (existing, customer) = {
            let conn = self.lifecycle.pool().get()?;
            if threads::message_id_exists(&conn, mailbox.id, &mail.message_id)? {
                return Ok(Imported::Skipped(format!("duplicate {}", mail.message_id)));
            }

            let mut related = mail.references.clone();
            related.extend(mail.in_reply_to.iter().cloned());
            let existing = conversations::find_by_message_ids(&conn, mailbox.id, &related)?;

            let (first_name, last_name) = split_name(mail.from_name.as_deref());
            let customer = customers::find_or_create(
                &conn,
                &mail.from,
                first_name.as_deref(),
                last_name.as_deref(),
            )?;
            (existing, customer)
        };

        let thread_type = if mail.bounce {
            ThreadType::Bounce
        } else {
            ThreadType::Customer
        };
        let new_thread = NewThread {
            headers: Some(mail.headers.clone()),
            from: Some(mail.from.clone()),
            to: mail.to.clone(),
            cc: mail.cc.clone(),
            message_id: Some(mail.message_id.clone()),
            in_reply_to: mail.in_reply_to.clone(),
            created_by_customer_id: Some(customer.id),
            ..NewThread::new(existing.unwrap_or_default(), thread_type, &mail.body)
        };

        let (conversation_id, thread, new_conversation) = match existing {
            Some(id) => (id, self.lifecycle.add_thread(&new_thread)?, false),
            None => {
                let (conversation, thread) = self.lifecycle.create_conversation_with_thread(
                    &NewConversation {
                        customer_id: Some(customer.id),
                        customer_email: Some(mail.from.clone()),
                        preview: truncate_preview(&mail.body, 255),
                        meta: ConversationMeta {
                            origin_message_id: Some(mail.message_id.clone()),
                            ..Default::default()
                        },
                        ..NewConversation::published(mailbox.id, &mail.subject)
                    },
                    &new_thread,
                )?;
                (conversation.id, thread, true)
            }
        };

        if new_conversation && mailbox.auto_reply_enabled && !mail.auto_responder && !mail.bounce {
            self.dispatch(&Job::SendAutoReply {
                conversation_id,
                thread_id: thread.id,
                mailbox_id: mailbox.id,
                customer_id: Some(customer.id),
            });
        }

        let user_ids = {
            let conn = self.lifecycle.pool().get()?;
            mailboxes::user_ids_with_access(&conn, mailbox.id, AccessLevel::View)?
        };
        if !user_ids.is_empty() {
            self.dispatch(&Job::SendNotificationToUsers {
                user_ids,
                conversation_id,
                thread_ids: vec![thread.id],
            });
        }

        Ok(Imported::Thread {
            conversation_id,
            thread_id: thread.id,
            new_conversation,
        })
    }

    /// The thread is stored already; a failed dispatch only loses the mail.
    fn dispatch(&self, job: &Job) {
        if let Err(e) = self.queue.dispatch(job) {
            error!(job = job.name(), error = %e, "Could not queue job");
        }
    }
}

/// `None` when the sender address is missing or invalid.
fn parse_incoming(raw: &[u8], mailbox: &Mailbox) -> Result<Option<IncomingMail>, HelpdeskError> {
    let parsed = mailparse::parse_mail(raw)?;
    let (_, header_end) = mailparse::parse_headers(raw)?;
    let headers = String::from_utf8_lossy(&raw[..header_end]).to_string();

    let Some(from_header) = parsed.headers.get_first_header("From") else {
        return Ok(None);
    };
    let sender = mailparse::addrparse_header(from_header)
        .ok()
        .and_then(|list| list.extract_single_info());
    let Some(sender) = sender else {
        return Ok(None);
    };
    let Some(from) = mail_rules::sanitize_email(&sender.addr) else {
        return Ok(None);
    };

    let message_id = parsed
        .headers
        .get_first_value("Message-ID")
        .and_then(|v| mail_rules::extract_message_ids(&v).into_iter().next())
        .unwrap_or_else(|| generated_message_id(&mailbox.email));

    let in_reply_to = parsed
        .headers
        .get_first_value("In-Reply-To")
        .and_then(|v| mail_rules::extract_message_ids(&v).into_iter().next());

    let references = parsed
        .headers
        .get_first_value("References")
        .map(|v| mail_rules::extract_message_ids(&v))
        .unwrap_or_default();

    let subject = parsed
        .headers
        .get_first_value("Subject")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "(no subject)".to_string());

    Ok(Some(IncomingMail {
        from,
        from_name: sender.display_name.filter(|n| !n.trim().is_empty()),
        to: addresses(&parsed, "To"),
        cc: addresses(&parsed, "Cc"),
        subject,
        body: extract_text(&parsed),
        auto_responder: mail_rules::is_auto_responder(&headers),
        bounce: mail_rules::is_bounce(&headers),
        headers,
        message_id,
        in_reply_to,
        references,
    }))
}

fn generated_message_id(mailbox_email: &str) -> String {
    let domain = mailbox_email
        .rsplit_once('@')
        .map(|(_, d)| d)
        .unwrap_or("localhost");
    format!("{}@{}", uuid::Uuid::new_v4(), domain)
}

fn addresses(parsed: &ParsedMail, header: &str) -> Vec<String> {
    let Some(header) = parsed.headers.get_first_header(header) else {
        return Vec::new();
    };
    let Ok(list) = mailparse::addrparse_header(header) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for addr in list.iter() {
        match addr {
            MailAddr::Single(info) => out.extend(mail_rules::sanitize_email(&info.addr)),
            MailAddr::Group(group) => {
                for member in &group.addrs {
                    out.extend(mail_rules::sanitize_email(&member.addr));
                }
            }
        }
    }
    out
}

/// Plain text parts joined; HTML only when there is no plain text.
fn extract_text(parsed: &ParsedMail) -> String {
    let mut plain = Vec::new();
    let mut html = Vec::new();
    collect_parts(parsed, &mut plain, &mut html);

    let text = if !plain.is_empty() {
        plain.join("\n\n")
    } else if !html.is_empty() {
        mail_rules::html_to_text(&html.join("\n\n"))
    } else {
        parsed.get_body().unwrap_or_default()
    };

    text.replace("\r\n", "\n").trim().to_string()
}

fn collect_parts(part: &ParsedMail, plain: &mut Vec<String>, html: &mut Vec<String>) {
    if !part.subparts.is_empty() {
        for subpart in &part.subparts {
            collect_parts(subpart, plain, html);
        }
        return;
    }

    if matches!(
        part.get_content_disposition().disposition,
        mailparse::DispositionType::Attachment
    ) {
        return;
    }

    let mime_type = part.ctype.mimetype.to_ascii_lowercase();
    let Ok(body) = part.get_body() else {
        return;
    };
    if body.trim().is_empty() {
        return;
    }

    if mime_type.starts_with("text/plain") {
        plain.push(body);
    } else if mime_type.starts_with("text/html") {
        html.push(body);
    }
}

fn split_name(name: Option<&str>) -> (Option<String>, Option<String>) {
    let Some(name) = name.map(|n| n.trim().trim_matches('"').trim()).filter(|n| !n.is_empty()) else {
        return (None, None);
    };
    match name.split_once(char::is_whitespace) {
        Some((first, last)) => (Some(first.to_string()), Some(last.trim().to_string())),
        None => (Some(name.to_string()), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::adapters::imap::RawMessage;
    use crate::adapters::sqlite::{folders, jobs};
    use crate::services::jobs::worker::run_until_idle;
    use crate::services::testing::Fixture;
    use crate::types::{
        ConversationStatus, FolderType, InboundSettings, MailType, NewMailbox, OutboundSettings,
    };

    /// In-memory IMAP server: folder name to messages.
    #[derive(Default, Clone)]
    struct FakeImapClient {
        folders: Arc<Mutex<HashMap<String, Vec<RawMessage>>>>,
        seen: Arc<Mutex<Vec<u32>>>,
        refuse: Option<String>,
    }

    impl FakeImapClient {
        fn deliver(&self, folder: &str, uid: u32, source: &str) {
            self.folders
                .lock()
                .unwrap()
                .entry(folder.to_string())
                .or_default()
                .push(RawMessage {
                    uid,
                    body: source.as_bytes().to_vec(),
                });
        }

        fn seen(&self) -> Vec<u32> {
            self.seen.lock().unwrap().clone()
        }
    }

    struct FakeSession {
        client: FakeImapClient,
        selected: Option<String>,
    }

    #[async_trait]
    impl InboundClient for FakeImapClient {
        async fn connect(
            &self,
            _settings: &InboundSettings,
        ) -> Result<Box<dyn InboundSession>, HelpdeskError> {
            if let Some(reason) = &self.refuse {
                return Err(HelpdeskError::Imap(reason.clone()));
            }
            Ok(Box::new(FakeSession {
                client: self.clone(),
                selected: None,
            }))
        }
    }

    #[async_trait]
    impl InboundSession for FakeSession {
        async fn select(&mut self, folder: &str) -> Result<(), HelpdeskError> {
            if !self.client.folders.lock().unwrap().contains_key(folder) {
                return Err(HelpdeskError::NotFound(format!("folder {}", folder)));
            }
            self.selected = Some(folder.to_string());
            Ok(())
        }

        async fn fetch_unseen(&mut self) -> Result<Vec<RawMessage>, HelpdeskError> {
            let folder = self.selected.clone().unwrap_or_default();
            let seen = self.client.seen();
            Ok(self
                .client
                .folders
                .lock()
                .unwrap()
                .get(&folder)
                .map(|messages| {
                    messages
                        .iter()
                        .filter(|m| !seen.contains(&m.uid))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn mark_seen(&mut self, uid: u32) -> Result<(), HelpdeskError> {
            self.client.seen.lock().unwrap().push(uid);
            Ok(())
        }

        async fn logout(&mut self) -> Result<(), HelpdeskError> {
            Ok(())
        }
    }

    fn imap_mailbox(fixture: &Fixture, folders: &[&str], auto_reply: bool) -> Mailbox {
        fixture
            .lifecycle
            .create_mailbox(&NewMailbox {
                name: "Support".to_string(),
                email: "support@example.com".to_string(),
                inbound: InboundSettings {
                    server: "imap.example.com".to_string(),
                    port: 993,
                    username: "support".to_string(),
                    password: "secret".to_string(),
                    imap_folders: folders.iter().map(|f| f.to_string()).collect(),
                    ..Default::default()
                },
                outbound: OutboundSettings {
                    server: "smtp.example.com".to_string(),
                    ..Default::default()
                },
                auto_reply_enabled: auto_reply,
                ..Default::default()
            })
            .unwrap()
    }

    fn fetcher(fixture: &Fixture, client: &FakeImapClient) -> Fetcher {
        Fetcher::new(
            fixture.lifecycle.clone(),
            Arc::new(client.clone()),
            fixture.queue.clone(),
        )
    }

    const FIRST: &str = "From: \"Ana Lima\" <Ana.Lima@Customer.Example>\r\n\
To: support@example.com\r\n\
Subject: Cannot reset password\r\n\
Message-ID: <first@customer.example>\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
The reset link says it expired.\r\n";

    const REPLY: &str = "From: ana.lima@customer.example\r\n\
To: support@example.com\r\n\
Subject: Re: Cannot reset password\r\n\
Message-ID: <second@customer.example>\r\n\
In-Reply-To: <first@customer.example>\r\n\
References: <first@customer.example>\r\n\
Content-Type: text/plain\r\n\
\r\n\
Still broken.\r\n";

    const VACATION: &str = "From: bob@customer.example\r\n\
To: support@example.com\r\n\
Subject: Out of office\r\n\
Message-ID: <ooo@customer.example>\r\n\
Auto-Submitted: auto-replied\r\n\
\r\n\
I am away until Monday.\r\n";

    fn count_jobs(fixture: &Fixture, job_type: &str) -> usize {
        let conn = fixture.pool.get().unwrap();
        jobs::list_by_status(&conn, jobs::JobStatus::Pending)
            .unwrap()
            .iter()
            .filter(|j| j.job_type == job_type)
            .count()
    }

    #[tokio::test]
    async fn test_empty_server_is_noop() {
        let fixture = Fixture::new();
        let mailbox = fixture.mailbox(false);
        let client = FakeImapClient {
            refuse: Some("must not connect".to_string()),
            ..Default::default()
        };

        let result = fetcher(&fixture, &client).fetch_emails(&mailbox).await;
        assert_eq!(result, FetchResult::default());
    }

    #[tokio::test]
    async fn test_connection_failure_is_counted() {
        let fixture = Fixture::new();
        let mailbox = imap_mailbox(&fixture, &["INBOX"], false);
        let client = FakeImapClient {
            refuse: Some("authentication failed".to_string()),
            ..Default::default()
        };

        let result = fetcher(&fixture, &client).fetch_emails(&mailbox).await;
        assert_eq!(result.fetched, 0);
        assert_eq!(result.errors, 1);
        assert!(result.messages[0].contains("authentication failed"));
    }

    #[tokio::test]
    async fn test_missing_folder_is_skipped() {
        let fixture = Fixture::new();
        let mailbox = imap_mailbox(&fixture, &["Archive", "INBOX"], false);
        let client = FakeImapClient::default();
        client.deliver("INBOX", 1, FIRST);

        let result = fetcher(&fixture, &client).fetch_emails(&mailbox).await;
        assert_eq!(result.errors, 0);
        assert_eq!(result.fetched, 1);
        assert_eq!(result.created, 1);
        assert!(result.messages.iter().any(|m| m.contains("Archive")));
    }

    #[tokio::test]
    async fn test_new_message_creates_conversation() {
        let fixture = Fixture::new();
        let mailbox = imap_mailbox(&fixture, &["INBOX"], true);
        fixture.agent(mailbox.id, "kim@example.com");
        let client = FakeImapClient::default();
        client.deliver("INBOX", 7, FIRST);

        let result = fetcher(&fixture, &client).fetch_emails(&mailbox).await;
        assert_eq!((result.fetched, result.created, result.errors), (1, 1, 0));
        assert_eq!(client.seen(), vec![7]);

        let conn = fixture.pool.get().unwrap();
        let ids = conversations::ids_for_mailbox(&conn, mailbox.id).unwrap();
        assert_eq!(ids.len(), 1);
        let conversation = conversations::get(&conn, ids[0]).unwrap().unwrap();
        assert_eq!(conversation.subject, "Cannot reset password");
        assert_eq!(conversation.customer_email.as_deref(), Some("ana.lima@customer.example"));
        assert_eq!(conversation.status, ConversationStatus::Active);

        let unassigned = folders::find(&conn, mailbox.id, FolderType::Unassigned, None)
            .unwrap()
            .unwrap();
        assert_eq!(conversation.folder_id, Some(unassigned.id));

        let customer = customers::get(&conn, conversation.customer_id.unwrap()).unwrap().unwrap();
        assert_eq!(customer.first_name.as_deref(), Some("Ana"));
        assert_eq!(customer.last_name.as_deref(), Some("Lima"));

        let thread = &threads::list_for_conversation(&conn, conversation.id).unwrap()[0];
        assert_eq!(thread.thread_type, ThreadType::Customer);
        assert_eq!(thread.body, "The reset link says it expired.");
        assert_eq!(thread.message_id.as_deref(), Some("first@customer.example"));
        drop(conn);

        assert_eq!(count_jobs(&fixture, "send_auto_reply"), 1);
        assert_eq!(count_jobs(&fixture, "send_notification_to_users"), 1);
    }

    #[tokio::test]
    async fn test_reply_threads_into_existing_conversation() {
        let fixture = Fixture::new();
        let mailbox = imap_mailbox(&fixture, &["INBOX"], true);
        let client = FakeImapClient::default();
        client.deliver("INBOX", 1, FIRST);
        let fetcher = fetcher(&fixture, &client);
        fetcher.fetch_emails(&mailbox).await;

        client.deliver("INBOX", 2, REPLY);
        let result = fetcher.fetch_emails(&mailbox).await;
        assert_eq!((result.fetched, result.created), (1, 1));

        let conn = fixture.pool.get().unwrap();
        let ids = conversations::ids_for_mailbox(&conn, mailbox.id).unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(threads::list_for_conversation(&conn, ids[0]).unwrap().len(), 2);
        drop(conn);

        // Only the new conversation is acknowledged
        assert_eq!(count_jobs(&fixture, "send_auto_reply"), 1);
    }

    #[tokio::test]
    async fn test_reply_to_our_own_mail_threads_into_conversation() {
        let fixture = Fixture::new();
        let mailbox = imap_mailbox(&fixture, &["INBOX"], false);
        let client = FakeImapClient::default();
        client.deliver("INBOX", 1, FIRST);
        let fetcher = fetcher(&fixture, &client);
        fetcher.fetch_emails(&mailbox).await;

        let conversation_id = {
            let conn = fixture.pool.get().unwrap();
            conversations::ids_for_mailbox(&conn, mailbox.id).unwrap()[0]
        };
        let answer = fixture
            .lifecycle
            .add_thread(&NewThread::new(conversation_id, ThreadType::Message, "Try this link instead"))
            .unwrap();
        crate::services::jobs::tasks::conversation_reply::run(
            &fixture.context,
            conversation_id,
            answer.id,
            "ana.lima@customer.example",
        )
        .await
        .unwrap();
        let sent_id = fixture.mailer.sent()[0].message_id.clone();

        client.deliver(
            "INBOX",
            2,
            &format!(
                "From: ana.lima@customer.example\r\n\
Subject: Re: Cannot reset password\r\n\
Message-ID: <third@customer.example>\r\n\
In-Reply-To: <{}>\r\n\
\r\n\
That worked, thanks.\r\n",
                sent_id
            ),
        );
        let result = fetcher.fetch_emails(&mailbox).await;
        assert_eq!((result.fetched, result.created, result.errors), (1, 1, 0));

        let conn = fixture.pool.get().unwrap();
        assert_eq!(conversations::ids_for_mailbox(&conn, mailbox.id).unwrap(), vec![conversation_id]);
        assert_eq!(threads::list_for_conversation(&conn, conversation_id).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_and_own_messages_are_skipped() {
        let fixture = Fixture::new();
        let mailbox = imap_mailbox(&fixture, &["INBOX"], false);
        let client = FakeImapClient::default();
        client.deliver("INBOX", 1, FIRST);
        client.deliver("INBOX", 2, FIRST);
        client.deliver(
            "INBOX",
            3,
            "From: Support <support@example.com>\r\nSubject: loop\r\n\r\nhello\r\n",
        );

        let result = fetcher(&fixture, &client).fetch_emails(&mailbox).await;
        assert_eq!((result.fetched, result.created, result.errors), (3, 1, 0));
        assert_eq!(client.seen(), vec![1, 2, 3]);
        assert!(result.messages.iter().any(|m| m.contains("duplicate")));
    }

    #[tokio::test]
    async fn test_auto_responder_gets_no_auto_reply() {
        let fixture = Fixture::new();
        let mailbox = imap_mailbox(&fixture, &["INBOX"], true);
        let client = FakeImapClient::default();
        client.deliver("INBOX", 1, VACATION);

        let result = fetcher(&fixture, &client).fetch_emails(&mailbox).await;
        assert_eq!(result.created, 1);
        assert_eq!(count_jobs(&fixture, "send_auto_reply"), 0);
    }

    #[tokio::test]
    async fn test_missing_message_id_is_generated() {
        let fixture = Fixture::new();
        let mailbox = imap_mailbox(&fixture, &["INBOX"], false);
        let client = FakeImapClient::default();
        client.deliver(
            "INBOX",
            1,
            "From: ana@customer.example\r\nSubject: hi\r\nContent-Type: text/html\r\n\r\n<p>Hello <b>team</b></p>\r\n",
        );

        fetcher(&fixture, &client).fetch_emails(&mailbox).await;

        let conn = fixture.pool.get().unwrap();
        let id = conversations::ids_for_mailbox(&conn, mailbox.id).unwrap()[0];
        let thread = &threads::list_for_conversation(&conn, id).unwrap()[0];
        assert!(thread.message_id.as_deref().unwrap().ends_with("@example.com"));
        assert_eq!(thread.body, "Hello team");
    }

    #[tokio::test]
    async fn test_invalid_sender_is_skipped() {
        let fixture = Fixture::new();
        let mailbox = imap_mailbox(&fixture, &["INBOX"], false);
        let client = FakeImapClient::default();
        client.deliver("INBOX", 1, "From: nobody\r\nSubject: ?\r\n\r\nbody\r\n");

        let result = fetcher(&fixture, &client).fetch_emails(&mailbox).await;
        assert_eq!((result.fetched, result.created, result.errors), (1, 0, 0));
    }

    #[tokio::test]
    async fn test_fetch_then_deliver_auto_reply() {
        let fixture = Fixture::new();
        let mailbox = imap_mailbox(&fixture, &["INBOX"], true);
        let client = FakeImapClient::default();
        client.deliver("INBOX", 1, FIRST);

        fetcher(&fixture, &client).fetch_all().await;
        run_until_idle(&fixture.queue, &fixture.context).await.unwrap();

        let sent = fixture.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_email, "ana.lima@customer.example");
        assert_eq!(sent[0].in_reply_to.as_deref(), Some("first@customer.example"));
        assert_eq!(fixture.mailer.transports()[0].server, "smtp.example.com");

        let conn = fixture.pool.get().unwrap();
        let logs = crate::adapters::sqlite::send_logs::list_by_type(&conn, MailType::AutoReply).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].email, "ana.lima@customer.example");
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name(Some("Ana Lima")), (Some("Ana".to_string()), Some("Lima".to_string())));
        assert_eq!(split_name(Some("\"Ana\"")), (Some("Ana".to_string()), None));
        assert_eq!(split_name(Some("  ")), (None, None));
        assert_eq!(split_name(None), (None, None));
    }
}
