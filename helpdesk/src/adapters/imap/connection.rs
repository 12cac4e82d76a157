use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use async_imap::Session;
use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncWrite};
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::{debug, info};

use super::client::{InboundClient, InboundSession, RawMessage};
use crate::error::HelpdeskError;
use crate::types::{Encryption, InboundSettings};

/// Connects to real IMAP servers over TCP, with implicit TLS, STARTTLS or
/// no encryption depending on the mailbox settings.
pub struct ImapConnector {
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl ImapConnector {
    /// `command_timeout` bounds the TLS handshake and every command after connect.
    pub fn new(connect_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            command_timeout,
        }
    }
}

/// An authenticated session over any stream async-imap can drive.
pub struct ImapConnection<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Debug + Send,
{
    session: Session<T>,
    command_timeout: Duration,
}

fn timed_out(command: &str, limit: Duration) -> HelpdeskError {
    HelpdeskError::Imap(format!("{} timed out after {}s", command, limit.as_secs()))
}

/// Run one IMAP step, failing it once `limit` has passed.
async fn within<F, R>(limit: Duration, command: &str, step: F) -> Result<R, HelpdeskError>
where
    F: Future<Output = Result<R, HelpdeskError>>,
{
    tokio::time::timeout(limit, step)
        .await
        .map_err(|_| timed_out(command, limit))?
}

#[async_trait]
impl InboundClient for ImapConnector {
    async fn connect(
        &self,
        settings: &InboundSettings,
    ) -> Result<Box<dyn InboundSession>, HelpdeskError> {
        let host = settings.server.as_str();
        let port = settings.port;
        info!(host = %host, port = port, encryption = settings.encryption.as_str(), "Connecting to IMAP server");

        let tcp = tokio::time::timeout(self.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| HelpdeskError::Imap(format!("Connection to {}:{} timed out", host, port)))?
            .map_err(|e| HelpdeskError::Imap(format!("TCP connection failed: {}", e)))?;
        let tcp = tcp.compat();

        let limit = self.command_timeout;
        match settings.encryption {
            Encryption::Ssl => {
                let tls_stream = within(limit, "TLS handshake", async {
                    async_native_tls::TlsConnector::new()
                        .connect(host, tcp)
                        .await
                        .map_err(|e| HelpdeskError::Imap(format!("TLS handshake failed: {}", e)))
                })
                .await?;
                login(async_imap::Client::new(tls_stream), settings, limit).await
            }
            Encryption::Tls => {
                let tls_stream = within(limit, "STARTTLS", async {
                    let mut client = async_imap::Client::new(tcp);
                    client
                        .run_command_and_check_ok("STARTTLS", None)
                        .await
                        .map_err(|e| HelpdeskError::Imap(format!("STARTTLS failed: {}", e)))?;
                    async_native_tls::TlsConnector::new()
                        .connect(host, client.into_inner())
                        .await
                        .map_err(|e| HelpdeskError::Imap(format!("TLS handshake failed: {}", e)))
                })
                .await?;
                login(async_imap::Client::new(tls_stream), settings, limit).await
            }
            Encryption::None => login(async_imap::Client::new(tcp), settings, limit).await,
        }
    }
}

async fn login<T>(
    client: async_imap::Client<T>,
    settings: &InboundSettings,
    command_timeout: Duration,
) -> Result<Box<dyn InboundSession>, HelpdeskError>
where
    T: AsyncRead + AsyncWrite + Unpin + Debug + Send + 'static,
{
    let session = within(command_timeout, "LOGIN", async {
        client
            .login(&settings.username, &settings.password)
            .await
            .map_err(|(e, _)| HelpdeskError::Imap(format!("Login failed: {}", e)))
    })
    .await?;

    debug!(username = %settings.username, "IMAP login succeeded");
    Ok(Box::new(ImapConnection {
        session,
        command_timeout,
    }))
}

#[async_trait]
impl<T> InboundSession for ImapConnection<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Debug + Send,
{
    async fn select(&mut self, folder: &str) -> Result<(), HelpdeskError> {
        let limit = self.command_timeout;
        match tokio::time::timeout(limit, self.session.select(folder)).await {
            Err(_) => Err(timed_out("SELECT", limit)),
            Ok(Ok(_)) => Ok(()),
            // A tagged NO is how servers answer SELECT for an unknown mailbox
            Ok(Err(async_imap::error::Error::No(e))) => {
                Err(HelpdeskError::NotFound(format!("IMAP folder {}: {}", folder, e)))
            }
            Ok(Err(e)) => Err(HelpdeskError::Imap(format!("SELECT {} failed: {}", folder, e))),
        }
    }

    async fn fetch_unseen(&mut self) -> Result<Vec<RawMessage>, HelpdeskError> {
        let limit = self.command_timeout;
        let session = &mut self.session;

        let uids = within(limit, "UID SEARCH", async {
            session
                .uid_search("UNSEEN")
                .await
                .map_err(|e| HelpdeskError::Imap(format!("UID SEARCH UNSEEN failed: {}", e)))
        })
        .await?;

        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        let uid_set = uids
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let fetches: Vec<_> = within(limit, "UID FETCH", async {
            Ok(session
                .uid_fetch(&uid_set, "(UID BODY.PEEK[])")
                .await
                .map_err(|e| HelpdeskError::Imap(format!("UID FETCH {} failed: {}", uid_set, e)))?
                .collect::<Vec<_>>()
                .await)
        })
        .await?;

        let mut messages = Vec::with_capacity(fetches.len());
        for fetch in fetches {
            let fetch = fetch.map_err(|e| HelpdeskError::Imap(format!("FETCH response: {}", e)))?;
            if let (Some(uid), Some(body)) = (fetch.uid, fetch.body()) {
                messages.push(RawMessage {
                    uid,
                    body: body.to_vec(),
                });
            }
        }
        messages.sort_by_key(|m| m.uid);
        Ok(messages)
    }

    async fn mark_seen(&mut self, uid: u32) -> Result<(), HelpdeskError> {
        let session = &mut self.session;
        within(self.command_timeout, "UID STORE", async {
            let _: Vec<_> = session
                .uid_store(uid.to_string(), "+FLAGS (\\Seen)")
                .await
                .map_err(|e| HelpdeskError::Imap(format!("STORE \\Seen failed: {}", e)))?
                .collect::<Vec<_>>()
                .await;
            Ok(())
        })
        .await
    }

    async fn logout(&mut self) -> Result<(), HelpdeskError> {
        let session = &mut self.session;
        within(self.command_timeout, "LOGOUT", async {
            session
                .logout()
                .await
                .map_err(|e| HelpdeskError::Imap(format!("LOGOUT failed: {}", e)))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_step_times_out() {
        let result: Result<(), HelpdeskError> =
            within(Duration::from_millis(20), "NOOP", std::future::pending()).await;
        match result {
            Err(HelpdeskError::Imap(message)) => assert!(message.contains("NOOP timed out")),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_silent_server_fails_login() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            // Accept and never answer
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let connector = ImapConnector::new(Duration::from_secs(5), Duration::from_millis(200));
        let settings = InboundSettings {
            server: "127.0.0.1".to_string(),
            port,
            encryption: Encryption::None,
            username: "support".to_string(),
            password: "secret".to_string(),
            ..Default::default()
        };

        let result = tokio::time::timeout(Duration::from_secs(5), connector.connect(&settings))
            .await
            .unwrap();
        match result {
            Err(HelpdeskError::Imap(message)) => assert!(message.contains("LOGIN timed out")),
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("login should not succeed"),
        }
    }
}
