//! Helpdesk core
//!
//! Mailboxes, conversations and their folders, mail import and the outbound
//! notification queue.
//!
//! ## Module Organization
//!
//! - `adapters/`: SQLite storage, IMAP client, SMTP/sendmail mailer
//! - `services/`: Business rules (folder routing, policies, lifecycle, fetch, jobs)
//! - `types/`: Domain records
//! - `config/`: Configuration management
//! - `encryption`: Mailbox credentials at rest

pub mod adapters;
pub mod config;
pub mod encryption;
pub mod error;
pub mod services;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use adapters::imap::ImapConnector;
use adapters::smtp::LettreMailer;
use encryption::CredentialCipher;
use error::HelpdeskError;
use services::{EventBus, Fetcher, JobContext, JobQueue, Lifecycle, RetryPolicy, WorkerPool};

pub fn run() -> Result<(), HelpdeskError> {
    // lettre's rustls transport needs a process-wide crypto provider
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }

    // In debug builds, default to debug level for our crate.
    // Can be overridden with RUST_LOG environment variable
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("helpdesk_lib=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting helpdesk ...");

    if let Err(e) = config::init_config() {
        warn!("Could not load config on startup: {}", e);
    }
    let config = config::get_config().unwrap_or_default();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config))
}

async fn serve(config: config::AppConfig) -> Result<(), HelpdeskError> {
    let pool = adapters::sqlite::pool::initialize(&config)?;
    let cipher = Arc::new(CredentialCipher::from_config(&config)?);
    let lifecycle = Lifecycle::new(pool.clone(), cipher.clone(), Arc::new(EventBus::new()));

    let queue = JobQueue::new(pool.clone(), RetryPolicy::from(&config.queue));
    let context = JobContext {
        pool,
        cipher,
        mailer: Arc::new(LettreMailer::new()),
        config: Arc::new(config.clone()),
    };
    let workers = WorkerPool::start(
        queue.clone(),
        context,
        config.queue.workers,
        Duration::from_millis(config.queue.poll_interval_ms),
    )?;

    let fetcher = Fetcher::new(
        lifecycle,
        Arc::new(ImapConnector::new(
            Duration::from_secs(config.fetch.connect_timeout_secs),
            Duration::from_secs(config.fetch.command_timeout_secs),
        )),
        queue.clone(),
    );

    let mut interval = tokio::time::interval(Duration::from_secs(config.fetch.interval_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                // A fetch in progress is abandoned on shutdown; unimported mail stays unseen.
                tokio::select! {
                    result = fetcher.fetch_all() => {
                        if result.errors > 0 {
                            warn!(fetched = result.fetched, created = result.created, errors = result.errors, "Fetch finished with errors");
                        } else {
                            debug!(fetched = result.fetched, created = result.created, "Fetch finished");
                        }
                    }
                    signal = &mut shutdown => {
                        stopping(signal);
                        break;
                    }
                }

                if let Err(e) = queue.prune_completed() {
                    warn!("Could not prune completed jobs: {}", e);
                }
            }
            signal = &mut shutdown => {
                stopping(signal);
                break;
            }
        }
    }

    workers.shutdown().await;
    Ok(())
}

fn stopping(signal: std::io::Result<()>) {
    if let Err(e) = signal {
        error!("Could not listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
}
