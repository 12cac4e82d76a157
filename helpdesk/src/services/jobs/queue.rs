use std::time::Duration;

use chrono::Utc;
use flume::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::adapters::sqlite::jobs::{self, JobRecord};
use crate::adapters::sqlite::DbPool;
use crate::config::QueueConfig;
use crate::error::HelpdeskError;

/// Jobs that can be queued. Serialized with a `job` tag into the payload column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum Job {
    /// Acknowledge a new conversation to the customer
    SendAutoReply {
        conversation_id: i64,
        thread_id: i64,
        mailbox_id: i64,
        customer_id: Option<i64>,
    },

    /// Tell mailbox users about new threads
    SendNotificationToUsers {
        user_ids: Vec<i64>,
        conversation_id: i64,
        thread_ids: Vec<i64>,
    },

    /// System alert to every active admin. `alert_id` ties the send logs of
    /// all attempts together.
    SendAlert {
        alert_id: String,
        text: String,
        title: Option<String>,
    },

    /// Send a thread to one explicit address
    SendConversationReply {
        conversation_id: i64,
        thread_id: i64,
        recipient: String,
    },
}

impl Job {
    /// A new alert with its own id.
    pub fn alert(text: impl Into<String>, title: Option<String>) -> Self {
        Self::SendAlert {
            alert_id: uuid::Uuid::new_v4().simple().to_string(),
            text: text.into(),
            title,
        }
    }

    /// Name stored in `jobs.job_type`
    pub fn name(&self) -> &'static str {
        match self {
            Self::SendAutoReply { .. } => "send_auto_reply",
            Self::SendNotificationToUsers { .. } => "send_notification_to_users",
            Self::SendAlert { .. } => "send_alert",
            Self::SendConversationReply { .. } => "send_conversation_reply",
        }
    }
}

/// How often and how long a job may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before the job is dead-lettered
    pub tries: u32,
    /// Hard limit for one attempt
    pub timeout: Duration,
    /// Wait before a failed attempt is retried
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for RetryPolicy {
    fn from(config: &QueueConfig) -> Self {
        Self {
            tries: config.tries.max(1),
            timeout: Duration::from_secs(config.timeout_secs),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
        }
    }
}

/// Wake-up messages for idle workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSignal {
    JobAvailable,
    Shutdown,
}

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    Retrying { attempt: u32, of: u32 },
    DeadLettered,
}

#[derive(Clone)]
pub struct JobQueue {
    pool: DbPool,
    policy: RetryPolicy,
    signal_tx: Sender<QueueSignal>,
    signal_rx: Receiver<QueueSignal>,
}

impl JobQueue {
    pub fn new(pool: DbPool, policy: RetryPolicy) -> Self {
        let (signal_tx, signal_rx) = flume::unbounded();
        Self {
            pool,
            policy,
            signal_tx,
            signal_rx,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn signals(&self) -> Receiver<QueueSignal> {
        self.signal_rx.clone()
    }

    /// Wake every idle worker so it sees the shutdown flag.
    pub fn signal_shutdown(&self, workers: usize) {
        for _ in 0..workers {
            let _ = self.signal_tx.send(QueueSignal::Shutdown);
        }
    }

    /// Persist a job and wake one idle worker.
    pub fn dispatch(&self, job: &Job) -> Result<i64, HelpdeskError> {
        let payload = serde_json::to_string(job)?;
        let conn = self.pool.get()?;
        let id = jobs::enqueue(&conn, job.name(), &payload, self.policy.tries)?;

        debug!(job_id = id, job = job.name(), "Queued job");
        let _ = self.signal_tx.send(QueueSignal::JobAvailable);
        Ok(id)
    }

    /// Claim the next runnable job. Rows whose payload no longer parses are
    /// dead-lettered and skipped.
    pub fn claim(&self) -> Result<Option<(JobRecord, Job)>, HelpdeskError> {
        let conn = self.pool.get()?;
        loop {
            let Some(record) = jobs::claim_next(&conn)? else {
                return Ok(None);
            };

            match serde_json::from_str::<Job>(&record.payload) {
                Ok(job) => return Ok(Some((record, job))),
                Err(e) => {
                    error!(job_id = record.id, job_type = %record.job_type, error = %e, "Unreadable job payload");
                    jobs::mark_failed(&conn, record.id, &format!("Unreadable payload: {}", e))?;
                }
            }
        }
    }

    pub fn complete(&self, record: &JobRecord) -> Result<(), HelpdeskError> {
        let conn = self.pool.get()?;
        jobs::complete(&conn, record.id)
    }

    /// Record a failed attempt: reschedule while tries remain, dead-letter after.
    pub fn fail(
        &self,
        record: &JobRecord,
        error: &HelpdeskError,
    ) -> Result<FailureOutcome, HelpdeskError> {
        let conn = self.pool.get()?;
        let message = error.to_string();

        if record.attempts >= record.max_tries {
            jobs::mark_failed(&conn, record.id, &message)?;
            return Ok(FailureOutcome::DeadLettered);
        }

        let delay = chrono::Duration::from_std(self.policy.retry_delay)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        jobs::reschedule(&conn, record.id, &message, Utc::now() + delay)?;
        warn!(
            job_id = record.id,
            job_type = %record.job_type,
            attempt = record.attempts,
            max_tries = record.max_tries,
            error = %message,
            "Job attempt failed, rescheduled"
        );
        Ok(FailureOutcome::Retrying {
            attempt: record.attempts,
            of: record.max_tries,
        })
    }

    /// Put jobs interrupted by a previous shutdown back in the queue.
    /// Delete completed rows. Failed rows stay for inspection.
    pub fn prune_completed(&self) -> Result<usize, HelpdeskError> {
        let conn = self.pool.get()?;
        let count = jobs::delete_completed(&conn)?;
        if count > 0 {
            debug!(count, "Pruned completed jobs");
        }
        Ok(count)
    }

    pub fn recover(&self) -> Result<usize, HelpdeskError> {
        let conn = self.pool.get()?;
        let count = jobs::requeue_stale(&conn)?;
        if count > 0 {
            warn!(count, "Requeued jobs left in processing");
        }
        Ok(count)
    }
}
