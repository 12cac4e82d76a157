use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::queue::{FailureOutcome, Job, JobQueue, QueueSignal};
use super::tasks;
use crate::adapters::smtp::Mailer;
use crate::adapters::sqlite::jobs::JobRecord;
use crate::adapters::sqlite::DbPool;
use crate::config::AppConfig;
use crate::encryption::CredentialCipher;
use crate::error::HelpdeskError;

/// Everything a task needs to run.
#[derive(Clone)]
pub struct JobContext {
    pub pool: DbPool,
    pub cipher: Arc<CredentialCipher>,
    pub mailer: Arc<dyn Mailer>,
    pub config: Arc<AppConfig>,
}

impl JobContext {
    pub async fn run(&self, job: &Job) -> Result<(), HelpdeskError> {
        match job {
            Job::SendAutoReply {
                conversation_id,
                thread_id,
                mailbox_id,
                customer_id,
            } => {
                tasks::auto_reply::run(self, *conversation_id, *thread_id, *mailbox_id, *customer_id)
                    .await
            }
            Job::SendNotificationToUsers {
                user_ids,
                conversation_id,
                thread_ids,
            } => tasks::user_notification::run(self, user_ids, *conversation_id, thread_ids).await,
            Job::SendAlert {
                alert_id,
                text,
                title,
            } => tasks::alert::run(self, alert_id, text, title.as_deref()).await,
            Job::SendConversationReply {
                conversation_id,
                thread_id,
                recipient,
            } => {
                tasks::conversation_reply::run(self, *conversation_id, *thread_id, recipient).await
            }
        }
    }
}

/// Claim one job and run it under the policy timeout.
/// Returns `Ok(false)` when nothing was runnable.
pub async fn tick(queue: &JobQueue, context: &JobContext) -> Result<bool, HelpdeskError> {
    let Some((record, job)) = queue.claim()? else {
        return Ok(false);
    };

    debug!(job_id = record.id, job = job.name(), attempt = record.attempts, "Running job");
    let timeout = queue.policy().timeout;

    let result = match tokio::time::timeout(timeout, context.run(&job)).await {
        Ok(result) => result,
        Err(_) => Err(HelpdeskError::Timeout(timeout.as_secs())),
    };

    match result {
        Ok(()) => {
            queue.complete(&record)?;
            debug!(job_id = record.id, job = job.name(), "Job completed");
        }
        Err(e) => {
            if let FailureOutcome::DeadLettered = queue.fail(&record, &e)? {
                failed(&record, &job, &e);
            }
        }
    }
    Ok(true)
}

/// Final failure hook, called once the job will not run again.
fn failed(record: &JobRecord, job: &Job, error: &HelpdeskError) {
    match job {
        Job::SendAutoReply {
            conversation_id,
            thread_id,
            mailbox_id,
            ..
        } => error!(
            job_id = record.id,
            conversation_id,
            thread_id,
            mailbox_id,
            attempts = record.attempts,
            error = %error,
            "Auto reply could not be sent"
        ),
        Job::SendNotificationToUsers {
            user_ids,
            conversation_id,
            thread_ids,
        } => error!(
            job_id = record.id,
            conversation_id,
            ?user_ids,
            ?thread_ids,
            attempts = record.attempts,
            error = %error,
            "User notification could not be sent"
        ),
        Job::SendAlert { alert_id, title, .. } => error!(
            job_id = record.id,
            %alert_id,
            ?title,
            attempts = record.attempts,
            error = %error,
            "Alert could not be sent"
        ),
        Job::SendConversationReply {
            conversation_id,
            thread_id,
            recipient,
        } => error!(
            job_id = record.id,
            conversation_id,
            thread_id,
            %recipient,
            attempts = record.attempts,
            error = %error,
            "Conversation could not be sent"
        ),
    }
}

/// Run jobs until none is runnable. Used by tests and one-shot runs.
pub async fn run_until_idle(queue: &JobQueue, context: &JobContext) -> Result<usize, HelpdeskError> {
    let mut processed = 0;
    while tick(queue, context).await? {
        processed += 1;
    }
    Ok(processed)
}

pub struct WorkerPool {
    queue: JobQueue,
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks on the current runtime.
    pub fn start(
        queue: JobQueue,
        context: JobContext,
        workers: usize,
        poll_interval: Duration,
    ) -> Result<Self, HelpdeskError> {
        queue.recover()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let workers = workers.max(1);
        let mut handles = Vec::with_capacity(workers);

        for worker_id in 0..workers {
            let queue = queue.clone();
            let context = context.clone();
            let shutdown = shutdown.clone();

            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, queue, context, shutdown, poll_interval).await;
            }));
        }

        info!(workers, "Started job workers");
        Ok(Self {
            queue,
            shutdown,
            handles,
        })
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::SeqCst)
    }

    /// Stop after the jobs currently running finish.
    pub async fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.queue.signal_shutdown(self.handles.len());

        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("Job worker ended abnormally: {}", e);
            }
        }
        info!("Job workers stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: JobQueue,
    context: JobContext,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    let signals = queue.signals();
    debug!(worker_id, "Job worker started");

    while !shutdown.load(Ordering::SeqCst) {
        match tick(&queue, &context).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => error!(worker_id, "Job worker error: {}", e),
        }

        // Idle: wait for a dispatch or poll again after the interval, which also
        // picks up rescheduled jobs whose retry delay has passed.
        match tokio::time::timeout(poll_interval, signals.recv_async()).await {
            Ok(Ok(QueueSignal::JobAvailable)) | Err(_) => {}
            Ok(Ok(QueueSignal::Shutdown)) => break,
            Ok(Err(flume::RecvError::Disconnected)) => {
                warn!(worker_id, "Queue signal channel closed");
                break;
            }
        }
    }

    debug!(worker_id, "Job worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::jobs::{self, JobStatus};
    use crate::services::testing::Fixture;
    use crate::types::{InviteState, UserRole, UserStatus};

    fn alert() -> Job {
        Job::alert("Disk almost full", None)
    }

    fn count(fixture: &Fixture, status: JobStatus) -> i64 {
        let conn = fixture.pool.get().unwrap();
        jobs::count_by_status(&conn, status).unwrap()
    }

    #[tokio::test]
    async fn test_run_until_idle_completes_jobs() {
        let fixture = Fixture::new();
        fixture.user("boss@example.com", UserRole::Admin, UserStatus::Active, InviteState::Activated);
        fixture.queue.dispatch(&alert()).unwrap();
        fixture.queue.dispatch(&alert()).unwrap();

        let processed = run_until_idle(&fixture.queue, &fixture.context).await.unwrap();
        assert_eq!(processed, 2);
        assert_eq!(fixture.mailer.sent().len(), 2);
        assert_eq!(count(&fixture, JobStatus::Completed), 2);
    }

    #[tokio::test]
    async fn test_completed_jobs_are_pruned() {
        let fixture = Fixture::new();
        fixture.user("boss@example.com", UserRole::Admin, UserStatus::Active, InviteState::Activated);
        fixture.mailer.reject("boss@example.com");
        fixture.queue.dispatch(&alert()).unwrap();
        run_until_idle(&fixture.queue, &fixture.context).await.unwrap();

        fixture.mailer.accept_all();
        fixture.queue.dispatch(&alert()).unwrap();
        fixture.queue.dispatch(&alert()).unwrap();
        run_until_idle(&fixture.queue, &fixture.context).await.unwrap();
        assert_eq!(count(&fixture, JobStatus::Completed), 2);

        assert_eq!(fixture.queue.prune_completed().unwrap(), 2);
        assert_eq!(count(&fixture, JobStatus::Completed), 0);
        assert_eq!(count(&fixture, JobStatus::Failed), 1);
    }

    #[tokio::test]
    async fn test_failing_job_is_dead_lettered_after_tries() {
        let fixture = Fixture::new();
        fixture.user("boss@example.com", UserRole::Admin, UserStatus::Active, InviteState::Activated);
        fixture.mailer.reject("boss@example.com");
        fixture.queue.dispatch(&alert()).unwrap();

        // Retry delay is zero, so every attempt is runnable right away.
        let processed = run_until_idle(&fixture.queue, &fixture.context).await.unwrap();
        assert_eq!(processed, fixture.queue.policy().tries as usize);
        assert_eq!(count(&fixture, JobStatus::Failed), 1);

        let conn = fixture.pool.get().unwrap();
        let logs = crate::adapters::sqlite::send_logs::count(&conn).unwrap();
        assert_eq!(logs, i64::from(fixture.queue.policy().tries));
    }

    #[tokio::test]
    async fn test_worker_pool_picks_up_dispatched_jobs() {
        let fixture = Fixture::new();
        fixture.user("boss@example.com", UserRole::Admin, UserStatus::Active, InviteState::Activated);

        let workers = WorkerPool::start(
            fixture.queue.clone(),
            fixture.context.clone(),
            1,
            Duration::from_millis(20),
        )
        .unwrap();
        assert!(workers.is_running());

        fixture.queue.dispatch(&alert()).unwrap();
        for _ in 0..100 {
            if !fixture.mailer.sent().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        workers.shutdown().await;
        assert_eq!(fixture.mailer.sent().len(), 1);
        assert_eq!(count(&fixture, JobStatus::Completed), 1);
    }
}
