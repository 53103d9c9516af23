//! Settlement worker: a bounded intake queue drained by one background
//! consumer that retries each job with linear backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use reimburse_core::config::{
    SettlementConfig, DEFAULT_ATTEMPT_TIMEOUT_SECS, DEFAULT_QUEUE_CAPACITY, DEFAULT_RETRY_COUNT,
    DEFAULT_RETRY_DELAY_MS,
};
use reimburse_core::{ExpenseError, ExpenseId, JobState, SettlementJob, SettlementOutcome};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettlementWorkerConfig {
    pub queue_capacity: usize,
    /// Total attempts per job, including the first one.
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for SettlementWorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            attempt_timeout: Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS),
        }
    }
}

impl SettlementWorkerConfig {
    pub fn from_settings(settings: &SettlementConfig) -> Self {
        Self {
            queue_capacity: settings.queue_capacity,
            retry_count: settings.retry_count,
            retry_delay: settings.retry_delay(),
            attempt_timeout: settings.attempt_timeout(),
        }
        .normalized()
    }

    /// Zero values fall back to the defaults.
    pub fn normalized(self) -> Self {
        let defaults = Self::default();
        Self {
            queue_capacity: if self.queue_capacity == 0 {
                defaults.queue_capacity
            } else {
                self.queue_capacity
            },
            retry_count: if self.retry_count == 0 { defaults.retry_count } else { self.retry_count },
            retry_delay: if self.retry_delay.is_zero() {
                defaults.retry_delay
            } else {
                self.retry_delay
            },
            attempt_timeout: if self.attempt_timeout.is_zero() {
                defaults.attempt_timeout
            } else {
                self.attempt_timeout
            },
        }
    }

    /// Delay before attempt `failed_attempt + 1`: `retry_delay * failed_attempt`.
    pub fn backoff_after(&self, failed_attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(failed_attempt)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    QueueFull,
    Closed,
}

impl EnqueueOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Non-blocking admission into the settlement worker.
pub trait SettlementQueue: Send + Sync {
    fn enqueue(&self, job: SettlementJob) -> EnqueueOutcome;
}

/// Producer side of the intake queue. Cheap to clone; every clone feeds the
/// same bounded channel.
#[derive(Clone, Debug)]
pub struct SettlementIntake {
    sender: mpsc::Sender<SettlementJob>,
}

impl SettlementIntake {
    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    /// Jobs admitted but not yet picked up by the worker.
    pub fn queue_len(&self) -> usize {
        self.sender.max_capacity().saturating_sub(self.sender.capacity())
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl SettlementQueue for SettlementIntake {
    fn enqueue(&self, job: SettlementJob) -> EnqueueOutcome {
        let expense_id = job.expense_id.clone();
        match self.sender.try_send(job) {
            Ok(()) => {
                debug!(
                    event_name = "settlement.queue.accepted",
                    expense_id = %expense_id,
                    queue_len = self.queue_len(),
                    "settlement job queued"
                );
                EnqueueOutcome::Accepted
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    event_name = "settlement.queue.full",
                    expense_id = %expense_id,
                    capacity = self.capacity(),
                    "settlement queue full; job dropped"
                );
                EnqueueOutcome::QueueFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(
                    event_name = "settlement.queue.closed",
                    expense_id = %expense_id,
                    "settlement worker stopped; job dropped"
                );
                EnqueueOutcome::Closed
            }
        }
    }
}

/// Consumer side of the intake queue, owned by exactly one worker.
#[derive(Debug)]
pub struct SettlementReceiver {
    receiver: mpsc::Receiver<SettlementJob>,
}

impl SettlementReceiver {
    /// Waits for the next job; `None` once every intake handle is gone.
    pub async fn next(&mut self) -> Option<SettlementJob> {
        self.receiver.recv().await
    }

    pub fn try_next(&mut self) -> Option<SettlementJob> {
        self.receiver.try_recv().ok()
    }

    /// Refuses further admissions and returns whatever was still queued.
    pub fn close_and_drain(&mut self) -> Vec<SettlementJob> {
        self.receiver.close();
        let mut remaining = Vec::new();
        while let Ok(job) = self.receiver.try_recv() {
            remaining.push(job);
        }
        remaining
    }
}

pub fn settlement_queue(capacity: usize) -> (SettlementIntake, SettlementReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (SettlementIntake { sender }, SettlementReceiver { receiver })
}

/// One settlement attempt. Implemented by the orchestrator; tests swap in
/// scripted handlers.
#[async_trait]
pub trait SettlementHandler: Send + Sync {
    async fn settle(&self, job: &SettlementJob) -> Result<SettlementOutcome, ExpenseError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobReport {
    pub expense_id: ExpenseId,
    pub state: JobState,
    pub attempts: u32,
    pub outcome: Option<SettlementOutcome>,
    pub failures: Vec<ExpenseError>,
    pub backoffs: Vec<Duration>,
}

impl JobReport {
    fn advance(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal job transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }
}

/// Runs one job to a terminal state. Each attempt is bounded by
/// `attempt_timeout`; only retryable failures are retried, after sleeping
/// `retry_delay * attempt`.
pub async fn process_job(
    handler: &dyn SettlementHandler,
    job: SettlementJob,
    config: &SettlementWorkerConfig,
) -> JobReport {
    let max_attempts = config.retry_count.max(1);
    let mut report = JobReport {
        expense_id: job.expense_id.clone(),
        state: JobState::Pending,
        attempts: 0,
        outcome: None,
        failures: Vec::new(),
        backoffs: Vec::new(),
    };

    loop {
        report.advance(JobState::Attempting);
        report.attempts += 1;
        let attempt = report.attempts;

        let result = match tokio::time::timeout(config.attempt_timeout, handler.settle(&job)).await
        {
            Ok(result) => result,
            Err(_) => Err(ExpenseError::Settlement(format!(
                "attempt timed out after {}ms",
                config.attempt_timeout.as_millis()
            ))),
        };

        match result {
            Ok(outcome) => {
                report.advance(JobState::Succeeded);
                report.outcome = Some(outcome);
                info!(
                    event_name = "settlement.job.succeeded",
                    expense_id = %job.expense_id,
                    attempt,
                    outcome = ?outcome,
                    "settlement job finished"
                );
                return report;
            }
            Err(error) => {
                warn!(
                    event_name = "settlement.attempt.failed",
                    expense_id = %job.expense_id,
                    attempt,
                    max_attempts,
                    error_kind = error.kind(),
                    error = %error,
                    "settlement attempt failed"
                );
                let retryable = error.is_retryable();
                report.failures.push(error);

                if !retryable || attempt >= max_attempts {
                    report.advance(JobState::Abandoned);
                    warn!(
                        event_name = "settlement.job.abandoned",
                        expense_id = %job.expense_id,
                        attempts = attempt,
                        retryable,
                        "settlement abandoned; expense needs reconciliation"
                    );
                    return report;
                }

                report.advance(JobState::FailedRetryable);
                let delay = config.backoff_after(attempt);
                report.backoffs.push(delay);
                tokio::time::sleep(delay).await;
                report.advance(JobState::Pending);
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub processed: u64,
    pub succeeded: u64,
    pub abandoned: u64,
    pub dropped_on_stop: u64,
}

/// Handle to the single background consumer.
pub struct SettlementWorker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<WorkerSummary>,
}

impl SettlementWorker {
    pub fn start(
        receiver: SettlementReceiver,
        handler: Arc<dyn SettlementHandler>,
        config: SettlementWorkerConfig,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let config = config.normalized();
        info!(
            event_name = "settlement.worker.started",
            retry_count = config.retry_count,
            retry_delay_ms = config.retry_delay.as_millis() as u64,
            attempt_timeout_ms = config.attempt_timeout.as_millis() as u64,
            "settlement worker started"
        );
        let handle = tokio::spawn(run_loop(receiver, handler, config, shutdown_rx));
        Self { shutdown, handle }
    }

    /// Lets the in-flight job finish, drops anything still queued and joins
    /// the consumer.
    pub async fn stop(self) -> WorkerSummary {
        // The loop only drops its receiver after exiting, so a failed send needs no handling.
        self.shutdown.send(true).ok();
        match self.handle.await {
            Ok(summary) => summary,
            Err(error) => {
                warn!(
                    event_name = "settlement.worker.join_failed",
                    error = %error,
                    "settlement worker task ended abnormally"
                );
                WorkerSummary::default()
            }
        }
    }
}

async fn run_loop(
    mut receiver: SettlementReceiver,
    handler: Arc<dyn SettlementHandler>,
    config: SettlementWorkerConfig,
    mut shutdown: watch::Receiver<bool>,
) -> WorkerSummary {
    let mut summary = WorkerSummary::default();

    loop {
        let job = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            job = receiver.next() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let report = process_job(handler.as_ref(), job, &config).await;
        summary.processed += 1;
        match report.state {
            JobState::Succeeded => summary.succeeded += 1,
            _ => summary.abandoned += 1,
        }
    }

    let dropped = receiver.close_and_drain();
    summary.dropped_on_stop = dropped.len() as u64;
    if !dropped.is_empty() {
        warn!(
            event_name = "settlement.worker.dropped_on_stop",
            dropped = dropped.len(),
            "queued settlement jobs dropped at shutdown"
        );
    }
    info!(
        event_name = "settlement.worker.stopped",
        processed = summary.processed,
        succeeded = summary.succeeded,
        abandoned = summary.abandoned,
        "settlement worker stopped"
    );
    summary
}
