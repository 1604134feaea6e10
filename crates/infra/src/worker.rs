//! Background job processing.
//!
//! A single consumer drains the job queue one job at a time and walks each
//! job's pending items in index order. Job state is re-read from the store at
//! every item boundary so a concurrent cancel is observed before the next item
//! starts. Handler calls in flight are never aborted.

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use forgejobs_core::JobId;
use forgejobs_jobs::{
    ItemResult, Job, JobEvent, JobItemStatus, JobProgress, JobStatus, UpdateJob, UpdateJobItem,
    WorkContext, WorkHandler, WorkHandlerRegistry,
};

use crate::config::ProcessingConfig;
use crate::queue::JobReceiver;
use crate::service::{JobService, JobServiceError};

const RETRIES_EXHAUSTED: &str = "processing failed after all retries";

/// How one dequeued job run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The id no longer resolves to a job; it is dropped.
    NotFound,
    /// The job was already cancelled when dequeued.
    SkippedCancelled,
    /// The job was finalised before and has nothing pending.
    AlreadyFinished,
    /// No handler for the job type; the job was closed out as failed.
    MissingHandler,
    /// A concurrent cancel was observed at an item boundary.
    Cancelled { processed: usize },
    Finished {
        status: JobStatus,
        completed: usize,
        failed: usize,
        duration_ms: u64,
    },
    /// Shutdown was signalled; remaining items stay pending.
    Shutdown,
}

enum ItemOutcome {
    Done,
    /// The item changed underneath the worker (e.g. cancelled).
    Skipped,
    Interrupted,
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct JobProcessingHandle {
    shutdown: CancellationToken,
    join: JoinHandle<()>,
}

impl JobProcessingHandle {
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Signal shutdown and wait for the current item (if any) to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.join.await {
            error!(error = %e, "job processing task ended abnormally");
        }
    }
}

/// The background worker.
pub struct JobProcessingService {
    jobs: JobService,
    registry: WorkHandlerRegistry,
    config: ProcessingConfig,
}

impl JobProcessingService {
    pub fn new(jobs: JobService, registry: WorkHandlerRegistry, config: ProcessingConfig) -> Self {
        Self {
            jobs,
            registry,
            config,
        }
    }

    /// Run the worker on its own task.
    pub fn spawn(self, receiver: JobReceiver) -> JobProcessingHandle {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let join = tokio::spawn(async move { self.run(receiver, token).await });
        JobProcessingHandle { shutdown, join }
    }

    /// Consume the queue until shutdown or until every producer is gone.
    pub async fn run(&self, mut receiver: JobReceiver, shutdown: CancellationToken) {
        info!(
            max_retries = self.config.max_retries,
            handlers = ?self.registry.job_types(),
            "job processing service started"
        );

        loop {
            let id = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = receiver.recv() => match next {
                    Some(id) => id,
                    None => {
                        info!("job queue closed");
                        break;
                    }
                },
            };

            debug!(job_id = %id, "dequeued job");
            match self.process_job(id, &shutdown).await {
                Ok(outcome) => debug!(job_id = %id, outcome = ?outcome, "job run ended"),
                Err(e) => error!(job_id = %id, error = %e, "job run failed"),
            }
        }

        info!("job processing service stopped");
    }

    /// Process one job end to end.
    pub async fn process_job(
        &self,
        id: JobId,
        shutdown: &CancellationToken,
    ) -> Result<ProcessOutcome, JobServiceError> {
        let Some(job) = self.jobs.get_by_id(id).await? else {
            warn!(job_id = %id, "dequeued job not found; dropping");
            return Ok(ProcessOutcome::NotFound);
        };

        if job.status == JobStatus::Cancelled {
            info!(job_id = %id, "job cancelled before processing; skipping");
            return Ok(ProcessOutcome::SkippedCancelled);
        }

        if job.completed_at.is_some() && job.pending_items().is_empty() {
            debug!(job_id = %id, status = %job.status, "job already finished; ignoring");
            return Ok(ProcessOutcome::AlreadyFinished);
        }

        let Some(handler) = self.registry.get(&job.job_type) else {
            error!(
                job_id = %id,
                job_type = %job.job_type,
                "configuration error: no work handler registered for job type"
            );
            let message = format!("no handler registered for job type {}", job.job_type);
            let job = self
                .jobs
                .update(
                    UpdateJob::new(id)
                        .completed_at(Utc::now())
                        .actual_duration_ms(0)
                        .failure(message.clone()),
                    None,
                )
                .await?;
            self.progress(&job, None, Some(message), 0);
            return Ok(ProcessOutcome::MissingHandler);
        };

        let run_started = Instant::now();
        let job = self
            .jobs
            .update(UpdateJob::new(id).started_at(Utc::now()), None)
            .await?;
        info!(
            job_id = %id,
            job_type = %job.job_type,
            total = job.total_items(),
            "processing job"
        );
        self.progress(&job, None, None, 0);

        let pending = job.pending_items();
        let mut processed = 0;
        for (pos, index) in pending.into_iter().enumerate() {
            if pos > 0 && !self.config.delay_between_items.is_zero() {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!(job_id = %id, "shutdown while throttling; leaving remaining items pending");
                        return Ok(ProcessOutcome::Shutdown);
                    }
                    _ = tokio::time::sleep(self.config.delay_between_items) => {}
                }
            }
            if shutdown.is_cancelled() {
                info!(job_id = %id, "shutdown requested; leaving remaining items pending");
                return Ok(ProcessOutcome::Shutdown);
            }

            let Some(live) = self.jobs.get_by_id(id).await? else {
                warn!(job_id = %id, "job disappeared mid-run");
                return Ok(ProcessOutcome::NotFound);
            };
            if live.status == JobStatus::Cancelled {
                info!(job_id = %id, processed, "job cancelled; stopping");
                return Ok(ProcessOutcome::Cancelled { processed });
            }
            if !live
                .item(index)
                .is_some_and(|item| item.status == JobItemStatus::Pending)
            {
                continue;
            }

            match self.process_item(&live, index, &handler, shutdown).await? {
                ItemOutcome::Done => processed += 1,
                ItemOutcome::Skipped => {}
                ItemOutcome::Interrupted => return Ok(ProcessOutcome::Shutdown),
            }
        }

        let Some(live) = self.jobs.get_by_id(id).await? else {
            warn!(job_id = %id, "job disappeared mid-run");
            return Ok(ProcessOutcome::NotFound);
        };
        if live.status == JobStatus::Cancelled {
            info!(job_id = %id, processed, "job cancelled; not finalising");
            return Ok(ProcessOutcome::Cancelled { processed });
        }

        let duration_ms = run_started.elapsed().as_millis() as u64;
        let job = self
            .jobs
            .update(
                UpdateJob::new(id)
                    .completed_at(Utc::now())
                    .actual_duration_ms(duration_ms),
                None,
            )
            .await?;
        self.progress(&job, None, None, 0);

        info!(
            job_id = %id,
            status = %job.status,
            completed = job.completed_items(),
            failed = job.failed_items(),
            duration_ms,
            "job finished"
        );
        Ok(ProcessOutcome::Finished {
            status: job.status,
            completed: job.completed_items(),
            failed: job.failed_items(),
            duration_ms,
        })
    }

    /// Run one item with bounded retries and write exactly one terminal update.
    async fn process_item(
        &self,
        job: &Job,
        index: u32,
        handler: &Arc<dyn WorkHandler>,
        shutdown: &CancellationToken,
    ) -> Result<ItemOutcome, JobServiceError> {
        let id = job.id;
        let Some(item) = job.item(index) else {
            return Ok(ItemOutcome::Skipped);
        };
        let max_attempts = self.config.max_retries;

        let mut last: Option<ItemResult> = None;
        let mut attempts = 0;
        for attempt in 1..=max_attempts {
            let mut mark = UpdateJobItem::status(index, JobItemStatus::InProgress).with_attempts(attempt);
            if attempt == 1 {
                mark = mark.started_at(Utc::now());
            }
            let marked = match self.jobs.update(UpdateJob::new(id).item(mark), None).await {
                Ok(job) => job,
                Err(JobServiceError::Validation(e)) => {
                    debug!(job_id = %id, item_index = index, error = %e, "item no longer runnable; skipping");
                    return Ok(ItemOutcome::Skipped);
                }
                Err(e) => return Err(e),
            };
            self.progress(&marked, Some((index, JobItemStatus::InProgress)), None, attempt);

            let ctx = WorkContext {
                job_id: id,
                owner_id: job.owner_id,
                job_type: job.job_type.clone(),
                item_index: index,
                attempt,
                job_input: job.input.clone(),
                item_input: item.data.clone(),
            };
            let result = invoke(handler.clone(), ctx).await;
            attempts = attempt;

            let succeeded = result.is_success();
            if let ItemResult::Failure { error } = &result {
                warn!(
                    job_id = %id,
                    item_index = index,
                    attempt,
                    max_attempts,
                    error = %error,
                    "item attempt failed"
                );
            }
            last = Some(result);
            if succeeded {
                break;
            }

            if attempt < max_attempts && !self.config.retry_delay.is_zero() {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!(job_id = %id, item_index = index, "shutdown during retry delay; returning item to pending");
                        let reset = UpdateJobItem::status(index, JobItemStatus::Pending);
                        match self.jobs.update(UpdateJob::new(id).item(reset), None).await {
                            Ok(_) | Err(JobServiceError::Validation(_)) => {}
                            Err(e) => return Err(e),
                        }
                        return Ok(ItemOutcome::Interrupted);
                    }
                    _ = tokio::time::sleep(self.config.retry_delay) => {}
                }
            }
        }

        let (status, message, output) = match last.unwrap_or_else(|| ItemResult::failure(RETRIES_EXHAUSTED)) {
            ItemResult::Success { output } => (JobItemStatus::Success, None, output),
            ItemResult::Failure { error } => (JobItemStatus::Failed, Some(error), None),
        };

        let mut done = UpdateJobItem::status(index, status)
            .with_output(output)
            .with_attempts(attempts)
            .completed_at(Utc::now());
        if let Some(message) = &message {
            done = done.with_message(message.clone());
        }

        let job = match self.jobs.update(UpdateJob::new(id).item(done), None).await {
            Ok(job) => job,
            Err(JobServiceError::Validation(e)) => {
                warn!(job_id = %id, item_index = index, error = %e, "item changed while running; result discarded");
                return Ok(ItemOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };

        debug!(job_id = %id, item_index = index, status = %status, attempts, "item finished");
        self.progress(&job, Some((index, status)), message, attempts);
        Ok(ItemOutcome::Done)
    }

    fn progress(
        &self,
        job: &Job,
        item: Option<(u32, JobItemStatus)>,
        message: Option<String>,
        attempt: u32,
    ) {
        self.jobs.events().publish(JobEvent::Progress(JobProgress {
            job_id: job.id,
            item_index: item.map(|(i, _)| i),
            item_status: item.map(|(_, s)| s),
            message,
            attempt,
            completed: job.completed_items(),
            failed: job.failed_items(),
            total: job.total_items(),
            job_status: job.status,
            occurred_at: Utc::now(),
        }));
    }
}

/// Call the handler on its own task so a panic becomes a failed attempt.
async fn invoke(handler: Arc<dyn WorkHandler>, ctx: WorkContext) -> ItemResult {
    let task = tokio::spawn(async move { handler.process_item(&ctx).await });
    match task.await {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => ItemResult::failure(format!("{err:#}")),
        Err(join) if join.is_panic() => ItemResult::failure(panic_message(join.into_panic())),
        Err(join) => ItemResult::failure(format!("handler task aborted: {join}")),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned());
    match detail {
        Some(d) => format!("handler panicked: {d}"),
        None => "handler panicked".to_string(),
    }
}
