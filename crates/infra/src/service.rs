//! Job intake, mutation and status derivation.
//!
//! Every read overlays the resolved status on whatever the store returned, and
//! every mutation is followed by the matching events and audit records.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info};

use forgejobs_core::{JobId, PrincipalId};
use forgejobs_jobs::{AddJob, Job, JobEvent, SearchJobs, UpdateJob, ValidationErrors};

use crate::audit::{AuditAction, AuditRecord, AuditSink};
use crate::config::JobServiceConfig;
use crate::sink::JobEventSink;
use crate::store::{JobStore, JobStoreError};

const ENTITY_JOB: &str = "job";
const ENTITY_ITEM: &str = "job_item";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// Synchronous-facing job API shared by HTTP handlers and the worker.
#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn JobStore>,
    events: Arc<dyn JobEventSink>,
    audit: Arc<dyn AuditSink>,
    config: JobServiceConfig,
    // Serialises read-modify-write cycles within this process, so a cancel
    // cannot be overwritten by a concurrent worker update.
    write_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for JobService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        events: Arc<dyn JobEventSink>,
        audit: Arc<dyn AuditSink>,
        config: JobServiceConfig,
    ) -> Self {
        Self {
            store,
            events,
            audit,
            config,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn events(&self) -> &Arc<dyn JobEventSink> {
        &self.events
    }

    /// Validate and create a job. Nothing is stored or emitted on failure.
    pub async fn add(&self, request: AddJob) -> Result<Job, JobServiceError> {
        let job_type = request.validate(self.config.max_items)?;
        let per_item_ms = self.config.per_item_estimate.as_millis() as u64;
        let job = Job::create(JobId::new(), job_type, request, per_item_ms, Utc::now());

        self.store.add(&job).await?;

        self.events.publish(JobEvent::Created {
            job_id: job.id,
            owner_id: job.owner_id,
            job_type: job.job_type.to_string(),
            estimated_duration_ms: job.estimated_duration_ms,
            total_items: job.total_items(),
            occurred_at: job.created_at,
        });
        self.audit.record(
            AuditRecord::new(Some(job.owner_id), AuditAction::JobCreated, ENTITY_JOB, job.id.to_string())
                .with_payload(json!({
                    "job_type": job.job_type.as_str(),
                    "total_items": job.total_items(),
                    "estimated_duration_ms": job.estimated_duration_ms,
                })),
        );

        info!(job_id = %job.id, job_type = %job.job_type, items = job.total_items(), "job created");
        Ok(job)
    }

    pub async fn get_by_id(&self, id: JobId) -> Result<Option<Job>, JobServiceError> {
        let job = self.store.get_by_id(id).await?;
        Ok(job.map(|mut j| {
            j.refresh_status();
            j
        }))
    }

    pub async fn search(&self, filter: SearchJobs) -> Result<(Vec<Job>, u64), JobServiceError> {
        let filter = filter.normalized();
        let (mut jobs, total) = self.store.search(&filter).await?;
        for job in &mut jobs {
            job.refresh_status();
        }
        Ok((jobs, total))
    }

    /// Apply a partial update. `actor` is `None` for the background worker.
    pub async fn update(
        &self,
        update: UpdateJob,
        actor: Option<PrincipalId>,
    ) -> Result<Job, JobServiceError> {
        let _guard = self.write_lock.lock().await;

        let id = update.id;
        let mut job = self
            .store
            .get_by_id(id)
            .await?
            .ok_or(JobServiceError::NotFound(id))?;

        let applied = job.apply_update(update)?;
        self.store.update(&job).await?;

        let now = Utc::now();
        for index in &applied.started {
            self.events.publish(JobEvent::ItemStarted {
                job_id: id,
                item_index: *index,
                occurred_at: now,
            });
            self.audit.record(AuditRecord::new(
                actor,
                AuditAction::ItemStarted,
                ENTITY_ITEM,
                format!("{id}/{index}"),
            ));
        }

        for item in &applied.finished {
            self.events.publish(JobEvent::ItemCompleted {
                job_id: id,
                item_index: item.index,
                status: item.status,
                message: item.message.clone(),
                occurred_at: now,
            });
            let mut record = AuditRecord::new(
                actor,
                AuditAction::ItemCompleted,
                ENTITY_ITEM,
                format!("{}/{}", id, item.index),
            )
            .with_payload(json!({ "status": item.status }));
            if let Some(message) = &item.message {
                record = record.with_error(message.clone());
            }
            self.audit.record(record);
        }

        if applied.just_finished() {
            self.events.publish(JobEvent::Completed {
                job_id: id,
                status: applied.status,
                completed_items: job.completed_items(),
                failed_items: job.failed_items(),
                actual_duration_ms: job.actual_duration_ms,
                occurred_at: now,
            });
            self.audit.record(
                AuditRecord::new(actor, AuditAction::JobCompleted, ENTITY_JOB, id.to_string())
                    .with_payload(json!({
                        "status": applied.status,
                        "completed_items": job.completed_items(),
                        "failed_items": job.failed_items(),
                    })),
            );
            info!(job_id = %id, status = %applied.status, "job completed");
        }

        Ok(job)
    }

    /// Cancel every unfinished item. `Ok(false)` if the job does not exist.
    pub async fn cancel(
        &self,
        id: JobId,
        actor: Option<PrincipalId>,
    ) -> Result<bool, JobServiceError> {
        let _guard = self.write_lock.lock().await;

        let Some(mut job) = self.store.get_by_id(id).await? else {
            debug!(job_id = %id, "cancel requested for unknown job");
            return Ok(false);
        };

        let changed = job.cancel(Utc::now());
        if changed.is_empty() {
            debug!(job_id = %id, "cancel: nothing left to cancel");
            return Ok(true);
        }
        self.store.update(&job).await?;

        self.events.publish(JobEvent::Canceled {
            job_id: id,
            canceled_items: changed.len(),
            occurred_at: Utc::now(),
        });
        self.audit.record(
            AuditRecord::new(actor, AuditAction::JobCanceled, ENTITY_JOB, id.to_string())
                .with_payload(json!({ "canceled_items": changed })),
        );

        info!(job_id = %id, canceled = changed.len(), "job cancelled");
        Ok(true)
    }

    /// Reset failed and canceled items to pending. `Ok(false)` if the job does
    /// not exist. Does not enqueue.
    pub async fn retry(
        &self,
        id: JobId,
        actor: Option<PrincipalId>,
    ) -> Result<bool, JobServiceError> {
        let _guard = self.write_lock.lock().await;

        let Some(mut job) = self.store.get_by_id(id).await? else {
            debug!(job_id = %id, "retry requested for unknown job");
            return Ok(false);
        };

        let Some(changed) = job.retry() else {
            debug!(job_id = %id, "retry: nothing to reset");
            return Ok(true);
        };
        self.store.update(&job).await?;

        self.events.publish(JobEvent::Retried {
            job_id: id,
            reset_items: changed.len(),
            occurred_at: Utc::now(),
        });
        self.audit.record(
            AuditRecord::new(actor, AuditAction::JobRetried, ENTITY_JOB, id.to_string())
                .with_payload(json!({ "reset_items": changed })),
        );

        info!(job_id = %id, reset = changed.len(), "job retried");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditLog;
    use crate::sink::RecordingEventSink;
    use crate::store::InMemoryJobStore;
    use forgejobs_jobs::{JobItemStatus, JobStatus, NewJobItem, UpdateJobItem};
    use std::time::Duration;

    struct Fixture {
        service: JobService,
        store: Arc<InMemoryJobStore>,
        events: Arc<RecordingEventSink>,
        audit: Arc<InMemoryAuditLog>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryJobStore::new());
        let events = Arc::new(RecordingEventSink::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let config = JobServiceConfig {
            per_item_estimate: Duration::from_millis(500),
            max_items: 10,
        };
        let service = JobService::new(store.clone(), events.clone(), audit.clone(), config);
        Fixture {
            service,
            store,
            events,
            audit,
        }
    }

    fn request(items: usize) -> AddJob {
        AddJob {
            owner_id: PrincipalId::new(),
            job_type: "echo".to_string(),
            input: Some("{}".to_string()),
            items: (0..items).map(|i| NewJobItem::new(format!("in-{i}"))).collect(),
        }
    }

    #[tokio::test]
    async fn add_persists_emits_and_audits() {
        let f = fixture();
        let job = f.service.add(request(4)).await.unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.estimated_duration_ms, 2_000);
        assert!(f.store.get_by_id(job.id).await.unwrap().is_some());
        assert!(matches!(
            f.events.events_for(job.id).as_slice(),
            [JobEvent::Created { total_items: 4, .. }]
        ));
        assert_eq!(f.audit.actions(), vec![AuditAction::JobCreated]);
    }

    #[tokio::test]
    async fn invalid_add_has_no_side_effects() {
        let f = fixture();
        let mut bad = request(1);
        bad.job_type = " ".to_string();

        let err = f.service.add(bad).await.unwrap_err();

        assert!(matches!(err, JobServiceError::Validation(_)));
        assert!(f.store.is_empty());
        assert!(f.events.events().is_empty());
        assert!(f.audit.records().is_empty());
    }

    #[tokio::test]
    async fn reads_overlay_derived_status_on_stale_cache() {
        let f = fixture();
        let mut job = f.service.add(request(1)).await.unwrap();

        // Simulate a stale persisted status.
        job.items[0].status = JobItemStatus::Success;
        job.status = JobStatus::Pending;
        f.store.update(&job).await.unwrap();

        let read = f.service.get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(read.status, JobStatus::Completed);

        let (page, total) = f.service.search(SearchJobs::default()).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn update_emits_item_and_completion_events_once() {
        let f = fixture();
        let job = f.service.add(request(2)).await.unwrap();
        let id = job.id;

        f.service
            .update(
                UpdateJob::new(id).item(UpdateJobItem::status(0, JobItemStatus::InProgress)),
                None,
            )
            .await
            .unwrap();
        f.service
            .update(
                UpdateJob::new(id)
                    .item(UpdateJobItem::status(0, JobItemStatus::Success))
                    .item(UpdateJobItem::status(1, JobItemStatus::Failed).with_message("bad")),
                None,
            )
            .await
            .unwrap();
        let job = f
            .service
            .update(UpdateJob::new(id).completed_at(Utc::now()), None)
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::PartialSuccess);
        let completed = f
            .events
            .events_for(id)
            .into_iter()
            .filter(|e| matches!(e, JobEvent::Completed { .. }))
            .count();
        // The finished family was reached by the item update; finalising does not emit again.
        assert_eq!(completed, 1);
        assert_eq!(
            f.audit.actions(),
            vec![
                AuditAction::JobCreated,
                AuditAction::ItemStarted,
                AuditAction::ItemCompleted,
                AuditAction::ItemCompleted,
                AuditAction::JobCompleted,
            ]
        );
    }

    #[tokio::test]
    async fn update_of_unknown_job_is_not_found() {
        let f = fixture();
        let id = JobId::new();
        let err = f.service.update(UpdateJob::new(id), None).await.unwrap_err();
        assert_eq!(err, JobServiceError::NotFound(id));
    }

    #[tokio::test]
    async fn rejected_update_leaves_store_and_events_untouched() {
        let f = fixture();
        let job = f.service.add(request(1)).await.unwrap();
        let events_before = f.events.events().len();

        let err = f
            .service
            .update(
                UpdateJob::new(job.id).item(UpdateJobItem::status(9, JobItemStatus::Success)),
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, JobServiceError::Validation(_)));
        assert_eq!(f.store.get_by_id(job.id).await.unwrap(), Some(job));
        assert_eq!(f.events.events().len(), events_before);
    }

    #[tokio::test]
    async fn cancel_and_retry_report_unknown_jobs() {
        let f = fixture();
        assert!(!f.service.cancel(JobId::new(), None).await.unwrap());
        assert!(!f.service.retry(JobId::new(), None).await.unwrap());
    }

    #[tokio::test]
    async fn cancel_twice_matches_cancel_once() {
        let f = fixture();
        let job = f.service.add(request(3)).await.unwrap();
        let actor = Some(job.owner_id);

        assert!(f.service.cancel(job.id, actor).await.unwrap());
        let once = f.service.get_by_id(job.id).await.unwrap().unwrap();
        assert!(f.service.cancel(job.id, actor).await.unwrap());
        let twice = f.service.get_by_id(job.id).await.unwrap().unwrap();

        assert_eq!(once.items, twice.items);
        assert_eq!(twice.status, JobStatus::Cancelled);
        let canceled_events = f
            .events
            .events_for(job.id)
            .into_iter()
            .filter(|e| matches!(e, JobEvent::Canceled { .. }))
            .count();
        assert_eq!(canceled_events, 1);
    }

    #[tokio::test]
    async fn retry_resets_canceled_items() {
        let f = fixture();
        let job = f.service.add(request(2)).await.unwrap();
        f.service.cancel(job.id, None).await.unwrap();

        assert!(f.service.retry(job.id, None).await.unwrap());

        let job = f.service.get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.pending_items(), vec![0, 1]);
        assert!(matches!(
            f.events.events_for(job.id).last(),
            Some(JobEvent::Retried { reset_items: 2, .. })
        ));
    }
}
