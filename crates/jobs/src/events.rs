//! Lifecycle notifications for jobs.
//!
//! These are one-way facts. Observers receive them wrapped in an
//! `EventEnvelope<JobEvent>` whose topic is the job id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgejobs_core::{JobId, PrincipalId};
use forgejobs_events::{Event, TopicScoped};

use crate::status::{JobItemStatus, JobStatus};

/// Worker progress snapshot: the "job started" notification (no item), one
/// per processing attempt and item outcome, and a final one after the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: JobId,
    pub item_index: Option<u32>,
    pub item_status: Option<JobItemStatus>,
    pub message: Option<String>,
    pub attempt: u32,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    pub job_status: JobStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Created {
        job_id: JobId,
        owner_id: PrincipalId,
        job_type: String,
        estimated_duration_ms: u64,
        total_items: usize,
        occurred_at: DateTime<Utc>,
    },
    Progress(JobProgress),
    ItemStarted {
        job_id: JobId,
        item_index: u32,
        occurred_at: DateTime<Utc>,
    },
    ItemCompleted {
        job_id: JobId,
        item_index: u32,
        status: JobItemStatus,
        message: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    Completed {
        job_id: JobId,
        status: JobStatus,
        completed_items: usize,
        failed_items: usize,
        actual_duration_ms: Option<u64>,
        occurred_at: DateTime<Utc>,
    },
    Canceled {
        job_id: JobId,
        canceled_items: usize,
        occurred_at: DateTime<Utc>,
    },
    Retried {
        job_id: JobId,
        reset_items: usize,
        occurred_at: DateTime<Utc>,
    },
}

impl TopicScoped for JobEvent {
    fn topic(&self) -> JobId {
        self.job_id()
    }
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Created { job_id, .. }
            | JobEvent::ItemStarted { job_id, .. }
            | JobEvent::ItemCompleted { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Canceled { job_id, .. }
            | JobEvent::Retried { job_id, .. } => *job_id,
            JobEvent::Progress(p) => p.job_id,
        }
    }
}

impl Event for JobEvent {
    fn event_type(&self) -> &'static str {
        match self {
            JobEvent::Created { .. } => "job.created",
            JobEvent::Progress(_) => "job.progress",
            JobEvent::ItemStarted { .. } => "job.item.started",
            JobEvent::ItemCompleted { .. } => "job.item.completed",
            JobEvent::Completed { .. } => "job.completed",
            JobEvent::Canceled { .. } => "job.canceled",
            JobEvent::Retried { .. } => "job.retried",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            JobEvent::Created { occurred_at, .. }
            | JobEvent::ItemStarted { occurred_at, .. }
            | JobEvent::ItemCompleted { occurred_at, .. }
            | JobEvent::Completed { occurred_at, .. }
            | JobEvent::Canceled { occurred_at, .. }
            | JobEvent::Retried { occurred_at, .. } => *occurred_at,
            JobEvent::Progress(p) => p.occurred_at,
        }
    }
}
