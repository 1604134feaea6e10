//! The job aggregate and its item list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgejobs_core::{JobId, PrincipalId};

use crate::request::{AddJob, UpdateJob};
use crate::status::{JobItemStatus, JobStatus, RunState, resolve_status};
use crate::validation::{ValidationError, ValidationErrors};

/// Maximum length of a job type key.
pub const MAX_JOB_TYPE_LEN: usize = 100;

/// Job type key used to look up a work handler (e.g. `"image.generate"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobType(String);

impl JobType {
    /// Trim and validate a raw type key.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::new("job_type", "must not be empty"));
        }
        if trimmed.chars().count() > MAX_JOB_TYPE_LEN {
            return Err(ValidationError::new(
                "job_type",
                format!("must be at most {MAX_JOB_TYPE_LEN} characters"),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for JobType {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<JobType> for String {
    fn from(value: JobType) -> Self {
        value.0
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One unit of work inside a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobItem {
    pub index: u32,
    pub data: String,
    pub status: JobItemStatus,
    pub message: Option<String>,
    pub output: Option<String>,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobItem {
    pub fn new(index: u32, data: impl Into<String>) -> Self {
        Self {
            index,
            data: data.into(),
            status: JobItemStatus::Pending,
            message: None,
            output: None,
            attempts: 0,
            started_at: None,
            completed_at: None,
        }
    }
}

/// A bulk job.
///
/// `status` is a cache of [`Job::resolved_status`], refreshed by every
/// mutation in this module; readers should call [`Job::refresh_status`] on
/// anything loaded from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub owner_id: PrincipalId,
    pub job_type: JobType,
    pub input: Option<String>,
    pub items: Vec<JobItem>,
    pub status: JobStatus,
    pub estimated_duration_ms: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub actual_duration_ms: Option<u64>,
    pub result: Option<String>,
    /// Why the run was closed out without attempting its items.
    #[serde(default)]
    pub failure: Option<String>,
}

/// An item whose status changed during [`Job::apply_update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemTransition {
    pub index: u32,
    pub status: JobItemStatus,
    pub message: Option<String>,
}

/// What an applied update changed, so callers can emit the matching events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedUpdate {
    /// Items that moved into `InProgress`.
    pub started: Vec<u32>,
    /// Items that reached a terminal status.
    pub finished: Vec<ItemTransition>,
    pub previous_status: JobStatus,
    pub status: JobStatus,
}

impl AppliedUpdate {
    /// True when this update moved the job into the finished family.
    pub fn just_finished(&self) -> bool {
        self.status.is_finished() && !self.previous_status.is_finished()
    }
}

impl Job {
    /// Build a new job from a validated request. Every item starts `Pending`.
    pub fn create(
        id: JobId,
        job_type: JobType,
        request: AddJob,
        per_item_estimate_ms: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let items: Vec<JobItem> = request
            .items
            .into_iter()
            .enumerate()
            .map(|(i, item)| JobItem::new(i as u32, item.data))
            .collect();
        let estimated_duration_ms = per_item_estimate_ms.saturating_mul(items.len() as u64);

        let mut job = Self {
            id,
            owner_id: request.owner_id,
            job_type,
            input: request.input,
            items,
            status: JobStatus::Pending,
            estimated_duration_ms,
            created_at: now,
            started_at: None,
            completed_at: None,
            actual_duration_ms: None,
            result: None,
            failure: None,
        };
        job.refresh_status();
        job
    }

    pub fn total_items(&self) -> usize {
        self.items.len()
    }

    pub fn completed_items(&self) -> usize {
        self.count(JobItemStatus::Success)
    }

    pub fn failed_items(&self) -> usize {
        self.count(JobItemStatus::Failed)
    }

    fn count(&self, status: JobItemStatus) -> usize {
        self.items.iter().filter(|i| i.status == status).count()
    }

    pub fn item(&self, index: u32) -> Option<&JobItem> {
        self.items.get(index as usize)
    }

    /// Indices of items still waiting to run, in order.
    pub fn pending_items(&self) -> Vec<u32> {
        self.items
            .iter()
            .filter(|i| i.status == JobItemStatus::Pending)
            .map(|i| i.index)
            .collect()
    }

    /// Run state recorded by the worker's markers.
    pub fn run_state(&self) -> RunState {
        match (self.completed_at, &self.failure, self.started_at) {
            (Some(_), Some(_), _) => RunState::Aborted,
            (Some(_), None, _) => RunState::Finalised,
            (None, _, Some(_)) => RunState::Running,
            (None, _, None) => RunState::Idle,
        }
    }

    /// Status computed from item state and run markers.
    pub fn resolved_status(&self) -> JobStatus {
        resolve_status(self.items.iter().map(|i| i.status), self.run_state())
    }

    /// Overwrite the cached status with the resolved one.
    pub fn refresh_status(&mut self) -> JobStatus {
        self.status = self.resolved_status();
        self.status
    }

    /// Check an update against current state without mutating anything.
    pub fn validate_update(&self, update: &UpdateJob) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let mut seen = std::collections::HashSet::new();

        for (pos, change) in update.items.iter().enumerate() {
            let field = format!("items[{pos}].index");
            if !seen.insert(change.index) {
                errors.push(field, format!("item {} appears more than once", change.index));
                continue;
            }
            match self.item(change.index) {
                None => errors.push(field, format!("item {} does not exist", change.index)),
                Some(item) if item.status.is_terminal() => errors.push(
                    field,
                    format!("item {} is already {} and cannot change", item.index, item.status),
                ),
                Some(_) => {}
            }
        }

        errors.into_result()
    }

    /// Validate, then apply a partial update.
    ///
    /// Job-level timestamps, duration and failure are set-once: a value already
    /// present is kept.
    pub fn apply_update(&mut self, update: UpdateJob) -> Result<AppliedUpdate, ValidationErrors> {
        self.validate_update(&update)?;

        let previous_status = self.refresh_status();
        let mut started = Vec::new();
        let mut finished = Vec::new();

        for change in update.items {
            let item = &mut self.items[change.index as usize];
            let before = item.status;

            if let Some(status) = change.status {
                item.status = status;
            }
            if let Some(message) = change.message {
                item.message = Some(message);
            }
            if let Some(output) = change.output {
                item.output = Some(output);
            }
            if let Some(attempts) = change.attempts {
                item.attempts = attempts;
            }
            if let Some(at) = change.started_at {
                item.started_at = Some(at);
            }
            if let Some(at) = change.completed_at {
                item.completed_at = Some(at);
            }

            if item.status != before {
                if item.status == JobItemStatus::InProgress {
                    started.push(item.index);
                } else if item.status.is_terminal() {
                    finished.push(ItemTransition {
                        index: item.index,
                        status: item.status,
                        message: item.message.clone(),
                    });
                }
            }
        }

        if self.started_at.is_none() {
            self.started_at = update.started_at;
        }
        if self.completed_at.is_none() {
            self.completed_at = update.completed_at;
        }
        if self.actual_duration_ms.is_none() {
            self.actual_duration_ms = update.actual_duration_ms;
        }
        if self.failure.is_none() {
            self.failure = update.failure;
        }
        if update.result.is_some() {
            self.result = update.result;
        }

        let status = self.refresh_status();
        Ok(AppliedUpdate {
            started,
            finished,
            previous_status,
            status,
        })
    }

    /// Cancel every `Pending`/`InProgress` item. Returns the indices changed.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Vec<u32> {
        let mut changed = Vec::new();
        for item in &mut self.items {
            if matches!(item.status, JobItemStatus::Pending | JobItemStatus::InProgress) {
                item.status = JobItemStatus::Canceled;
                item.message = None;
                item.completed_at = Some(now);
                changed.push(item.index);
            }
        }
        self.refresh_status();
        changed
    }

    /// Reset every `Failed`/`Canceled` item to `Pending`. Returns the indices
    /// reset, or `None` when the job was left untouched.
    ///
    /// The run markers are cleared whenever the job can run again: something
    /// was reset, the run was aborted, or a finalised run left items pending.
    pub fn retry(&mut self) -> Option<Vec<u32>> {
        let mut changed = Vec::new();
        for item in &mut self.items {
            if matches!(item.status, JobItemStatus::Failed | JobItemStatus::Canceled) {
                item.status = JobItemStatus::Pending;
                item.message = None;
                item.output = None;
                item.attempts = 0;
                item.started_at = None;
                item.completed_at = None;
                changed.push(item.index);
            }
        }

        let stranded = self.completed_at.is_some()
            && (self.failure.is_some()
                || self.items.iter().any(|i| i.status == JobItemStatus::Pending));
        if changed.is_empty() && !stranded {
            return None;
        }

        self.started_at = None;
        self.completed_at = None;
        self.actual_duration_ms = None;
        self.failure = None;
        self.refresh_status();
        Some(changed)
    }
}
