//! Requests accepted by the job service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgejobs_core::{JobId, PrincipalId};

use crate::job::JobType;
use crate::status::JobItemStatus;
use crate::validation::ValidationErrors;

/// Maximum size of one item's input payload, in characters.
pub const MAX_ITEM_DATA_LEN: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJobItem {
    pub data: String,
}

impl NewJobItem {
    pub fn new(data: impl Into<String>) -> Self {
        Self { data: data.into() }
    }
}

/// Create a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddJob {
    pub owner_id: PrincipalId,
    pub job_type: String,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub items: Vec<NewJobItem>,
}

impl AddJob {
    /// Structural validation. Returns the parsed job type on success.
    pub fn validate(&self, max_items: usize) -> Result<JobType, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let job_type = match JobType::parse(&self.job_type) {
            Ok(t) => Some(t),
            Err(e) => {
                errors.push(e.field, e.message);
                None
            }
        };

        if self.items.len() > max_items {
            errors.push("items", format!("at most {max_items} items per job"));
        }

        for (i, item) in self.items.iter().enumerate() {
            if item.data.trim().is_empty() {
                errors.push(format!("items[{i}].data"), "must not be empty");
            } else if item.data.chars().count() > MAX_ITEM_DATA_LEN {
                errors.push(
                    format!("items[{i}].data"),
                    format!("must be at most {MAX_ITEM_DATA_LEN} characters"),
                );
            }
        }

        errors.into_result()?;
        // Present whenever no errors were collected.
        job_type.ok_or_else(ValidationErrors::new)
    }
}

/// Change to a single item, addressed by index.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateJobItem {
    pub index: u32,
    #[serde(default)]
    pub status: Option<JobItemStatus>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub attempts: Option<u32>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl UpdateJobItem {
    pub fn status(index: u32, status: JobItemStatus) -> Self {
        Self {
            index,
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_output(mut self, output: Option<String>) -> Self {
        self.output = output;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }
}

/// Partial update of a job and any number of its items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateJob {
    pub id: JobId,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actual_duration_ms: Option<u64>,
    #[serde(default)]
    pub result: Option<String>,
    /// Closes the run as failed regardless of item outcomes; only meaningful
    /// together with `completed_at`.
    #[serde(default)]
    pub failure: Option<String>,
    #[serde(default)]
    pub items: Vec<UpdateJobItem>,
}

impl UpdateJob {
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            started_at: None,
            completed_at: None,
            actual_duration_ms: None,
            result: None,
            failure: None,
            items: Vec::new(),
        }
    }

    pub fn item(mut self, item: UpdateJobItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    pub fn actual_duration_ms(mut self, ms: u64) -> Self {
        self.actual_duration_ms = Some(ms);
        self
    }

    pub fn result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    pub fn failure(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }
}

/// Search filter with skip/take paging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchJobs {
    #[serde(default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub owner_id: Option<PrincipalId>,
    #[serde(default)]
    pub skip: u64,
    #[serde(default = "SearchJobs::default_take")]
    pub take: u64,
}

impl Default for SearchJobs {
    fn default() -> Self {
        Self {
            job_type: None,
            owner_id: None,
            skip: 0,
            take: Self::DEFAULT_TAKE,
        }
    }
}

impl SearchJobs {
    pub const DEFAULT_TAKE: u64 = 20;
    pub const MAX_TAKE: u64 = 100;
    /// Largest offset a store can be asked for (a signed 64-bit SQL `OFFSET`).
    pub const MAX_SKIP: u64 = i64::MAX as u64;

    fn default_take() -> u64 {
        Self::DEFAULT_TAKE
    }

    /// Clamp `take` into `1..=MAX_TAKE`, cap `skip` at `MAX_SKIP` and trim the
    /// type filter.
    pub fn normalized(mut self) -> Self {
        self.take = self.take.clamp(1, Self::MAX_TAKE);
        self.skip = self.skip.min(Self::MAX_SKIP);
        self.job_type = self
            .job_type
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(job_type: &str, items: Vec<&str>) -> AddJob {
        AddJob {
            owner_id: PrincipalId::new(),
            job_type: job_type.to_string(),
            input: None,
            items: items.into_iter().map(NewJobItem::new).collect(),
        }
    }

    #[test]
    fn valid_request_yields_trimmed_type() {
        let t = add(" echo ", vec!["a", "b"]).validate(10).unwrap();
        assert_eq!(t.as_str(), "echo");
    }

    #[test]
    fn zero_items_is_valid() {
        assert!(add("echo", vec![]).validate(10).is_ok());
    }

    #[test]
    fn collects_every_problem() {
        let long = "x".repeat(MAX_ITEM_DATA_LEN + 1);
        let err = add("", vec!["ok", " ", &long]).validate(10).unwrap_err();

        let fields: Vec<_> = err.errors().iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["job_type", "items[1].data", "items[2].data"]);
    }

    #[test]
    fn item_count_is_bounded() {
        let err = add("echo", vec!["a", "b", "c"]).validate(2).unwrap_err();
        assert_eq!(err.errors()[0].field, "items");
    }

    #[test]
    fn search_take_is_clamped() {
        let s = SearchJobs {
            take: 10_000,
            job_type: Some("  ".to_string()),
            ..Default::default()
        }
        .normalized();
        assert_eq!(s.take, SearchJobs::MAX_TAKE);
        assert_eq!(s.job_type, None);

        let s = SearchJobs { take: 0, ..Default::default() }.normalized();
        assert_eq!(s.take, 1);
    }

    #[test]
    fn search_skip_is_capped_at_a_signed_offset() {
        let s = SearchJobs { skip: u64::MAX, ..Default::default() }.normalized();
        assert_eq!(s.skip, i64::MAX as u64);
        assert!(i64::try_from(s.skip).is_ok());

        let s = SearchJobs { skip: 40, ..Default::default() }.normalized();
        assert_eq!(s.skip, 40);
    }

    #[test]
    fn update_item_deserializes_with_only_index() {
        let item: UpdateJobItem = serde_json::from_str(r#"{"index": 3}"#).unwrap();
        assert_eq!(item.index, 3);
        assert_eq!(item.status, None);
    }
}
