use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgejobs_core::{JobId, PrincipalId};
use forgejobs_jobs::{AddJob, Job, NewJobItem, SearchJobs, UpdateJob, UpdateJobItem};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub job_type: String,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub items: Vec<NewJobItem>,
}

impl CreateJobRequest {
    pub fn into_add_job(self, owner_id: PrincipalId) -> AddJob {
        AddJob {
            owner_id,
            job_type: self.job_type,
            input: self.input,
            items: self.items,
        }
    }
}

/// Body of `PATCH /jobs/:id`; the id comes from the path.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateJobRequest {
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actual_duration_ms: Option<u64>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub failure: Option<String>,
    #[serde(default)]
    pub items: Vec<UpdateJobItem>,
}

impl UpdateJobRequest {
    pub fn into_update(self, id: JobId) -> UpdateJob {
        UpdateJob {
            id,
            started_at: self.started_at,
            completed_at: self.completed_at,
            actual_duration_ms: self.actual_duration_ms,
            result: self.result,
            failure: self.failure,
            items: self.items,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchJobsQuery {
    pub job_type: Option<String>,
    pub owner_id: Option<PrincipalId>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
}

impl SearchJobsQuery {
    pub fn into_filter(self) -> SearchJobs {
        SearchJobs {
            job_type: self.job_type,
            owner_id: self.owner_id,
            skip: self.skip.unwrap_or(0),
            take: self.take.unwrap_or(SearchJobs::DEFAULT_TAKE),
        }
        .normalized()
    }
}

// -------------------------
// Response DTOs
// -------------------------

/// A job plus the counters readers usually want alongside it.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    #[serde(flatten)]
    pub job: Job,
    pub total_items: usize,
    pub completed_items: usize,
    pub failed_items: usize,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            total_items: job.total_items(),
            completed_items: job.completed_items(),
            failed_items: job.failed_items(),
            job,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchJobsResponse {
    pub jobs: Vec<JobResponse>,
    pub total: u64,
    pub skip: u64,
    pub take: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_query_defaults_and_clamps() {
        let filter = SearchJobsQuery::default().into_filter();
        assert_eq!(filter.skip, 0);
        assert_eq!(filter.take, SearchJobs::DEFAULT_TAKE);

        let filter = SearchJobsQuery {
            take: Some(10_000),
            job_type: Some("  ".to_string()),
            ..Default::default()
        }
        .into_filter();
        assert_eq!(filter.take, SearchJobs::MAX_TAKE);
        assert_eq!(filter.job_type, None);
    }

    #[test]
    fn job_response_flattens_job_fields() {
        let request = AddJob {
            owner_id: PrincipalId::new(),
            job_type: "echo".to_string(),
            input: None,
            items: vec![NewJobItem::new("a"), NewJobItem::new("b")],
        };
        let job_type = request.validate(10).unwrap();
        let job = Job::create(JobId::new(), job_type, request, 1_000, Utc::now());

        let value = serde_json::to_value(JobResponse::from(job)).unwrap();
        assert_eq!(value["job_type"], "echo");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["total_items"], 2);
        assert_eq!(value["completed_items"], 0);
    }
}
