use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use forgejobs_core::JobId;
use forgejobs_jobs::{Job, SearchJobs};

use super::{JobStore, JobStoreError};

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs.
    pub fn len(&self) -> usize {
        self.jobs.read().map(|j| j.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> JobStoreError {
    JobStoreError::Storage("job store lock poisoned".to_string())
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn add(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        Ok(jobs.get(&id).cloned())
    }

    async fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        match jobs.get_mut(&job.id) {
            Some(slot) => {
                *slot = job.clone();
                Ok(())
            }
            None => Err(JobStoreError::NotFound(job.id)),
        }
    }

    async fn search(&self, filter: &SearchJobs) -> Result<(Vec<Job>, u64), JobStoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let mut matches: Vec<&Job> = jobs
            .values()
            .filter(|j| {
                filter
                    .job_type
                    .as_deref()
                    .is_none_or(|t| j.job_type.as_str() == t)
                    && filter.owner_id.is_none_or(|o| j.owner_id == o)
            })
            .collect();

        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matches.len() as u64;
        let page = matches
            .into_iter()
            .skip(usize::try_from(filter.skip).unwrap_or(usize::MAX))
            .take(filter.take as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use forgejobs_core::PrincipalId;
    use forgejobs_jobs::{AddJob, JobType, NewJobItem};

    fn job(owner: PrincipalId, job_type: &str, age_secs: i64) -> Job {
        let request = AddJob {
            owner_id: owner,
            job_type: job_type.to_string(),
            input: None,
            items: vec![NewJobItem::new("x")],
        };
        let t = JobType::parse(job_type).unwrap();
        Job::create(JobId::new(), t, request, 1, Utc::now() - Duration::seconds(age_secs))
    }

    #[tokio::test]
    async fn add_then_get_round_trips() {
        let store = InMemoryJobStore::new();
        let j = job(PrincipalId::new(), "echo", 0);

        store.add(&j).await.unwrap();

        assert_eq!(store.get_by_id(j.id).await.unwrap(), Some(j.clone()));
        assert_eq!(store.add(&j).await, Err(JobStoreError::AlreadyExists(j.id)));
    }

    #[tokio::test]
    async fn update_of_unknown_job_fails() {
        let store = InMemoryJobStore::new();
        let j = job(PrincipalId::new(), "echo", 0);
        assert_eq!(store.update(&j).await, Err(JobStoreError::NotFound(j.id)));
    }

    #[tokio::test]
    async fn search_filters_pages_and_orders_newest_first() {
        let store = InMemoryJobStore::new();
        let alice = PrincipalId::new();
        let oldest = job(alice, "echo", 30);
        let middle = job(alice, "echo", 20);
        let newest = job(PrincipalId::new(), "echo", 10);
        let other = job(alice, "resize", 5);
        for j in [&oldest, &middle, &newest, &other] {
            store.add(j).await.unwrap();
        }

        let filter = SearchJobs {
            job_type: Some("echo".to_string()),
            take: 2,
            ..Default::default()
        };
        let (page, total) = store.search(&filter).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.iter().map(|j| j.id).collect::<Vec<_>>(), vec![newest.id, middle.id]);

        let filter = SearchJobs {
            owner_id: Some(alice),
            skip: 1,
            ..Default::default()
        };
        let (page, total) = store.search(&filter).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.iter().map(|j| j.id).collect::<Vec<_>>(), vec![middle.id, oldest.id]);
    }
}
