//! Work handlers and the typed registry that resolves them by job type.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use forgejobs_core::{JobId, PrincipalId};

use crate::job::JobType;

/// Everything a handler needs to process one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkContext {
    pub job_id: JobId,
    pub owner_id: PrincipalId,
    pub job_type: JobType,
    pub item_index: u32,
    /// 1-based attempt number for this run.
    pub attempt: u32,
    pub job_input: Option<String>,
    pub item_input: String,
}

/// Outcome of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemResult {
    Success { output: Option<String> },
    Failure { error: String },
}

impl ItemResult {
    pub fn success() -> Self {
        Self::Success { output: None }
    }

    pub fn success_with(output: impl Into<String>) -> Self {
        Self::Success {
            output: Some(output.into()),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Performs the effect of one item of a given job type.
///
/// Returning `Err` (or panicking) counts as a failed attempt carrying the
/// error message; the worker applies its retry policy either way.
#[async_trait]
pub trait WorkHandler: Send + Sync {
    async fn process_item(&self, ctx: &WorkContext) -> anyhow::Result<ItemResult>;
}

#[async_trait]
impl<H> WorkHandler for Arc<H>
where
    H: WorkHandler + ?Sized,
{
    async fn process_item(&self, ctx: &WorkContext) -> anyhow::Result<ItemResult> {
        (**self).process_item(ctx).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("a handler is already registered for job type `{0}`")]
    DuplicateHandler(String),
    #[error("invalid job type `{0}`")]
    InvalidJobType(String),
}

/// Immutable job type → handler map, assembled once at startup.
#[derive(Clone, Default)]
pub struct WorkHandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn WorkHandler>>,
}

impl std::fmt::Debug for WorkHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkHandlerRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

impl WorkHandlerRegistry {
    pub fn builder() -> WorkHandlerRegistryBuilder {
        WorkHandlerRegistryBuilder::default()
    }

    pub fn get(&self, job_type: &JobType) -> Option<Arc<dyn WorkHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &JobType) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(JobType::as_str).collect();
        types.sort_unstable();
        types
    }
}

#[derive(Default)]
pub struct WorkHandlerRegistryBuilder {
    handlers: HashMap<JobType, Arc<dyn WorkHandler>>,
}

impl std::fmt::Debug for WorkHandlerRegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkHandlerRegistryBuilder")
            .field("registered", &self.handlers.len())
            .finish()
    }
}

impl WorkHandlerRegistryBuilder {
    pub fn register<H>(mut self, job_type: &str, handler: H) -> Result<Self, RegistryError>
    where
        H: WorkHandler + 'static,
    {
        let key = JobType::parse(job_type)
            .map_err(|_| RegistryError::InvalidJobType(job_type.to_string()))?;
        if self.handlers.contains_key(&key) {
            return Err(RegistryError::DuplicateHandler(key.to_string()));
        }
        self.handlers.insert(key, Arc::new(handler));
        Ok(self)
    }

    pub fn build(self) -> WorkHandlerRegistry {
        WorkHandlerRegistry {
            handlers: self.handlers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(ItemResult);

    #[async_trait]
    impl WorkHandler for Fixed {
        async fn process_item(&self, _ctx: &WorkContext) -> anyhow::Result<ItemResult> {
            Ok(self.0.clone())
        }
    }

    fn ctx(job_type: &JobType) -> WorkContext {
        WorkContext {
            job_id: JobId::new(),
            owner_id: PrincipalId::new(),
            job_type: job_type.clone(),
            item_index: 0,
            attempt: 1,
            job_input: None,
            item_input: "x".to_string(),
        }
    }

    #[tokio::test]
    async fn resolves_registered_handler() {
        let registry = WorkHandlerRegistry::builder()
            .register("echo", Fixed(ItemResult::success_with("hi")))
            .unwrap()
            .register("fail", Fixed(ItemResult::failure("no")))
            .unwrap()
            .build();

        let echo = JobType::parse("echo").unwrap();
        let handler = registry.get(&echo).unwrap();
        let result = handler.process_item(&ctx(&echo)).await.unwrap();

        assert_eq!(result, ItemResult::success_with("hi"));
        assert_eq!(registry.job_types(), vec!["echo", "fail"]);
        assert!(registry.get(&JobType::parse("other").unwrap()).is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let err = WorkHandlerRegistry::builder()
            .register("echo", Fixed(ItemResult::success()))
            .unwrap()
            .register(" echo ", Fixed(ItemResult::success()))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateHandler("echo".to_string()));
    }

    #[test]
    fn blank_job_type_is_rejected() {
        let err = WorkHandlerRegistry::builder()
            .register("  ", Fixed(ItemResult::success()))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidJobType(_)));
    }
}
