//! Bulk job domain.
//!
//! Pure types and rules only: the job/item model, status derivation,
//! request validation, lifecycle events, and the work handler seam. Storage,
//! notification transport and the background worker live in `forgejobs-infra`.

pub mod events;
pub mod handler;
pub mod job;
pub mod request;
pub mod status;
pub mod validation;

pub use events::{JobEvent, JobProgress};
pub use handler::{
    ItemResult, RegistryError, WorkContext, WorkHandler, WorkHandlerRegistry,
    WorkHandlerRegistryBuilder,
};
pub use job::{AppliedUpdate, ItemTransition, Job, JobItem, JobType, MAX_JOB_TYPE_LEN};
pub use request::{AddJob, NewJobItem, SearchJobs, UpdateJob, UpdateJobItem, MAX_ITEM_DATA_LEN};
pub use status::{JobItemStatus, JobStatus, RunState, derive_status, resolve_status};
pub use validation::{ValidationError, ValidationErrors};
