//! Infrastructure layer: storage, notification and audit adapters, the job
//! service, and the background worker.

pub mod audit;
pub mod config;
pub mod handlers;
pub mod queue;
pub mod service;
pub mod sink;
pub mod store;
pub mod worker;

pub use audit::{AuditAction, AuditRecord, AuditSink, InMemoryAuditLog, TracingAuditSink};
pub use config::{ConfigError, JobServiceConfig, PipelineConfig, ProcessingConfig};
pub use handlers::{ECHO_JOB_TYPE, EchoHandler};
pub use queue::{JobQueue, JobReceiver, QueueClosed, job_queue};
pub use service::{JobService, JobServiceError};
pub use sink::{BusJobEventSink, DEFAULT_TRACKED_JOBS, JobEventSink, RecordingEventSink};
pub use store::{InMemoryJobStore, JobStore, JobStoreError, PostgresJobStore};
pub use worker::{JobProcessingHandle, JobProcessingService, ProcessOutcome};
