//! Runtime wiring: store selection, notification bus, audit sink, the job
//! service, the queue and the background worker.

use std::sync::Arc;

use tracing::info;

use forgejobs_events::{EventEnvelope, InMemoryEventBus};
use forgejobs_infra::{
    BusJobEventSink, InMemoryJobStore, JobProcessingHandle, JobProcessingService, JobQueue,
    JobService, JobStore, PipelineConfig, PostgresJobStore, TracingAuditSink, job_queue,
};
use forgejobs_jobs::{JobEvent, WorkHandlerRegistry};

pub type JobEventBus = InMemoryEventBus<EventEnvelope<JobEvent>>;

/// Shared state handed to every route through an `Extension`.
#[derive(Clone)]
pub struct AppServices {
    pub jobs: JobService,
    pub queue: JobQueue,
    pub bus: Arc<JobEventBus>,
}

/// Running services plus the worker handle the caller must shut down.
pub struct Runtime {
    pub services: Arc<AppServices>,
    pub worker: JobProcessingHandle,
}

/// Build the pipeline and start the worker.
///
/// Uses Postgres when `database_url` is set (the schema is applied on
/// connect), otherwise an in-memory store.
pub async fn start(config: &PipelineConfig, registry: WorkHandlerRegistry) -> anyhow::Result<Runtime> {
    let store: Arc<dyn JobStore> = match &config.database_url {
        Some(url) => {
            let store = PostgresJobStore::connect(url).await?;
            info!("using postgres job store");
            Arc::new(store)
        }
        None => {
            info!("DATABASE_URL not set; using in-memory job store");
            Arc::new(InMemoryJobStore::new())
        }
    };

    let bus = Arc::new(JobEventBus::new());
    let sink = Arc::new(BusJobEventSink::new(bus.clone()));
    let jobs = JobService::new(
        store,
        sink,
        Arc::new(TracingAuditSink),
        config.service.clone(),
    );

    let (queue, receiver) = job_queue();
    let worker = JobProcessingService::new(jobs.clone(), registry, config.processing.clone())
        .spawn(receiver);

    Ok(Runtime {
        services: Arc::new(AppServices { jobs, queue, bus }),
        worker,
    })
}
