use axum::{
    routing::{get, post},
    Router,
};

pub mod event_stream;
pub mod jobs;
pub mod system;

/// Router for the job endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/jobs", post(jobs::create_job).get(jobs::search_jobs))
        .route("/jobs/:id", get(jobs::get_job).patch(jobs::update_job))
        .route("/jobs/:id/cancel", post(jobs::cancel_job))
        .route("/jobs/:id/retry", post(jobs::retry_job))
        .route("/jobs/:id/events", get(event_stream::stream_job_events))
}
