use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::error;

use forgejobs_core::JobId;

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

/// POST /jobs
///
/// Creates the job for the calling principal and hands it to the worker.
pub async fn create_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateJobRequest>,
) -> axum::response::Response {
    let Some(owner_id) = principal.principal_id() else {
        return errors::json_error(
            StatusCode::UNAUTHORIZED,
            "missing_principal",
            "x-principal-id header is required to create a job",
        );
    };

    let job = match services.jobs.add(body.into_add_job(owner_id)).await {
        Ok(job) => job,
        Err(e) => return errors::service_error_to_response(e),
    };

    if let Err(e) = services.queue.enqueue(job.id) {
        error!(job_id = %job.id, error = %e, "job stored but could not be queued");
        return errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "queue_closed", e.to_string());
    }

    (StatusCode::CREATED, Json(dto::JobResponse::from(job))).into_response()
}

/// GET /jobs?job_type=&owner_id=&skip=&take=
pub async fn search_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::SearchJobsQuery>,
) -> axum::response::Response {
    let filter = query.into_filter();
    let (skip, take) = (filter.skip, filter.take);

    match services.jobs.search(filter).await {
        Ok((jobs, total)) => Json(dto::SearchJobsResponse {
            jobs: jobs.into_iter().map(dto::JobResponse::from).collect(),
            total,
            skip,
            take,
        })
        .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// GET /jobs/:id
pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match errors::parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    job_response(&services, id, StatusCode::OK).await
}

/// PATCH /jobs/:id
pub async fn update_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateJobRequest>,
) -> axum::response::Response {
    let id = match errors::parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services
        .jobs
        .update(body.into_update(id), principal.principal_id())
        .await
    {
        Ok(job) => Json(dto::JobResponse::from(job)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// POST /jobs/:id/cancel
pub async fn cancel_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match errors::parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.jobs.cancel(id, principal.principal_id()).await {
        Ok(true) => job_response(&services, id, StatusCode::OK).await,
        Ok(false) => errors::not_found(id),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// POST /jobs/:id/retry
///
/// Resets failed and canceled items, then queues the job again.
pub async fn retry_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match errors::parse_job_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.jobs.retry(id, principal.principal_id()).await {
        Ok(true) => {}
        Ok(false) => return errors::not_found(id),
        Err(e) => return errors::service_error_to_response(e),
    }

    if let Err(e) = services.queue.enqueue(id) {
        error!(job_id = %id, error = %e, "retried job could not be queued");
        return errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "queue_closed", e.to_string());
    }

    job_response(&services, id, StatusCode::ACCEPTED).await
}

async fn job_response(
    services: &AppServices,
    id: JobId,
    status: StatusCode,
) -> axum::response::Response {
    match services.jobs.get_by_id(id).await {
        Ok(Some(job)) => (status, Json(dto::JobResponse::from(job))).into_response(),
        Ok(None) => errors::not_found(id),
        Err(e) => errors::service_error_to_response(e),
    }
}
