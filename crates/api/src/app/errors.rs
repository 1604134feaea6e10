use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use forgejobs_core::JobId;
use forgejobs_infra::{JobServiceError, JobStoreError};
use forgejobs_jobs::ValidationErrors;

pub fn service_error_to_response(err: JobServiceError) -> axum::response::Response {
    match err {
        JobServiceError::Validation(errors) => validation_error(&errors),
        JobServiceError::NotFound(id) => not_found(id),
        JobServiceError::Store(JobStoreError::NotFound(id)) => not_found(id),
        JobServiceError::Store(JobStoreError::AlreadyExists(id)) => json_error(
            StatusCode::CONFLICT,
            "conflict",
            format!("job already exists: {id}"),
        ),
        JobServiceError::Store(e @ JobStoreError::Storage(_)) => {
            tracing::error!(error = %e, "job store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// 400 carrying every field-level problem.
pub fn validation_error(errors: &ValidationErrors) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        axum::Json(json!({
            "error": "validation_error",
            "message": errors.to_string(),
            "errors": errors,
        })),
    )
        .into_response()
}

pub fn not_found(id: JobId) -> axum::response::Response {
    json_error(StatusCode::NOT_FOUND, "not_found", format!("job not found: {id}"))
}

pub fn parse_job_id(s: &str) -> Result<JobId, axum::response::Response> {
    s.parse()
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("{e}")))
}
