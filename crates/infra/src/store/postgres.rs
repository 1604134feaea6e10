//! Postgres-backed job store.
//!
//! Schema lives in `migrations/0001_jobs.sql`: one `jobs` row per job and one
//! `job_items` row per item, keyed by `(job_id, item_index)`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | JobStoreError |
//! |------------|----------------------|---------------|
//! | Database (unique violation) | `23505` | `AlreadyExists` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / other | N/A | `Storage` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use forgejobs_core::{JobId, PrincipalId};
use forgejobs_jobs::{Job, JobItem, JobItemStatus, JobStatus, JobType, SearchJobs};

use super::{JobStore, JobStoreError};

const SCHEMA: &str = include_str!("../../migrations/0001_jobs.sql");

const JOB_COLUMNS: &str = r#"
    id, owner_id, job_type, input, status, estimated_duration_ms,
    created_at, started_at, completed_at, actual_duration_ms, result, failure
"#;

/// Postgres-backed job store.
///
/// `update` rewrites the job row and all item rows inside one transaction, so
/// readers never observe a half-applied update.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect and apply the schema.
    pub async fn connect(database_url: &str) -> Result<Self, JobStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), JobStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn load_items(&self, job_ids: &[Uuid]) -> Result<Vec<(Uuid, JobItem)>, JobStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT job_id, item_index, data, status, message, output, attempts,
                   started_at, completed_at
            FROM job_items
            WHERE job_id = ANY($1)
            ORDER BY job_id, item_index ASC
            "#,
        )
        .bind(job_ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_items", e))?;

        rows.iter()
            .map(|row| {
                let job_id: Uuid = get(row, "job_id")?;
                Ok((job_id, item_from_row(row)?))
            })
            .collect()
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id), err)]
    async fn add(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, owner_id, job_type, input, status, estimated_duration_ms,
                              created_at, started_at, completed_at, actual_duration_ms, result,
                              failure)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.owner_id.as_uuid())
        .bind(job.job_type.as_str())
        .bind(job.input.as_deref())
        .bind(job.status.as_str())
        .bind(job.estimated_duration_ms as i64)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.actual_duration_ms.map(|ms| ms as i64))
        .bind(job.result.as_deref())
        .bind(job.failure.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(|e| match map_sqlx_error("add", e) {
            JobStoreError::AlreadyExists(_) => JobStoreError::AlreadyExists(job.id),
            other => other,
        })?;

        write_items(&mut tx, job, false).await?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get_by_id(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_by_id", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut job = job_from_row(&row)?;
        job.items = self
            .load_items(&[id.as_uuid()])
            .await?
            .into_iter()
            .map(|(_, item)| item)
            .collect();
        Ok(Some(job))
    }

    #[instrument(skip(self, job), fields(job_id = %job.id), err)]
    async fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2, started_at = $3, completed_at = $4,
                actual_duration_ms = $5, result = $6, failure = $7
            WHERE id = $1
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.status.as_str())
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.actual_duration_ms.map(|ms| ms as i64))
        .bind(job.result.as_deref())
        .bind(job.failure.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        if updated.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(job.id));
        }

        write_items(&mut tx, job, true).await?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    #[instrument(skip(self), err)]
    async fn search(&self, filter: &SearchJobs) -> Result<(Vec<Job>, u64), JobStoreError> {
        let owner = filter.owner_id.map(|o| o.as_uuid());

        let total: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS total FROM jobs
            WHERE ($1::text IS NULL OR job_type = $1)
              AND ($2::uuid IS NULL OR owner_id = $2)
            "#,
        )
        .bind(filter.job_type.as_deref())
        .bind(owner)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("search_count", e))
        .and_then(|row| get(&row, "total"))?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE ($1::text IS NULL OR job_type = $1)
              AND ($2::uuid IS NULL OR owner_id = $2)
            ORDER BY created_at DESC, id DESC
            OFFSET $3 LIMIT $4
            "#
        ))
        .bind(filter.job_type.as_deref())
        .bind(owner)
        .bind(i64::try_from(filter.skip).unwrap_or(i64::MAX))
        .bind(filter.take as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("search", e))?;

        let mut jobs = rows.iter().map(job_from_row).collect::<Result<Vec<_>, _>>()?;

        let ids: Vec<Uuid> = jobs.iter().map(|j| j.id.as_uuid()).collect();
        for (job_id, item) in self.load_items(&ids).await? {
            if let Some(job) = jobs.iter_mut().find(|j| j.id.as_uuid() == job_id) {
                job.items.push(item);
            }
        }

        Ok((jobs, total.max(0) as u64))
    }
}

/// Insert (or, with `upsert`, overwrite) every item row of `job`.
async fn write_items(
    tx: &mut Transaction<'_, Postgres>,
    job: &Job,
    upsert: bool,
) -> Result<(), JobStoreError> {
    let conflict = if upsert {
        r#"
        ON CONFLICT (job_id, item_index) DO UPDATE
        SET status = EXCLUDED.status, message = EXCLUDED.message, output = EXCLUDED.output,
            attempts = EXCLUDED.attempts, started_at = EXCLUDED.started_at,
            completed_at = EXCLUDED.completed_at
        "#
    } else {
        ""
    };
    let sql = format!(
        r#"
        INSERT INTO job_items (job_id, item_index, data, status, message, output, attempts,
                               started_at, completed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        {conflict}
        "#
    );

    for item in &job.items {
        sqlx::query(&sql)
            .bind(job.id.as_uuid())
            .bind(item.index as i32)
            .bind(item.data.as_str())
            .bind(item.status.as_str())
            .bind(item.message.as_deref())
            .bind(item.output.as_deref())
            .bind(item.attempts as i32)
            .bind(item.started_at)
            .bind(item.completed_at)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("write_items", e))?;
    }
    Ok(())
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, JobStoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| JobStoreError::Storage(format!("failed to read column {column}: {e}")))
}

fn job_from_row(row: &PgRow) -> Result<Job, JobStoreError> {
    let job_type: String = get(row, "job_type")?;
    let status: String = get(row, "status")?;
    let estimated: i64 = get(row, "estimated_duration_ms")?;
    let actual: Option<i64> = get(row, "actual_duration_ms")?;
    let started_at: Option<DateTime<Utc>> = get(row, "started_at")?;
    let completed_at: Option<DateTime<Utc>> = get(row, "completed_at")?;

    Ok(Job {
        id: JobId::from_uuid(get(row, "id")?),
        owner_id: PrincipalId::from_uuid(get(row, "owner_id")?),
        job_type: JobType::parse(&job_type)
            .map_err(|e| JobStoreError::Storage(format!("stored job type: {e}")))?,
        input: get(row, "input")?,
        items: Vec::new(),
        status: JobStatus::parse(&status)
            .ok_or_else(|| JobStoreError::Storage(format!("unknown job status: {status}")))?,
        estimated_duration_ms: estimated.max(0) as u64,
        created_at: get(row, "created_at")?,
        started_at,
        completed_at,
        actual_duration_ms: actual.map(|ms| ms.max(0) as u64),
        result: get(row, "result")?,
        failure: get(row, "failure")?,
    })
}

fn item_from_row(row: &PgRow) -> Result<JobItem, JobStoreError> {
    let index: i32 = get(row, "item_index")?;
    let status: String = get(row, "status")?;
    let attempts: i32 = get(row, "attempts")?;

    Ok(JobItem {
        index: index.max(0) as u32,
        data: get(row, "data")?,
        status: JobItemStatus::parse(&status)
            .ok_or_else(|| JobStoreError::Storage(format!("unknown item status: {status}")))?,
        message: get(row, "message")?,
        output: get(row, "output")?,
        attempts: attempts.max(0) as u32,
        started_at: get(row, "started_at")?,
        completed_at: get(row, "completed_at")?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            if db_err.code().as_deref() == Some("23505") {
                // Caller substitutes the real id.
                JobStoreError::AlreadyExists(JobId::from_uuid(Uuid::nil()))
            } else {
                JobStoreError::Storage(format!(
                    "database error in {operation}: {}",
                    db_err.message()
                ))
            }
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => JobStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}
