//! PostgreSQL job record store.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{FromRow, PgPool, Postgres};
use uuid::Uuid;

use coursehub_core::error::{AppError, ErrorKind};
use coursehub_core::result::AppResult;
use coursehub_core::types::{JobId, LeaseId};
use coursehub_entity::job::{JobKind, JobRecord, JobSchedule, JobStatus, Lease};

use crate::store::{JobStore, WriteGuard};

/// Flat row shape of the `job_records` table.
#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    job_name: String,
    handler_type: String,
    payload: serde_json::Value,
    kind: JobKind,
    status: JobStatus,
    scheduled_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    retry_count: i32,
    max_retries: i32,
    error_message: Option<String>,
    interval_seconds: Option<i64>,
    next_run_at: Option<DateTime<Utc>>,
    last_run_at: Option<DateTime<Utc>>,
    lease_id: Option<Uuid>,
    lease_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = AppError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let schedule = match row.kind {
            JobKind::OneTime => JobSchedule::OneTime,
            JobKind::Recurring => match (row.interval_seconds, row.next_run_at) {
                (Some(interval), Some(next_run_at)) if interval > 0 => JobSchedule::Recurring {
                    interval_seconds: interval as u64,
                    next_run_at,
                    last_run_at: row.last_run_at,
                },
                _ => {
                    return Err(AppError::database(format!(
                        "Recurring job {} is missing its interval or next run time",
                        row.id
                    )));
                }
            },
        };

        let lease = match (row.lease_id, row.lease_expires_at) {
            (Some(id), Some(expires_at)) => Some(Lease {
                id: LeaseId::from_uuid(id),
                expires_at,
            }),
            (None, None) => None,
            _ => {
                return Err(AppError::database(format!(
                    "Job {} has a partial lease",
                    row.id
                )));
            }
        };

        Ok(JobRecord {
            id: JobId::from_uuid(row.id),
            job_name: row.job_name,
            handler_type: row.handler_type,
            payload: row.payload,
            schedule,
            status: row.status,
            scheduled_at: row.scheduled_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            retry_count: row.retry_count.max(0) as u32,
            max_retries: row.max_retries.max(0) as u32,
            error_message: row.error_message,
            lease,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

/// Columns written by `save`, bound as `$2..=$17` by [`bind_mutable`].
const UPDATE_COLUMNS: &str = "job_name = $2, handler_type = $3, payload = $4, status = $5, \
     scheduled_at = $6, started_at = $7, completed_at = $8, retry_count = $9, \
     max_retries = $10, error_message = $11, interval_seconds = $12, next_run_at = $13, \
     last_run_at = $14, lease_id = $15, lease_expires_at = $16, updated_at = $17, \
     version = version + 1";

fn schedule_columns(
    schedule: &JobSchedule,
) -> (Option<i64>, Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    match *schedule {
        JobSchedule::OneTime => (None, None, None),
        JobSchedule::Recurring {
            interval_seconds,
            next_run_at,
            last_run_at,
        } => (Some(interval_seconds as i64), Some(next_run_at), last_run_at),
    }
}

fn bind_mutable<'q>(
    query: Query<'q, Postgres, PgArguments>,
    job: &'q JobRecord,
) -> Query<'q, Postgres, PgArguments> {
    let (interval_seconds, next_run_at, last_run_at) = schedule_columns(&job.schedule);
    query
        .bind(job.id)
        .bind(&job.job_name)
        .bind(&job.handler_type)
        .bind(&job.payload)
        .bind(job.status)
        .bind(job.scheduled_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.retry_count as i32)
        .bind(job.max_retries as i32)
        .bind(&job.error_message)
        .bind(interval_seconds)
        .bind(next_run_at)
        .bind(last_run_at)
        .bind(job.lease.map(|lease| lease.id))
        .bind(job.lease.map(|lease| lease.expires_at))
        .bind(job.updated_at)
}

fn db_error(message: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| AppError::with_source(ErrorKind::Database, message, e)
}

/// Repository for job records stored in PostgreSQL.
#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    /// Create a new job repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for JobRepository {
    async fn insert(&self, job: &JobRecord) -> AppResult<()> {
        let (interval_seconds, next_run_at, last_run_at) = schedule_columns(&job.schedule);
        sqlx::query(
            "INSERT INTO job_records (id, job_name, handler_type, payload, kind, status, \
             scheduled_at, started_at, completed_at, retry_count, max_retries, error_message, \
             interval_seconds, next_run_at, last_run_at, lease_id, lease_expires_at, \
             created_at, updated_at, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
             $17, $18, $19, $20)",
        )
        .bind(job.id)
        .bind(&job.job_name)
        .bind(&job.handler_type)
        .bind(&job.payload)
        .bind(job.kind())
        .bind(job.status)
        .bind(job.scheduled_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.retry_count as i32)
        .bind(job.max_retries as i32)
        .bind(&job.error_message)
        .bind(interval_seconds)
        .bind(next_run_at)
        .bind(last_run_at)
        .bind(job.lease.map(|lease| lease.id))
        .bind(job.lease.map(|lease| lease.expires_at))
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.version)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to insert job"))?;
        Ok(())
    }

    async fn get_by_id(&self, id: JobId) -> AppResult<Option<JobRecord>> {
        sqlx::query_as::<_, JobRow>("SELECT * FROM job_records WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to find job"))?
            .map(JobRecord::try_from)
            .transpose()
    }

    async fn get_by_name(&self, job_name: &str) -> AppResult<Vec<JobRecord>> {
        sqlx::query_as::<_, JobRow>(
            "SELECT * FROM job_records WHERE job_name = $1 ORDER BY created_at ASC",
        )
        .bind(job_name)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to find jobs by name"))?
        .into_iter()
        .map(JobRecord::try_from)
        .collect()
    }

    async fn claim_next_due(
        &self,
        now: DateTime<Utc>,
        lease_id: LeaseId,
        lease_duration: Duration,
    ) -> AppResult<Option<JobRecord>> {
        sqlx::query_as::<_, JobRow>(
            "UPDATE job_records SET status = 'processing', lease_id = $1, lease_expires_at = $2, \
             started_at = $3, updated_at = $3, version = version + 1 \
             WHERE id = ( \
                SELECT id FROM job_records \
                WHERE (status = 'pending' AND scheduled_at <= $3) \
                   OR (status = 'processing' AND lease_expires_at < $3) \
                ORDER BY scheduled_at ASC, created_at ASC \
                FOR UPDATE SKIP LOCKED \
                LIMIT 1 \
             ) RETURNING *",
        )
        .bind(lease_id)
        .bind(now + lease_duration)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to claim job"))?
        .map(JobRecord::try_from)
        .transpose()
    }

    async fn save(&self, job: &JobRecord, guard: WriteGuard) -> AppResult<bool> {
        let result = match guard {
            WriteGuard::Lease(lease_id) => {
                let sql = format!(
                    "UPDATE job_records SET {UPDATE_COLUMNS} \
                     WHERE id = $1 AND status = 'processing' AND lease_id = $18"
                );
                bind_mutable(sqlx::query(&sql), job)
                    .bind(lease_id)
                    .execute(&self.pool)
                    .await
            }
            WriteGuard::Version(version) => {
                let sql = format!(
                    "UPDATE job_records SET {UPDATE_COLUMNS} WHERE id = $1 AND version = $18"
                );
                bind_mutable(sqlx::query(&sql), job)
                    .bind(version)
                    .execute(&self.pool)
                    .await
            }
        }
        .map_err(db_error("Failed to save job"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn renew_lease(
        &self,
        id: JobId,
        lease_id: LeaseId,
        expires_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE job_records SET lease_expires_at = $3 \
             WHERE id = $1 AND status = 'processing' AND lease_id = $2",
        )
        .bind(id)
        .bind(lease_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to renew lease"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn count_by_status(&self, status: JobStatus) -> AppResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_records WHERE status = $1")
            .bind(status)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("Failed to count jobs"))?;
        Ok(count.max(0) as u64)
    }
}
