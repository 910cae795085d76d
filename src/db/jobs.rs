//! Queue operations: enqueue, claim, ack, fail, reaping, retention.
//!
//! Claim is the one operation needing cross-process mutual exclusion; it is
//! a single conditional `UPDATE … RETURNING`, atomic under SQLite's write
//! lock. Ack and fail operate on a job the caller exclusively owns and only
//! need the ownership guard in their WHERE clause.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::QueryBuilder;

use crate::error::{Error, Result};
use crate::model::{Job, JobId, NewJob, Status};

const JOB_COLUMNS: &str = "id, job_type, payload, status, attempts, max_attempts, \
     claimed_by, claim_expires_at, not_before, last_error, \
     enqueued_at, updated_at, completed_at, failed_at";

/// Result of a visibility-timeout sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapOutcome {
    /// Expired claims reverted to pending for another worker.
    pub reclaimed: u64,
    /// Expired claims whose retry budget was already spent; now failed.
    pub exhausted: u64,
}

impl super::Db {
    /// Persist a new job in `pending` state. Once this returns, the job
    /// survives a producer crash.
    pub async fn enqueue(&self, new: NewJob) -> Result<Job> {
        let id = JobId::new();
        let now = Utc::now();
        let not_before = new.delay.map(|d| now + d).unwrap_or(now);
        let max_attempts = new.max_attempts.unwrap_or(self.default_max_attempts).max(1);

        sqlx::query(
            "INSERT INTO jobs (id, job_type, payload, status, attempts, max_attempts, \
             not_before, enqueued_at, updated_at) \
             VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?5, ?6, ?6)",
        )
        .bind(id.0.to_string())
        .bind(&new.job_type)
        .bind(serde_json::to_string(&new.payload)?)
        .bind(max_attempts as i64)
        .bind(not_before.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(self.pool())
        .await?;

        self.get_job(id).await
    }

    /// Atomically claim one eligible pending job, or None if the queue has
    /// nothing claimable.
    ///
    /// Selects the oldest pending job past its `not_before` gate (optionally
    /// filtered by type), marks it in-flight under `worker_id`, stamps the
    /// visibility deadline, and increments `attempts`. The whole transition
    /// is one UPDATE, so no two callers can receive the same job.
    pub async fn claim(
        &self,
        worker_id: &str,
        job_types: Option<&[&str]>,
        visibility_timeout: Duration,
    ) -> Result<Option<Job>> {
        let now = Utc::now();
        let expires = now + visibility_timeout;

        let mut qb = QueryBuilder::<sqlx::Sqlite>::new("UPDATE jobs SET status = 'in-flight', claimed_by = ");
        qb.push_bind(worker_id.to_string());
        qb.push(", claim_expires_at = ");
        qb.push_bind(expires.to_rfc3339());
        qb.push(", attempts = attempts + 1, updated_at = ");
        qb.push_bind(now.to_rfc3339());
        qb.push(" WHERE id = (SELECT id FROM jobs WHERE status = 'pending' AND not_before <= ");
        qb.push_bind(now.to_rfc3339());
        if let Some(types) = job_types {
            qb.push(" AND job_type IN (");
            {
                let mut sep = qb.separated(", ");
                for job_type in types {
                    sep.push_bind(job_type.to_string());
                }
            }
            qb.push(")");
        }
        qb.push(" ORDER BY enqueued_at ASC, id ASC LIMIT 1) AND status = 'pending' RETURNING ");
        qb.push(JOB_COLUMNS);

        let row: Option<JobRow> = qb.build_query_as().fetch_optional(self.pool()).await?;
        row.map(JobRow::try_into_job).transpose()
    }

    /// Transition an in-flight job to `completed`.
    ///
    /// Errors (without touching state) if the job is missing, not in-flight,
    /// or claimed by someone other than `worker_id` — e.g. after the reaper
    /// handed the job to another worker.
    pub async fn ack(&self, id: JobId, worker_id: &str) -> Result<Job> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE jobs SET status = 'completed', completed_at = ?1, \
             claimed_by = NULL, claim_expires_at = NULL, updated_at = ?1 \
             WHERE id = ?2 AND status = 'in-flight' AND claimed_by = ?3",
        )
        .bind(&now)
        .bind(id.0.to_string())
        .bind(worker_id)
        .execute(self.pool())
        .await?
        .rows_affected();

        if result == 0 {
            return Err(self.ownership_error(id, worker_id).await);
        }

        self.get_job(id).await
    }

    /// Report a processing failure on an in-flight job.
    ///
    /// Retryable failures with budget left go back to `pending` behind an
    /// exponential backoff gate; everything else is terminal `failed` with
    /// the error recorded. Same ownership guard as [`ack`](Self::ack).
    pub async fn fail(
        &self,
        id: JobId,
        worker_id: &str,
        error: &str,
        retryable: bool,
    ) -> Result<Job> {
        let current = self.get_job(id).await?;
        let exhausted = current.attempts >= current.max_attempts;
        let now = Utc::now();

        let (status, not_before, failed_at) = if retryable && !exhausted {
            let gate = now + self.backoff_for(current.attempts);
            (Status::Pending, Some(gate.to_rfc3339()), None)
        } else {
            (Status::Failed, None, Some(now.to_rfc3339()))
        };

        let result = sqlx::query(
            "UPDATE jobs SET status = ?1, not_before = COALESCE(?2, not_before), \
             failed_at = ?3, last_error = ?4, \
             claimed_by = NULL, claim_expires_at = NULL, updated_at = ?5 \
             WHERE id = ?6 AND status = 'in-flight' AND claimed_by = ?7",
        )
        .bind(status.to_string())
        .bind(not_before)
        .bind(failed_at)
        .bind(error)
        .bind(now.to_rfc3339())
        .bind(id.0.to_string())
        .bind(worker_id)
        .execute(self.pool())
        .await?
        .rows_affected();

        if result == 0 {
            return Err(self.ownership_error(id, worker_id).await);
        }

        self.get_job(id).await
    }

    /// Backoff delay before attempt `attempts + 1` becomes claimable.
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(16);
        self.retry_backoff
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.backoff_cap)
    }

    /// Revert in-flight jobs whose visibility deadline has passed.
    ///
    /// A claimant that crashed or hung never acks; its jobs come back here.
    /// Jobs with retry budget left return to `pending` (the stale claimant's
    /// eventual ack/fail then trips the ownership guard). Jobs already on
    /// their final attempt are failed instead of looping forever.
    pub async fn reap_expired(&self) -> Result<ReapOutcome> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool().begin().await?;

        let exhausted = sqlx::query(
            "UPDATE jobs SET status = 'failed', failed_at = ?1, \
             last_error = 'visibility timeout exceeded', \
             claimed_by = NULL, claim_expires_at = NULL, updated_at = ?1 \
             WHERE status = 'in-flight' AND claim_expires_at <= ?1 \
             AND attempts >= max_attempts",
        )
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let reclaimed = sqlx::query(
            "UPDATE jobs SET status = 'pending', \
             claimed_by = NULL, claim_expires_at = NULL, updated_at = ?1 \
             WHERE status = 'in-flight' AND claim_expires_at <= ?1",
        )
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(ReapOutcome {
            reclaimed,
            exhausted,
        })
    }

    /// Retention policy: delete terminal jobs older than the cutoff.
    pub async fn purge_finished(&self, older_than: Duration) -> Result<u64> {
        let cutoff = (Utc::now() - older_than).to_rfc3339();
        let purged = sqlx::query(
            "DELETE FROM jobs WHERE status IN ('completed', 'failed') AND updated_at <= ?1",
        )
        .bind(cutoff)
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(purged)
    }

    /// Get a job by ID.
    pub async fn get_job(&self, id: JobId) -> Result<Job> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"))
                .bind(id.0.to_string())
                .fetch_optional(self.pool())
                .await?;

        row.ok_or(Error::NotFound(id))?.try_into_job()
    }

    /// List jobs, optionally filtered by status and type, newest first.
    pub async fn list_jobs(
        &self,
        status: Option<Status>,
        job_type: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Job>> {
        let mut qb = QueryBuilder::<sqlx::Sqlite>::new("SELECT ");
        qb.push(JOB_COLUMNS);
        qb.push(" FROM jobs WHERE 1 = 1");
        if let Some(status) = status {
            qb.push(" AND status = ");
            qb.push_bind(status.to_string());
        }
        if let Some(job_type) = job_type {
            qb.push(" AND job_type = ");
            qb.push_bind(job_type.to_string());
        }
        qb.push(" ORDER BY enqueued_at DESC LIMIT ");
        qb.push_bind(limit);

        let rows: Vec<JobRow> = qb.build_query_as().fetch_all(self.pool()).await?;
        rows.into_iter().map(JobRow::try_into_job).collect()
    }

    /// Job counts per status, for the operator surface.
    pub async fn count_by_status(&self) -> Result<Vec<(Status, u64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status ORDER BY status")
                .fetch_all(self.pool())
                .await?;

        rows.into_iter()
            .map(|(status, count)| {
                let status = status.parse().map_err(Error::Other)?;
                Ok((status, count as u64))
            })
            .collect()
    }

    /// Diagnose why a conditional ack/fail matched no rows.
    async fn ownership_error(&self, id: JobId, caller: &str) -> Error {
        match self.get_job(id).await {
            Ok(job) if job.status != Status::InFlight => Error::NotInFlight {
                id,
                status: job.status,
            },
            Ok(job) => Error::NotOwner {
                id,
                owner: job.claimed_by,
                caller: caller.to_string(),
            },
            Err(e) => e,
        }
    }
}

// ---------------------------------------------------------------------------
// Row parsing
// ---------------------------------------------------------------------------

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    job_type: String,
    payload: String,
    status: String,
    attempts: i64,
    max_attempts: i64,
    claimed_by: Option<String>,
    claim_expires_at: Option<String>,
    not_before: String,
    last_error: Option<String>,
    enqueued_at: String,
    updated_at: String,
    completed_at: Option<String>,
    failed_at: Option<String>,
}

impl JobRow {
    fn try_into_job(self) -> Result<Job> {
        let id = self
            .id
            .parse()
            .map_err(|e: uuid::Error| Error::Other(format!("invalid job id: {e}")))?;

        Ok(Job {
            id: JobId(id),
            job_type: self.job_type,
            payload: serde_json::from_str(&self.payload)?,
            status: self.status.parse().map_err(Error::Other)?,
            attempts: self.attempts as u32,
            max_attempts: self.max_attempts as u32,
            claimed_by: self.claimed_by,
            claim_expires_at: self.claim_expires_at.as_deref().map(parse_ts).transpose()?,
            not_before: parse_ts(&self.not_before)?,
            last_error: self.last_error,
            enqueued_at: parse_ts(&self.enqueued_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            completed_at: self.completed_at.as_deref().map(parse_ts).transpose()?,
            failed_at: self.failed_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    s.parse()
        .map_err(|e| Error::Other(format!("invalid timestamp {s:?}: {e}")))
}
