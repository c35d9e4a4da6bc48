//! Durable service job queue
//!
//! Isolation, restoration, and provisioning retries run as queued units of
//! work so a slow router call for one subscriber never delays another.
//! Claims are atomic (`FOR UPDATE SKIP LOCKED` inside a conditional
//! `UPDATE ... RETURNING`), so concurrent workers cannot double-run a job.
//! Failed jobs are rescheduled on the per-kind backoff schedule until the
//! attempt budget is exhausted, then parked as `dead`.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use netbill_shared::{JobKind, JobStatus};

use crate::error::BillingResult;
use crate::models::ServiceJob;
use crate::retry::RetryPolicy;

pub struct JobQueue {
    pool: PgPool,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue a job unless an open one of the same kind already exists for
    /// the service. Returns the job id when a row was inserted.
    pub async fn enqueue(
        &self,
        kind: JobKind,
        service_id: Uuid,
        invoice_id: Option<Uuid>,
    ) -> BillingResult<Option<Uuid>> {
        let mut tx = self.pool.begin().await?;
        let id = Self::enqueue_in_tx(&mut tx, kind, service_id, invoice_id).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Same as [`enqueue`](Self::enqueue) but participates in the caller's
    /// transaction, so e.g. a restoration job commits atomically with the
    /// payment that triggered it.
    pub async fn enqueue_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        kind: JobKind,
        service_id: Uuid,
        invoice_id: Option<Uuid>,
    ) -> BillingResult<Option<Uuid>> {
        let policy = RetryPolicy::for_job_kind(kind);

        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO service_jobs (kind, service_id, invoice_id, status, max_attempts)
            SELECT $1, $2, $3, 'queued', $4
            WHERE NOT EXISTS (
                SELECT 1 FROM service_jobs
                WHERE kind = $1
                  AND service_id = $2
                  AND status IN ('queued', 'running', 'failed')
            )
            RETURNING id
            "#,
        )
        .bind(kind.as_str())
        .bind(service_id)
        .bind(invoice_id)
        .bind(policy.max_attempts as i32)
        .fetch_optional(&mut **tx)
        .await?;

        match &inserted {
            Some((id,)) => {
                tracing::info!(
                    job_id = %id,
                    kind = %kind,
                    service_id = %service_id,
                    "Service job enqueued"
                );
            }
            None => {
                tracing::debug!(
                    kind = %kind,
                    service_id = %service_id,
                    "Service job already open, not enqueueing duplicate"
                );
            }
        }

        Ok(inserted.map(|(id,)| id))
    }

    /// Atomically claim up to `limit` due jobs, marking them running and
    /// counting the attempt.
    pub async fn claim_due(&self, limit: i64) -> BillingResult<Vec<ServiceJob>> {
        let jobs: Vec<ServiceJob> = sqlx::query_as(
            r#"
            UPDATE service_jobs
            SET status = 'running', attempt_count = attempt_count + 1, updated_at = NOW()
            WHERE id IN (
                SELECT id FROM service_jobs
                WHERE status IN ('queued', 'failed')
                  AND next_run_at <= NOW()
                ORDER BY next_run_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    pub async fn complete(&self, job_id: Uuid) -> BillingResult<()> {
        sqlx::query(
            "UPDATE service_jobs SET status = 'succeeded', last_error = NULL, updated_at = NOW() WHERE id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed attempt. Reschedules on the kind's backoff schedule
    /// while the attempt budget lasts; otherwise the job goes dead and the
    /// failure is logged for manual remediation.
    pub async fn fail(&self, job: &ServiceJob, error: &str) -> BillingResult<JobStatus> {
        let kind = JobKind::parse(&job.kind)
            .unwrap_or(JobKind::Isolate);
        let policy = RetryPolicy::for_job_kind(kind);
        let failed_attempts = job.attempt_count as u32;

        if policy.should_retry(failed_attempts) {
            let delay = policy.delay_after(failed_attempts);
            sqlx::query(
                r#"
                UPDATE service_jobs
                SET status = 'failed',
                    last_error = $2,
                    next_run_at = NOW() + ($3 || ' seconds')::INTERVAL,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(job.id)
            .bind(error)
            .bind(delay.as_secs() as i64)
            .execute(&self.pool)
            .await?;

            tracing::warn!(
                job_id = %job.id,
                kind = %job.kind,
                service_id = %job.service_id,
                attempt = failed_attempts,
                retry_in_secs = delay.as_secs(),
                error = %error,
                "Service job failed, retry scheduled"
            );
            Ok(JobStatus::Failed)
        } else {
            sqlx::query(
                "UPDATE service_jobs SET status = 'dead', last_error = $2, updated_at = NOW() WHERE id = $1",
            )
            .bind(job.id)
            .bind(error)
            .execute(&self.pool)
            .await?;

            tracing::error!(
                job_id = %job.id,
                kind = %job.kind,
                service_id = %job.service_id,
                attempts = failed_attempts,
                error = %error,
                "Service job failed after all retries. Manual intervention required."
            );
            Ok(JobStatus::Dead)
        }
    }

    /// Return jobs stuck in `running` (worker died mid-execution) to the
    /// queue after a timeout.
    pub async fn release_stale(&self, stale_after_minutes: i64) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE service_jobs
            SET status = 'queued', updated_at = NOW()
            WHERE status = 'running'
              AND updated_at < NOW() - ($1 || ' minutes')::INTERVAL
            "#,
        )
        .bind(stale_after_minutes)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Drop terminal jobs older than the retention window
    pub async fn cleanup_old(&self, keep_days: i64) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM service_jobs
            WHERE status IN ('succeeded', 'dead')
              AND updated_at < NOW() - ($1 || ' days')::INTERVAL
            "#,
        )
        .bind(keep_days)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Dead jobs awaiting manual remediation, newest first
    pub async fn list_dead(&self, limit: i64) -> BillingResult<Vec<ServiceJob>> {
        let jobs: Vec<ServiceJob> = sqlx::query_as(
            "SELECT * FROM service_jobs WHERE status = 'dead' ORDER BY updated_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }
}
