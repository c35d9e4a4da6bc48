//! Service job execution
//!
//! Claims due jobs from the durable queue and runs them under a bounded
//! semaphore, so a slow router never serializes the whole batch and a
//! burst of overdue subscribers cannot starve the worker. Failures go
//! back through the per-kind backoff schedule; exhausted jobs are parked
//! dead for manual remediation.

use std::sync::Arc;

use netbill_billing::models::ServiceJob;
use netbill_billing::{BillingService, IsolationOutcome};
use netbill_shared::JobKind;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

const CLAIM_BATCH: i64 = 50;
const MAX_CONCURRENT_JOBS: usize = 8;
const STALE_AFTER_MINUTES: i64 = 30;

pub async fn process_service_jobs(billing: &Arc<BillingService>) {
    // Requeue work orphaned by a dead worker before claiming
    match billing.jobs.release_stale(STALE_AFTER_MINUTES).await {
        Ok(count) if count > 0 => warn!(count, "Released stale service jobs"),
        Ok(_) => {}
        Err(e) => error!(error = %e, "Failed to release stale service jobs"),
    }

    let jobs = match billing.jobs.claim_due(CLAIM_BATCH).await {
        Ok(jobs) => jobs,
        Err(e) => {
            error!(error = %e, "Failed to claim service jobs");
            return;
        }
    };

    if jobs.is_empty() {
        return;
    }

    info!(count = jobs.len(), "Processing service jobs");

    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_JOBS));
    let mut handles = Vec::with_capacity(jobs.len());

    for job in jobs {
        let billing = Arc::clone(billing);
        let semaphore = Arc::clone(&semaphore);

        handles.push(tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire().await else {
                return;
            };
            execute_one(&billing, &job).await;
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Service job task panicked");
        }
    }
}

async fn execute_one(billing: &BillingService, job: &ServiceJob) {
    let result = run_job(billing, job).await;

    match result {
        Ok(()) => {
            if let Err(e) = billing.jobs.complete(job.id).await {
                error!(job_id = %job.id, error = %e, "Failed to mark job succeeded");
            }
        }
        Err(reason) => {
            if let Err(e) = billing.jobs.fail(job, &reason).await {
                error!(job_id = %job.id, error = %e, "Failed to record job failure");
            }
        }
    }
}

/// Run one unit of work. `Err` means "retry through the schedule";
/// skipped preconditions complete the job since retrying cannot help.
async fn run_job(billing: &BillingService, job: &ServiceJob) -> Result<(), String> {
    match JobKind::parse(&job.kind) {
        Some(JobKind::Isolate) => {
            let outcome = billing
                .isolation
                .isolate_service(job.service_id, job.invoice_id)
                .await
                .map_err(|e| e.to_string())?;
            outcome_to_result(outcome)
        }
        Some(JobKind::Restore) => {
            let outcome = billing
                .isolation
                .restore_service(job.service_id)
                .await
                .map_err(|e| e.to_string())?;
            outcome_to_result(outcome)
        }
        Some(JobKind::RetryProvisioning) => {
            let provisioned = billing
                .provisioning
                .retry_provisioning(job.service_id)
                .await
                .map_err(|e| e.to_string())?;
            if provisioned {
                Ok(())
            } else {
                Err("router provisioning failed".to_string())
            }
        }
        None => Err(format!("unknown job kind: {}", job.kind)),
    }
}

fn outcome_to_result(outcome: IsolationOutcome) -> Result<(), String> {
    match outcome {
        IsolationOutcome::Applied => Ok(()),
        // Data-quality skip: the job is done, there is nothing to retry
        IsolationOutcome::Skipped(_) => Ok(()),
        IsolationOutcome::RouterFailed(reason) => Err(reason),
    }
}
