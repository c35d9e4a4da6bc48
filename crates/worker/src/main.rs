//! NetBill Background Worker
//!
//! Handles scheduled jobs including:
//! - Invoice generation for due services (daily at 00:05 UTC)
//! - Overdue scan feeding the isolation queue (daily at 01:10 UTC)
//! - Service job execution with backoff retries (every minute)
//! - Notification queue delivery (every minute)
//! - Invariant checks over the billing state machine (daily at 02:20 UTC)
//! - Queue and audit-trail cleanup (daily at 03:00 UTC)

mod job_processor;
mod notification_processor;

use std::sync::Arc;
use std::time::Duration;

use netbill_billing::BillingService;
use netbill_shared::{BillingConfig, JobKind};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting NetBill Worker");

    // Create database pool
    #[allow(clippy::expect_used)] // Fail-fast on startup if required config is missing
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = netbill_shared::create_pool(&database_url).await?;
    info!("Database pool created");

    let config = BillingConfig::from_env();

    // Create billing service
    let billing = match BillingService::from_env(pool.clone()) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            // Without the cipher key there is nothing this worker can do
            error!(error = %e, "Failed to create billing service");
            anyhow::bail!("billing service initialization failed: {}", e);
        }
    };

    // Create scheduler
    let scheduler = JobScheduler::new().await?;

    // Job 1: Generate invoices for due services (daily at 00:05 UTC)
    let billing_run = Arc::clone(&billing);
    scheduler
        .add(Job::new_async("0 5 0 * * *", move |_uuid, _l| {
            let billing = Arc::clone(&billing_run);
            Box::pin(async move {
                info!("Running scheduled billing run");
                match billing.billing.generate_invoices_for_due_services().await {
                    Ok(summary) => info!(
                        due_services = summary.due_services,
                        generated = summary.generated,
                        failed = summary.failed,
                        "Scheduled billing run finished"
                    ),
                    Err(e) => error!(error = %e, "Scheduled billing run failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Invoice generation (daily at 00:05 UTC)");

    // Job 2: Overdue scan (daily at 01:10 UTC)
    // Each overdue service becomes an isolation job; the router work
    // happens in the queue processor, never inline in the scan.
    let overdue_billing = Arc::clone(&billing);
    scheduler
        .add(Job::new_async("0 10 1 * * *", move |_uuid, _l| {
            let billing = Arc::clone(&overdue_billing);
            Box::pin(async move {
                info!("Running overdue service scan");

                let overdue = match billing.isolation.check_overdue_services().await {
                    Ok(overdue) => overdue,
                    Err(e) => {
                        error!(error = %e, "Overdue scan failed");
                        return;
                    }
                };

                let total = overdue.len();
                let mut enqueued = 0;
                let mut errors = 0;

                for item in overdue {
                    match billing
                        .jobs
                        .enqueue(JobKind::Isolate, item.service_id, Some(item.invoice_id))
                        .await
                    {
                        Ok(Some(_)) => enqueued += 1,
                        Ok(None) => {} // already queued from an earlier scan
                        Err(e) => {
                            errors += 1;
                            error!(
                                service_id = %item.service_id,
                                error = %e,
                                "Failed to enqueue isolation job"
                            );
                        }
                    }
                }

                info!(
                    overdue = total,
                    enqueued = enqueued,
                    errors = errors,
                    "Overdue scan complete"
                );
            })
        })?)
        .await?;
    info!("Scheduled: Overdue scan (daily at 01:10 UTC)");

    // Job 3: Service job queue (every minute)
    let queue_billing = Arc::clone(&billing);
    scheduler
        .add(Job::new_async("0 * * * * *", move |_uuid, _l| {
            let billing = Arc::clone(&queue_billing);
            Box::pin(async move {
                job_processor::process_service_jobs(&billing).await;
            })
        })?)
        .await?;
    info!("Scheduled: Service job queue processing (every minute)");

    // Job 4: Notification queue (every minute)
    // One batch per tick keeps the provider's inter-batch spacing
    let notify_billing = Arc::clone(&billing);
    let notify_config = config.clone();
    scheduler
        .add(Job::new_async("30 * * * * *", move |_uuid, _l| {
            let billing = Arc::clone(&notify_billing);
            let config = notify_config.clone();
            Box::pin(async move {
                notification_processor::process_notification_queue(&billing, &config).await;
            })
        })?)
        .await?;
    info!("Scheduled: Notification queue delivery (every minute)");

    // Job 5: Billing invariant checks (daily at 02:20 UTC)
    let invariant_billing = Arc::clone(&billing);
    scheduler
        .add(Job::new_async("0 20 2 * * *", move |_uuid, _l| {
            let billing = Arc::clone(&invariant_billing);
            Box::pin(async move {
                info!("Running billing invariant checks");
                match billing.invariants.run_all_checks().await {
                    Ok(summary) if summary.healthy => {
                        info!(checks_run = summary.checks_run, "All billing invariants hold")
                    }
                    Ok(summary) => {
                        for violation in &summary.violations {
                            error!(
                                invariant = %violation.invariant,
                                severity = %violation.severity,
                                ids = ?violation.ids,
                                description = %violation.description,
                                "Billing invariant violated"
                            );
                        }
                    }
                    Err(e) => error!(error = %e, "Invariant check run failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Invariant checks (daily at 02:20 UTC)");

    // Job 6: Cleanup old queue rows and audit records (daily at 03:00 UTC)
    let cleanup_billing = Arc::clone(&billing);
    let cleanup_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 0 3 * * *", move |_uuid, _l| {
            let billing = Arc::clone(&cleanup_billing);
            let pool = cleanup_pool.clone();
            Box::pin(async move {
                info!("Running queue cleanup");

                match billing.jobs.cleanup_old(30).await {
                    Ok(deleted) => info!(deleted, "Service job cleanup complete"),
                    Err(e) => error!(error = %e, "Service job cleanup failed"),
                }

                match billing.notifications.cleanup_old(30).await {
                    Ok(deleted) => info!(deleted, "Notification cleanup complete"),
                    Err(e) => error!(error = %e, "Notification cleanup failed"),
                }

                // Webhook audit is kept longer than the queues
                let result = sqlx::query(
                    "DELETE FROM webhook_audit WHERE received_at < NOW() - INTERVAL '90 days'",
                )
                .execute(&pool)
                .await;
                match result {
                    Ok(r) => info!(deleted = r.rows_affected(), "Webhook audit cleanup complete"),
                    Err(e) => error!(error = %e, "Webhook audit cleanup failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Queue cleanup (daily at 03:00 UTC)");

    // Job 7: Router pool idle sweep (every 5 minutes)
    let pool_billing = Arc::clone(&billing);
    scheduler
        .add(Job::new_async("0 */5 * * * *", move |_uuid, _l| {
            let billing = Arc::clone(&pool_billing);
            Box::pin(async move {
                let expired = billing.router_pool.expire_idle().await;
                if expired > 0 {
                    info!(expired, "Expired idle router pool entries");
                }
            })
        })?)
        .await?;
    info!("Scheduled: Router pool idle sweep (every 5 minutes)");

    // Job 8: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    // Start the scheduler
    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("NetBill Worker started successfully with {} scheduled jobs", 8);

    // Keep the main task running
    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
