//! Notification queue delivery
//!
//! Drains at most one batch per tick; with the per-minute schedule this
//! yields the provider's required spacing between batches without the
//! worker ever sleeping inside a job.

use std::sync::Arc;

use netbill_billing::BillingService;
use netbill_shared::{BillingConfig, NotificationChannel};
use tracing::{error, info};

pub async fn process_notification_queue(billing: &Arc<BillingService>, config: &BillingConfig) {
    let batch = match billing
        .notifications
        .claim_due(config.notify_batch_size as i64)
        .await
    {
        Ok(batch) => batch,
        Err(e) => {
            error!(error = %e, "Failed to claim queued notifications");
            return;
        }
    };

    if batch.is_empty() {
        return;
    }

    info!(count = batch.len(), "Delivering queued notifications");

    let mut sent = 0;
    let mut failed = 0;

    for item in batch {
        let channel = match NotificationChannel::parse(&item.channel) {
            Some(channel) => channel,
            None => {
                failed += 1;
                let _ = billing
                    .notifications
                    .mark_failed(&item, &format!("unknown channel: {}", item.channel))
                    .await;
                continue;
            }
        };

        let result = billing
            .sender
            .send(channel, &item.recipient, &item.body, item.subject.as_deref())
            .await;

        match result {
            Ok(()) => {
                sent += 1;
                if let Err(e) = billing.notifications.mark_sent(item.id).await {
                    error!(notification_id = %item.id, error = %e, "Failed to mark notification sent");
                }
            }
            Err(e) => {
                failed += 1;
                if let Err(mark_err) = billing.notifications.mark_failed(&item, &e.to_string()).await
                {
                    error!(
                        notification_id = %item.id,
                        error = %mark_err,
                        "Failed to record notification failure"
                    );
                }
            }
        }
    }

    info!(sent, failed, "Notification delivery cycle complete");
}
