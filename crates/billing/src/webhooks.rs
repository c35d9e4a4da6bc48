//! Payment webhook processing
//!
//! Pipeline per notification: audit-log, verify signature, parse,
//! deduplicate, locate the invoice, then apply the payment in a single
//! transaction (payment row, invoice settlement, expiry extension, and a
//! restoration job when the service sat isolated). Gateways retry their
//! webhooks, so a duplicate (gateway, transaction_id) must be a successful
//! no-op rather than an error.

use std::sync::Arc;

use sqlx::PgPool;
use time::Date;
use uuid::Uuid;

use netbill_shared::{BillingConfig, JobKind, NotificationChannel, ServiceStatus};

use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    GatewayKind, GatewayRegistry, GatewayTxStatus, InboundWebhook, NormalizedWebhook,
};
use crate::jobs::JobQueue;
use crate::models::{today_utc, Invoice};
use crate::notify::NotificationQueue;

/// Terminal result of a processed webhook
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Payment applied and invoice settled
    Processed { payment_id: Uuid, invoice_id: Uuid },
    /// Duplicate delivery of an already-applied transaction
    AlreadyProcessed,
    /// Gateway reported a non-success status; receipt acknowledged, no
    /// invoice mutation
    Acknowledged(GatewayTxStatus),
}

/// Extend a service's expiry on payment, anchored so a lapsed account
/// restarts the cycle from today while a still-active account pushes its
/// existing expiry further out.
pub fn extend_expiry(current_expiry: Date, today: Date, cycle_days: i64) -> Date {
    current_expiry.max(today) + time::Duration::days(cycle_days)
}

pub struct PaymentWebhookProcessor {
    pool: PgPool,
    gateways: Arc<GatewayRegistry>,
    notifications: NotificationQueue,
    config: BillingConfig,
}

impl PaymentWebhookProcessor {
    pub fn new(pool: PgPool, gateways: Arc<GatewayRegistry>, config: BillingConfig) -> Self {
        let notifications = NotificationQueue::new(pool.clone());
        Self {
            pool,
            gateways,
            notifications,
            config,
        }
    }

    /// Run the full pipeline for one inbound notification.
    pub async fn process(
        &self,
        kind: GatewayKind,
        webhook: InboundWebhook,
        source_ip: Option<&str>,
    ) -> BillingResult<WebhookOutcome> {
        // Audit first, before any processing, regardless of outcome.
        let audit_id = self.audit_inbound(kind, &webhook, source_ip).await;

        let result = self.process_inner(kind, &webhook).await;

        let outcome_label = match &result {
            Ok(WebhookOutcome::Processed { .. }) => "processed".to_string(),
            Ok(WebhookOutcome::AlreadyProcessed) => "duplicate".to_string(),
            Ok(WebhookOutcome::Acknowledged(status)) => {
                format!("acknowledged_{}", status.as_str())
            }
            Err(e) => format!("rejected: {}", e),
        };
        self.audit_outcome(audit_id, &outcome_label).await;

        result
    }

    async fn process_inner(
        &self,
        kind: GatewayKind,
        webhook: &InboundWebhook,
    ) -> BillingResult<WebhookOutcome> {
        let adapter = self.gateways.adapter(kind);

        // 1. Authenticity
        if !adapter.verify_signature(webhook)? {
            tracing::warn!(
                gateway = %kind,
                "Webhook signature verification failed - possible forgery attempt"
            );
            return Err(BillingError::SignatureInvalid);
        }

        // 2. Normalization (missing transaction_id/status surface here)
        let normalized = adapter.parse_webhook(webhook)?;

        // 3. Idempotency pre-check; the transactional insert below
        // re-checks atomically for the concurrent-delivery case
        if self.payment_exists(kind, &normalized.transaction_id).await? {
            tracing::info!(
                gateway = %kind,
                transaction_id = %normalized.transaction_id,
                "Duplicate webhook, transaction already applied"
            );
            return Ok(WebhookOutcome::AlreadyProcessed);
        }

        // 4. Only success is actionable
        if normalized.status != GatewayTxStatus::Success {
            tracing::info!(
                gateway = %kind,
                transaction_id = %normalized.transaction_id,
                status = normalized.status.as_str(),
                "Non-success gateway status acknowledged without processing"
            );
            return Ok(WebhookOutcome::Acknowledged(normalized.status));
        }

        // 5. Invoice resolution: external_id, invoice_id, order_id in order
        let invoice = match self.resolve_invoice(&normalized).await? {
            Some(invoice) => invoice,
            None => {
                tracing::warn!(
                    gateway = %kind,
                    transaction_id = %normalized.transaction_id,
                    refs = ?normalized.invoice_refs().collect::<Vec<_>>(),
                    "Webhook references no known invoice"
                );
                return Err(BillingError::NotFound("invoice".to_string()));
            }
        };

        if normalized.amount != 0 && normalized.amount != invoice.amount {
            tracing::warn!(
                invoice_id = %invoice.id,
                invoice_amount = invoice.amount,
                paid_amount = normalized.amount,
                "Paid amount differs from invoice amount"
            );
        }

        // 6. Apply atomically
        let outcome = self.apply_payment(kind, &normalized, &invoice).await?;

        // 7. Confirmation notification, outside the transaction: a
        // notification failure must never roll back a payment
        if let WebhookOutcome::Processed { .. } = &outcome {
            self.enqueue_confirmation(&invoice).await;
        }

        Ok(outcome)
    }

    /// One all-or-nothing transaction: payment row, invoice settlement,
    /// expiry extension, and the restoration job for isolated services.
    async fn apply_payment(
        &self,
        kind: GatewayKind,
        normalized: &NormalizedWebhook,
        invoice: &Invoice,
    ) -> BillingResult<WebhookOutcome> {
        let mut tx = self.pool.begin().await?;

        // Atomic idempotency claim on (gateway, transaction_id)
        let payment_id: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO payments (invoice_id, gateway, transaction_id, amount, status, metadata)
            VALUES ($1, $2, $3, $4, 'success', $5)
            ON CONFLICT (gateway, transaction_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(invoice.id)
        .bind(kind.as_str())
        .bind(&normalized.transaction_id)
        .bind(normalized.amount)
        .bind(&normalized.metadata)
        .fetch_optional(&mut *tx)
        .await?;

        let payment_id = match payment_id {
            Some((id,)) => id,
            None => {
                // Concurrent delivery claimed it first
                tx.rollback().await?;
                tracing::info!(
                    gateway = %kind,
                    transaction_id = %normalized.transaction_id,
                    "Concurrent duplicate webhook lost the idempotency race"
                );
                return Ok(WebhookOutcome::AlreadyProcessed);
            }
        };

        // unpaid -> paid exactly once
        let settled = sqlx::query(
            r#"
            UPDATE invoices
            SET status = 'paid', paid_at = NOW(), payment_id = $2
            WHERE id = $1 AND status = 'unpaid'
            "#,
        )
        .bind(invoice.id)
        .bind(payment_id)
        .execute(&mut *tx)
        .await?;

        if settled.rows_affected() == 0 {
            // A different transaction already settled this invoice. Keep
            // the payment record (money was received) but skip the expiry
            // extension and restoration side effects.
            tx.commit().await?;
            tracing::warn!(
                invoice_id = %invoice.id,
                gateway = %kind,
                transaction_id = %normalized.transaction_id,
                "Payment recorded against an already-paid invoice. \
                 RECONCILIATION NEEDED: a second gateway transaction settled the same invoice."
            );
            return Ok(WebhookOutcome::Processed {
                payment_id,
                invoice_id: invoice.id,
            });
        }

        // Expiry extension anchored at max(current expiry, today)
        let today = today_utc();
        let service_row: Option<(Date, String)> =
            sqlx::query_as("SELECT expiry_date, status FROM services WHERE id = $1 FOR UPDATE")
                .bind(invoice.service_id)
                .fetch_optional(&mut *tx)
                .await?;

        let (current_expiry, service_status) = service_row.ok_or_else(|| {
            BillingError::Internal(format!(
                "invoice {} references missing service {}",
                invoice.id, invoice.service_id
            ))
        })?;

        let new_expiry = extend_expiry(current_expiry, today, self.config.cycle_days);

        sqlx::query("UPDATE services SET expiry_date = $2, updated_at = NOW() WHERE id = $1")
            .bind(invoice.service_id)
            .bind(new_expiry)
            .execute(&mut *tx)
            .await?;

        // Isolated subscriber paid: queue the restoration in the same
        // transaction so it cannot be lost between commit and enqueue
        if service_status == ServiceStatus::Isolated.as_str() {
            JobQueue::enqueue_in_tx(
                &mut tx,
                JobKind::Restore,
                invoice.service_id,
                Some(invoice.id),
            )
            .await?;
        }

        tx.commit().await?;

        tracing::info!(
            gateway = %kind,
            transaction_id = %normalized.transaction_id,
            payment_id = %payment_id,
            invoice_id = %invoice.id,
            service_id = %invoice.service_id,
            amount = normalized.amount,
            new_expiry = %new_expiry,
            restoring = service_status == ServiceStatus::Isolated.as_str(),
            "Payment applied"
        );

        Ok(WebhookOutcome::Processed {
            payment_id,
            invoice_id: invoice.id,
        })
    }

    async fn payment_exists(&self, kind: GatewayKind, transaction_id: &str) -> BillingResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM payments WHERE gateway = $1 AND transaction_id = $2)",
        )
        .bind(kind.as_str())
        .bind(transaction_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn resolve_invoice(
        &self,
        normalized: &NormalizedWebhook,
    ) -> BillingResult<Option<Invoice>> {
        for reference in normalized.invoice_refs() {
            let id = match Uuid::parse_str(reference) {
                Ok(id) => id,
                Err(_) => continue,
            };

            let invoice: Option<Invoice> = sqlx::query_as("SELECT * FROM invoices WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

            if invoice.is_some() {
                return Ok(invoice);
            }
        }
        Ok(None)
    }

    async fn enqueue_confirmation(&self, invoice: &Invoice) {
        let customer: Option<(Option<String>, Option<String>)> = sqlx::query_as(
            r#"
            SELECT c.phone, c.name
            FROM customers c
            JOIN services s ON s.customer_id = c.id
            WHERE s.id = $1
            "#,
        )
        .bind(invoice.service_id)
        .fetch_optional(&self.pool)
        .await
        .unwrap_or(None);

        let Some((Some(phone), name)) = customer else {
            return;
        };
        if phone.is_empty() {
            return;
        }

        let body = format!(
            "Terima kasih {}, pembayaran sebesar Rp{} telah kami terima.",
            name.as_deref().unwrap_or("Pelanggan"),
            invoice.amount
        );

        if let Err(e) = self
            .notifications
            .enqueue(NotificationChannel::Whatsapp, &phone, None, &body)
            .await
        {
            tracing::warn!(
                invoice_id = %invoice.id,
                error = %e,
                "Failed to enqueue payment confirmation"
            );
        }
    }

    /// Record the inbound attempt before any processing. Audit failures
    /// are logged but never block payment processing.
    async fn audit_inbound(
        &self,
        kind: GatewayKind,
        webhook: &InboundWebhook,
        source_ip: Option<&str>,
    ) -> Option<Uuid> {
        let inserted: Result<(Uuid,), sqlx::Error> = sqlx::query_as(
            r#"
            INSERT INTO webhook_audit (gateway, source_ip, payload)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(kind.as_str())
        .bind(source_ip)
        .bind(&webhook.raw_body)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok((id,)) => Some(id),
            Err(e) => {
                tracing::error!(
                    gateway = %kind,
                    error = %e,
                    "Failed to write webhook audit record"
                );
                None
            }
        }
    }

    async fn audit_outcome(&self, audit_id: Option<Uuid>, outcome: &str) {
        let Some(id) = audit_id else { return };
        if let Err(e) = sqlx::query("UPDATE webhook_audit SET outcome = $2 WHERE id = $1")
            .bind(id)
            .bind(outcome)
            .execute(&self.pool)
            .await
        {
            tracing::warn!(audit_id = %id, error = %e, "Failed to update webhook audit outcome");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn test_extension_from_future_expiry_compounds() {
        // expiry five days out: new expiry = old expiry + cycle
        let new = extend_expiry(date!(2025 - 06 - 15), date!(2025 - 06 - 10), 30);
        assert_eq!(new, date!(2025 - 07 - 15));
    }

    #[test]
    fn test_extension_from_lapsed_expiry_restarts_today() {
        // expiry five days ago: new expiry = today + cycle
        let new = extend_expiry(date!(2025 - 06 - 05), date!(2025 - 06 - 10), 30);
        assert_eq!(new, date!(2025 - 07 - 10));
    }

    #[test]
    fn test_extension_on_expiry_day() {
        let new = extend_expiry(date!(2025 - 06 - 10), date!(2025 - 06 - 10), 30);
        assert_eq!(new, date!(2025 - 07 - 10));
    }
}
