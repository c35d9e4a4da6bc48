//! Invoice generation
//!
//! The daily billing run creates one invoice per due service. The amount
//! is a snapshot of the package price at generation time; later price
//! changes never touch issued invoices. Services with an open unpaid
//! invoice are skipped, which makes the run idempotent within a day and
//! keeps a non-paying subscriber at a single outstanding invoice.

use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use time::{Date, Duration};
use uuid::Uuid;

use netbill_shared::{BillingConfig, NotificationChannel};

use crate::error::BillingResult;
use crate::gateway::GatewayRegistry;
use crate::models::{today_utc, Invoice};
use crate::notify::NotificationQueue;

/// Outcome of one billing run
#[derive(Debug, Default, serde::Serialize)]
pub struct BillingRunSummary {
    pub due_services: usize,
    pub generated: usize,
    pub failed: usize,
    pub invoice_ids: Vec<Uuid>,
}

#[derive(Debug, FromRow)]
struct DueServiceRow {
    id: Uuid,
    package_price: Option<i64>,
    customer_phone: Option<String>,
    customer_name: Option<String>,
}

pub struct BillingEngine {
    pool: PgPool,
    gateways: Arc<GatewayRegistry>,
    notifications: NotificationQueue,
    config: BillingConfig,
}

impl BillingEngine {
    pub fn new(pool: PgPool, gateways: Arc<GatewayRegistry>, config: BillingConfig) -> Self {
        let notifications = NotificationQueue::new(pool.clone());
        Self {
            pool,
            gateways,
            notifications,
            config,
        }
    }

    /// Due date for an invoice issued today
    pub fn due_date(invoice_date: Date, cycle_days: i64) -> Date {
        invoice_date + Duration::days(cycle_days)
    }

    /// Generate invoices for every active service whose expiry has been
    /// reached. One bad row never aborts the batch: per-service failures
    /// are logged and counted, and the run continues.
    pub async fn generate_invoices_for_due_services(&self) -> BillingResult<BillingRunSummary> {
        let today = today_utc();

        let due: Vec<DueServiceRow> = sqlx::query_as(
            r#"
            SELECT s.id,
                   p.price AS package_price,
                   c.phone AS customer_phone,
                   c.name AS customer_name
            FROM services s
            LEFT JOIN packages p ON p.id = s.package_id
            LEFT JOIN customers c ON c.id = s.customer_id
            WHERE s.status = 'active'
              AND s.expiry_date <= $1
              AND NOT EXISTS (
                  SELECT 1 FROM invoices i
                  WHERE i.service_id = s.id AND i.status = 'unpaid'
              )
            ORDER BY s.expiry_date
            "#,
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await?;

        let mut summary = BillingRunSummary {
            due_services: due.len(),
            ..Default::default()
        };

        for row in due {
            match self.generate_one(&row, today).await {
                Ok(invoice) => {
                    summary.generated += 1;
                    summary.invoice_ids.push(invoice.id);
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(
                        service_id = %row.id,
                        error = %e,
                        "Failed to generate invoice for service"
                    );
                }
            }
        }

        tracing::info!(
            due_services = summary.due_services,
            generated = summary.generated,
            failed = summary.failed,
            "Billing run complete"
        );

        Ok(summary)
    }

    async fn generate_one(&self, row: &DueServiceRow, today: Date) -> BillingResult<Invoice> {
        let amount = row.package_price.ok_or_else(|| {
            crate::error::BillingError::NotFound(format!(
                "service {} has no package reference",
                row.id
            ))
        })?;

        let due_date = Self::due_date(today, self.config.cycle_days);

        let invoice: Invoice = sqlx::query_as(
            r#"
            INSERT INTO invoices (service_id, amount, status, invoice_date, due_date)
            VALUES ($1, $2, 'unpaid', $3, $4)
            RETURNING *
            "#,
        )
        .bind(row.id)
        .bind(amount)
        .bind(today)
        .bind(due_date)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            invoice_id = %invoice.id,
            service_id = %row.id,
            amount = amount,
            due_date = %due_date,
            "Invoice generated"
        );

        // Best effort from here on: a gateway or notification hiccup must
        // not undo an issued invoice.
        match self
            .gateways
            .default_adapter()
            .create_payment_link(&invoice)
            .await
        {
            Ok(link) => {
                if let Err(e) =
                    sqlx::query("UPDATE invoices SET payment_link = $2 WHERE id = $1")
                        .bind(invoice.id)
                        .bind(&link)
                        .execute(&self.pool)
                        .await
                {
                    tracing::warn!(invoice_id = %invoice.id, error = %e, "Failed to store payment link");
                }
            }
            Err(e) => {
                tracing::warn!(
                    invoice_id = %invoice.id,
                    error = %e,
                    "Failed to create payment link, invoice issued without one"
                );
            }
        }

        if let Some(phone) = row.customer_phone.as_deref().filter(|p| !p.is_empty()) {
            let name = row.customer_name.as_deref().unwrap_or("Pelanggan");
            let body = format!(
                "Halo {}, tagihan internet Anda sebesar Rp{} telah terbit. Jatuh tempo {}.",
                name, amount, due_date
            );
            if let Err(e) = self
                .notifications
                .enqueue(NotificationChannel::Whatsapp, phone, None, &body)
                .await
            {
                tracing::warn!(invoice_id = %invoice.id, error = %e, "Failed to enqueue invoice notification");
            }
        }

        Ok(invoice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn test_due_date_is_invoice_date_plus_cycle() {
        assert_eq!(
            BillingEngine::due_date(date!(2025 - 03 - 01), 30),
            date!(2025 - 03 - 31)
        );
        assert_eq!(
            BillingEngine::due_date(date!(2025 - 12 - 15), 30),
            date!(2026 - 01 - 14)
        );
    }

    #[test]
    fn test_due_date_with_custom_cycle() {
        assert_eq!(
            BillingEngine::due_date(date!(2025 - 03 - 01), 7),
            date!(2025 - 03 - 08)
        );
    }
}
