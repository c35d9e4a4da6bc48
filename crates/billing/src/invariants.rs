//! Billing invariants
//!
//! Runnable consistency checks for the service/invoice/payment state
//! machine. Checks only read, never write, and each violation carries
//! enough context to debug. Run after webhook bursts or manual
//! remediation, and daily from the worker.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// A single invariant violation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Affected rows
    pub ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Subscribers may be cut off or billed incorrectly
    Critical,
    /// Data inconsistency that needs attention
    High,
    /// Potential issue, should investigate
    Medium,
    /// Minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of one full invariant run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct ServiceStateRow {
    id: Uuid,
    status: String,
}

#[derive(Debug, sqlx::FromRow)]
struct PaidInvoiceRow {
    id: Uuid,
    service_id: Uuid,
}

#[derive(Debug, sqlx::FromRow)]
struct DuplicatePaymentRow {
    gateway: String,
    transaction_id: String,
    payment_count: i64,
}

pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return the summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_isolated_has_timestamp().await?);
        violations.extend(self.check_active_has_no_timestamp().await?);
        violations.extend(self.check_provisioned_has_router_user().await?);
        violations.extend(self.check_unprovisioned_has_no_router_user().await?);
        violations.extend(self.check_paid_invoice_has_payment().await?);
        violations.extend(self.check_unique_payment_key().await?);

        let checks_run = 6;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: isolated services carry an isolation timestamp
    async fn check_isolated_has_timestamp(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<ServiceStateRow> = sqlx::query_as(
            "SELECT id, status FROM services WHERE status = 'isolated' AND isolated_at IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "isolated_has_timestamp".to_string(),
                ids: vec![row.id],
                description: "Isolated service has no isolation timestamp".to_string(),
                context: serde_json::json!({ "status": row.status }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 2: only isolated services carry an isolation timestamp
    async fn check_active_has_no_timestamp(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<ServiceStateRow> = sqlx::query_as(
            "SELECT id, status FROM services WHERE status != 'isolated' AND isolated_at IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "only_isolated_has_timestamp".to_string(),
                ids: vec![row.id],
                description: format!(
                    "Service in state '{}' still carries an isolation timestamp",
                    row.status
                ),
                context: serde_json::json!({ "status": row.status }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 3: active/isolated services hold a router user id.
    /// Without it, isolation and restoration silently skip the service.
    async fn check_provisioned_has_router_user(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<ServiceStateRow> = sqlx::query_as(
            r#"
            SELECT id, status FROM services
            WHERE status IN ('active', 'isolated') AND mikrotik_user_id IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "provisioned_has_router_user".to_string(),
                ids: vec![row.id],
                description: format!(
                    "Service in state '{}' has no router user id; payment enforcement cannot reach it",
                    row.status
                ),
                context: serde_json::json!({ "status": row.status }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 4: pending/failed/terminated services hold no router user id
    async fn check_unprovisioned_has_no_router_user(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<ServiceStateRow> = sqlx::query_as(
            r#"
            SELECT id, status FROM services
            WHERE status IN ('pending', 'provisioning_failed', 'terminated')
              AND mikrotik_user_id IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "unprovisioned_has_no_router_user".to_string(),
                ids: vec![row.id],
                description: format!(
                    "Service in state '{}' still holds a router user id",
                    row.status
                ),
                context: serde_json::json!({ "status": row.status }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Invariant 5: every paid invoice links a payment and a paid_at
    async fn check_paid_invoice_has_payment(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<PaidInvoiceRow> = sqlx::query_as(
            r#"
            SELECT i.id, i.service_id
            FROM invoices i
            WHERE i.status = 'paid'
              AND (i.paid_at IS NULL
                   OR i.payment_id IS NULL
                   OR NOT EXISTS (SELECT 1 FROM payments p WHERE p.invoice_id = i.id))
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "paid_invoice_has_payment".to_string(),
                ids: vec![row.id],
                description: "Paid invoice has no linked payment record".to_string(),
                context: serde_json::json!({ "service_id": row.service_id }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 6: one payment per (gateway, transaction_id).
    /// The unique constraint should make this impossible; a violation
    /// means the constraint was dropped or bypassed.
    async fn check_unique_payment_key(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<DuplicatePaymentRow> = sqlx::query_as(
            r#"
            SELECT gateway, transaction_id, COUNT(*) as payment_count
            FROM payments
            GROUP BY gateway, transaction_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "unique_payment_key".to_string(),
                ids: vec![],
                description: format!(
                    "Gateway '{}' transaction '{}' has {} payment rows (expected 1)",
                    row.gateway, row.transaction_id, row.payment_count
                ),
                context: serde_json::json!({
                    "gateway": row.gateway,
                    "transaction_id": row.transaction_id,
                    "payment_count": row.payment_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "isolated_has_timestamp" => self.check_isolated_has_timestamp().await,
            "only_isolated_has_timestamp" => self.check_active_has_no_timestamp().await,
            "provisioned_has_router_user" => self.check_provisioned_has_router_user().await,
            "unprovisioned_has_no_router_user" => {
                self.check_unprovisioned_has_no_router_user().await
            }
            "paid_invoice_has_payment" => self.check_paid_invoice_has_payment().await,
            "unique_payment_key" => self.check_unique_payment_key().await,
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "isolated_has_timestamp",
            "only_isolated_has_timestamp",
            "provisioned_has_router_user",
            "unprovisioned_has_no_router_user",
            "paid_invoice_has_payment",
            "unique_payment_key",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 6);
        assert!(checks.contains(&"isolated_has_timestamp"));
        assert!(checks.contains(&"unique_payment_key"));
    }
}
