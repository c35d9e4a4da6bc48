//! Overdue detection and service isolation/restoration
//!
//! State machine per service: `active --(overdue invoice)--> isolated
//! --(payment received)--> active`. Isolation throttles the subscriber's
//! router profile; it never touches the PPPoE secret itself, so the change
//! is fully reversible.
//!
//! Both directions run through one routine parameterized by a
//! [`ProfileResolver`]: a fixed isolation profile on the way down, the
//! package-derived profile on the way up. The overdue scan and the
//! per-service action are separate phases, so the action re-reads the
//! service and mutates conditionally; a payment landing between scan and
//! action wins.

use std::sync::Arc;

use sqlx::{FromRow, PgPool};
use time::{Date, Duration};
use uuid::Uuid;

use netbill_shared::{BillingConfig, NotificationChannel, ServiceStatus};

use crate::error::BillingResult;
use crate::models::{today_utc, Package, Router, Service};
use crate::notify::NotificationQueue;
use crate::router::RouterControlClient;

/// How the target router profile is derived
#[derive(Debug, Clone, Copy)]
pub enum ProfileResolver<'a> {
    /// A fixed profile name (the isolation profile)
    Fixed(&'a str),
    /// The package's explicit profile override when set, otherwise
    /// `{prefix}{package name}` with spaces collapsed to underscores
    PackageDerived { prefix: &'a str },
}

impl ProfileResolver<'_> {
    pub fn resolve(&self, package: &Package) -> String {
        match self {
            ProfileResolver::Fixed(name) => (*name).to_string(),
            ProfileResolver::PackageDerived { prefix } => match &package.mikrotik_profile {
                Some(explicit) => explicit.clone(),
                None => format!("{}{}", prefix, package.name.replace(' ', "_")),
            },
        }
    }
}

/// Result of one isolate/restore attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IsolationOutcome {
    /// Router updated and state transitioned
    Applied,
    /// Preconditions not met or the service was no longer eligible; a
    /// routine data-quality condition, not a failure worth retrying
    Skipped(String),
    /// The router call failed after the client's inner retries; the job
    /// layer decides whether to try the whole attempt again
    RouterFailed(String),
}

impl IsolationOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, IsolationOutcome::Applied)
    }

    /// Whether the attempt should go back on the retry schedule
    pub fn retryable(&self) -> bool {
        matches!(self, IsolationOutcome::RouterFailed(_))
    }
}

/// One service due for isolation, carrying its oldest overdue invoice
#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct OverdueService {
    pub service_id: Uuid,
    pub invoice_id: Uuid,
    pub due_date: Date,
    pub amount: i64,
}

pub struct IsolationEngine {
    pool: PgPool,
    router_client: Arc<dyn RouterControlClient>,
    notifications: NotificationQueue,
    config: BillingConfig,
}

impl IsolationEngine {
    pub fn new(
        pool: PgPool,
        router_client: Arc<dyn RouterControlClient>,
        config: BillingConfig,
    ) -> Self {
        let notifications = NotificationQueue::new(pool.clone());
        Self {
            pool,
            router_client,
            notifications,
            config,
        }
    }

    /// Invoices due strictly before this date trigger isolation
    pub fn overdue_cutoff(today: Date, grace_period_days: i64) -> Date {
        today - Duration::days(grace_period_days)
    }

    /// Active services with an unpaid invoice past the grace period.
    /// Already-isolated services never appear, so a second scan cannot
    /// double-isolate. When a service has several unpaid invoices the
    /// oldest one (by due date) is attached to the action.
    pub async fn check_overdue_services(&self) -> BillingResult<Vec<OverdueService>> {
        let cutoff = Self::overdue_cutoff(today_utc(), self.config.grace_period_days);

        let overdue: Vec<OverdueService> = sqlx::query_as(
            r#"
            SELECT DISTINCT ON (s.id)
                s.id AS service_id,
                i.id AS invoice_id,
                i.due_date,
                i.amount
            FROM invoices i
            JOIN services s ON s.id = i.service_id
            WHERE i.status = 'unpaid'
              AND i.due_date < $1
              AND s.status = 'active'
            ORDER BY s.id, i.due_date ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        tracing::info!(
            cutoff = %cutoff,
            overdue = overdue.len(),
            "Overdue scan complete"
        );

        Ok(overdue)
    }

    /// Throttle an overdue service to the isolation profile.
    ///
    /// The service is re-read here rather than trusted from the scan
    /// snapshot; a payment arriving in between leaves the service alone.
    pub async fn isolate_service(
        &self,
        service_id: Uuid,
        invoice_id: Option<Uuid>,
    ) -> BillingResult<IsolationOutcome> {
        let service = match self.get_service(service_id).await? {
            Some(s) => s,
            None => {
                return Ok(IsolationOutcome::Skipped(format!(
                    "service {} no longer exists",
                    service_id
                )))
            }
        };

        if service.status != ServiceStatus::Active.as_str() {
            tracing::info!(
                service_id = %service_id,
                status = %service.status,
                "Service no longer active, skipping isolation"
            );
            return Ok(IsolationOutcome::Skipped(format!(
                "status is '{}', not active",
                service.status
            )));
        }

        let user_id = match &service.mikrotik_user_id {
            Some(id) => id.clone(),
            None => {
                tracing::warn!(
                    service_id = %service_id,
                    "Service has no router user id, cannot isolate"
                );
                return Ok(IsolationOutcome::Skipped(
                    "missing router user id".to_string(),
                ));
            }
        };

        let router = match self.get_router(service.router_id).await? {
            Some(r) => r,
            None => {
                tracing::warn!(
                    service_id = %service_id,
                    router_id = %service.router_id,
                    "Service references a missing router, cannot isolate"
                );
                return Ok(IsolationOutcome::Skipped("missing router".to_string()));
            }
        };

        let profile = self.config.isolation_profile.clone();
        if let Err(e) = self
            .router_client
            .update_user_profile(&router, &user_id, &profile)
            .await
        {
            tracing::error!(
                service_id = %service_id,
                invoice_id = ?invoice_id,
                router = %router.name,
                mikrotik_user_id = %user_id,
                error = %e,
                "Router call failed during isolation"
            );
            return Ok(IsolationOutcome::RouterFailed(e.to_string()));
        }

        // Conditional transition: only an active service becomes isolated.
        let updated = sqlx::query(
            r#"
            UPDATE services
            SET status = 'isolated', isolated_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(service_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            // Payment raced in between the router call and the update.
            // Put the router profile back so state and router agree.
            tracing::warn!(
                service_id = %service_id,
                "Service changed state mid-isolation, rolling back router profile"
            );
            self.rollback_profile(&service, &router, &user_id).await;
            return Ok(IsolationOutcome::Skipped(
                "state changed mid-isolation".to_string(),
            ));
        }

        tracing::info!(
            service_id = %service_id,
            invoice_id = ?invoice_id,
            profile = %profile,
            "Service isolated"
        );

        self.notify_customer(
            &service,
            "Layanan internet Anda diisolir karena tagihan belum dibayar. \
             Silakan lakukan pembayaran untuk mengaktifkan kembali.",
        )
        .await;

        Ok(IsolationOutcome::Applied)
    }

    /// Return an isolated service to its package profile.
    pub async fn restore_service(&self, service_id: Uuid) -> BillingResult<IsolationOutcome> {
        let service = match self.get_service(service_id).await? {
            Some(s) => s,
            None => {
                return Ok(IsolationOutcome::Skipped(format!(
                    "service {} no longer exists",
                    service_id
                )))
            }
        };

        if service.status != ServiceStatus::Isolated.as_str() {
            tracing::info!(
                service_id = %service_id,
                status = %service.status,
                "Service not isolated, skipping restore"
            );
            return Ok(IsolationOutcome::Skipped(format!(
                "status is '{}', not isolated",
                service.status
            )));
        }

        let user_id = match &service.mikrotik_user_id {
            Some(id) => id.clone(),
            None => {
                tracing::warn!(service_id = %service_id, "Service has no router user id, cannot restore");
                return Ok(IsolationOutcome::Skipped(
                    "missing router user id".to_string(),
                ));
            }
        };

        let router = match self.get_router(service.router_id).await? {
            Some(r) => r,
            None => {
                tracing::warn!(service_id = %service_id, "Service references a missing router, cannot restore");
                return Ok(IsolationOutcome::Skipped("missing router".to_string()));
            }
        };

        let package = match self.get_package(service.package_id).await? {
            Some(p) => p,
            None => {
                tracing::warn!(service_id = %service_id, "Service references a missing package, cannot restore");
                return Ok(IsolationOutcome::Skipped("missing package".to_string()));
            }
        };

        let resolver = ProfileResolver::PackageDerived {
            prefix: &self.config.profile_prefix,
        };
        let profile = resolver.resolve(&package);

        if let Err(e) = self
            .router_client
            .update_user_profile(&router, &user_id, &profile)
            .await
        {
            tracing::error!(
                service_id = %service_id,
                router = %router.name,
                mikrotik_user_id = %user_id,
                profile = %profile,
                error = %e,
                "Router call failed during restoration"
            );
            return Ok(IsolationOutcome::RouterFailed(e.to_string()));
        }

        let updated = sqlx::query(
            r#"
            UPDATE services
            SET status = 'active', isolated_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'isolated'
            "#,
        )
        .bind(service_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            tracing::warn!(
                service_id = %service_id,
                "Service changed state mid-restoration"
            );
            return Ok(IsolationOutcome::Skipped(
                "state changed mid-restoration".to_string(),
            ));
        }

        tracing::info!(
            service_id = %service_id,
            profile = %profile,
            "Service restored"
        );

        self.notify_customer(
            &service,
            "Pembayaran diterima. Layanan internet Anda telah aktif kembali. Terima kasih.",
        )
        .await;

        Ok(IsolationOutcome::Applied)
    }

    /// Best-effort router rollback when the DB transition lost a race
    async fn rollback_profile(&self, service: &Service, router: &Router, user_id: &str) {
        let package = match self.get_package(service.package_id).await {
            Ok(Some(p)) => p,
            _ => {
                tracing::error!(
                    service_id = %service.id,
                    "Cannot roll back router profile: package lookup failed. Manual intervention required."
                );
                return;
            }
        };

        let resolver = ProfileResolver::PackageDerived {
            prefix: &self.config.profile_prefix,
        };
        let profile = resolver.resolve(&package);

        if let Err(e) = self
            .router_client
            .update_user_profile(router, user_id, &profile)
            .await
        {
            tracing::error!(
                service_id = %service.id,
                profile = %profile,
                error = %e,
                "Failed to roll back router profile. Manual intervention required."
            );
        }
    }

    async fn notify_customer(&self, service: &Service, message: &str) {
        let phone: Option<(Option<String>,)> =
            sqlx::query_as("SELECT phone FROM customers WHERE id = $1")
                .bind(service.customer_id)
                .fetch_optional(&self.pool)
                .await
                .unwrap_or(None);

        if let Some((Some(phone),)) = phone {
            if !phone.is_empty() {
                if let Err(e) = self
                    .notifications
                    .enqueue(NotificationChannel::Whatsapp, &phone, None, message)
                    .await
                {
                    tracing::warn!(
                        service_id = %service.id,
                        error = %e,
                        "Failed to enqueue status notification"
                    );
                }
            }
        }
    }

    async fn get_service(&self, id: Uuid) -> BillingResult<Option<Service>> {
        let service = sqlx::query_as("SELECT * FROM services WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(service)
    }

    async fn get_router(&self, id: Uuid) -> BillingResult<Option<Router>> {
        let router = sqlx::query_as(
            "SELECT id, name, base_url, username, password_enc FROM routers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(router)
    }

    async fn get_package(&self, id: Uuid) -> BillingResult<Option<Package>> {
        let package = sqlx::query_as(
            "SELECT id, name, price, mikrotik_profile FROM packages WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(package)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn package(name: &str, profile: Option<&str>) -> Package {
        Package {
            id: Uuid::new_v4(),
            name: name.to_string(),
            price: 150000,
            mikrotik_profile: profile.map(String::from),
        }
    }

    #[test]
    fn test_fixed_resolver_ignores_package() {
        let resolver = ProfileResolver::Fixed("isolir");
        assert_eq!(resolver.resolve(&package("Home 10M", Some("vip"))), "isolir");
    }

    #[test]
    fn test_package_resolver_prefers_override() {
        let resolver = ProfileResolver::PackageDerived { prefix: "ppp_" };
        assert_eq!(
            resolver.resolve(&package("Home 10M", Some("custom-profile"))),
            "custom-profile"
        );
    }

    #[test]
    fn test_package_resolver_derives_from_name() {
        let resolver = ProfileResolver::PackageDerived { prefix: "ppp_" };
        assert_eq!(resolver.resolve(&package("Home 10M", None)), "ppp_Home_10M");

        let no_prefix = ProfileResolver::PackageDerived { prefix: "" };
        assert_eq!(no_prefix.resolve(&package("Gamer Pro 50", None)), "Gamer_Pro_50");
    }

    #[test]
    fn test_overdue_cutoff_window() {
        let today = date!(2025 - 06 - 10);
        let cutoff = IsolationEngine::overdue_cutoff(today, 3);
        assert_eq!(cutoff, date!(2025 - 06 - 07));

        // due five days ago: overdue
        assert!(date!(2025 - 06 - 05) < cutoff);
        // due two days ago: still in grace
        assert!(date!(2025 - 06 - 08) >= cutoff);
        // exactly at the cutoff: still in grace (strict comparison)
        assert!(date!(2025 - 06 - 07) >= cutoff);
    }

    #[test]
    fn test_outcome_classification() {
        assert!(IsolationOutcome::Applied.applied());
        assert!(!IsolationOutcome::Applied.retryable());
        assert!(IsolationOutcome::RouterFailed("timeout".into()).retryable());
        assert!(!IsolationOutcome::Skipped("no user id".into()).retryable());
        assert!(!IsolationOutcome::Skipped("no user id".into()).applied());
    }
}
