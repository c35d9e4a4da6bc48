//! Service provisioning
//!
//! Creates service records with generated PPPoE credentials and pushes
//! them to the router. The credential password is returned exactly once in
//! plaintext (for delivery to the customer) and stored encrypted; it is
//! not re-derivable afterwards.
//!
//! Provisioning failure is recoverable: the service row persists in
//! `provisioning_failed` and can be re-driven, so an approval is never
//! rolled back because a router was unreachable.

use std::sync::Arc;

use rand::Rng;
use sqlx::PgPool;
use time::Date;
use uuid::Uuid;

use netbill_shared::{BillingConfig, SecretCipher, ServiceStatus};

use crate::error::{BillingError, BillingResult};
use crate::isolation::ProfileResolver;
use crate::models::{today_utc, Package, Router, Service};
use crate::router::RouterControlClient;

const USERNAME_SUFFIX_LEN: usize = 6;
const USERNAME_MAX_ATTEMPTS: usize = 10;
const PASSWORD_LEN: usize = 12;

const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"!@#$%^&*-_";

/// One-time plaintext credentials, shown to the operator exactly once
#[derive(Debug, Clone, serde::Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Result of a full provisioning flow
#[derive(Debug, serde::Serialize)]
pub struct ProvisioningOutcome {
    pub service: Service,
    /// False when the router rejected the user; the service row persists
    /// as `provisioning_failed` and can be retried
    pub provisioned: bool,
    pub credentials: Credentials,
}

pub struct ProvisioningEngine {
    pool: PgPool,
    router_client: Arc<dyn RouterControlClient>,
    cipher: SecretCipher,
    config: BillingConfig,
}

impl ProvisioningEngine {
    pub fn new(
        pool: PgPool,
        router_client: Arc<dyn RouterControlClient>,
        cipher: SecretCipher,
        config: BillingConfig,
    ) -> Self {
        Self {
            pool,
            router_client,
            cipher,
            config,
        }
    }

    fn build_username(date: Date, suffix: &str) -> String {
        format!(
            "pppoe_{:04}{:02}{:02}_{}",
            date.year(),
            date.month() as u8,
            date.day(),
            suffix
        )
    }

    fn random_suffix<R: Rng>(rng: &mut R) -> String {
        const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
        (0..USERNAME_SUFFIX_LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect()
    }

    /// 12 characters with at least one of each class; the remainder is
    /// uniform over the combined alphabet and the final order is shuffled
    /// so classes never sit at fixed positions.
    fn generate_password<R: Rng>(rng: &mut R) -> String {
        let mut bytes = vec![
            UPPER[rng.gen_range(0..UPPER.len())],
            LOWER[rng.gen_range(0..LOWER.len())],
            DIGITS[rng.gen_range(0..DIGITS.len())],
            SYMBOLS[rng.gen_range(0..SYMBOLS.len())],
        ];

        let combined: Vec<u8> = [UPPER, LOWER, DIGITS, SYMBOLS].concat();
        while bytes.len() < PASSWORD_LEN {
            bytes.push(combined[rng.gen_range(0..combined.len())]);
        }

        // Fisher-Yates; rand's shuffle would pull in the seq trait for one call
        for i in (1..bytes.len()).rev() {
            let j = rng.gen_range(0..=i);
            bytes.swap(i, j);
        }

        bytes.into_iter().map(|b| b as char).collect()
    }

    /// Generate a unique credential pair, retrying the username a bounded
    /// number of times on collision.
    pub async fn generate_credentials(&self) -> BillingResult<Credentials> {
        let mut rng = rand::thread_rng();
        let today = today_utc();
        let password = Self::generate_password(&mut rng);

        for _ in 0..USERNAME_MAX_ATTEMPTS {
            let username = Self::build_username(today, &Self::random_suffix(&mut rng));

            let (exists,): (bool,) = sqlx::query_as(
                "SELECT EXISTS(SELECT 1 FROM services WHERE pppoe_username = $1)",
            )
            .bind(&username)
            .fetch_one(&self.pool)
            .await?;

            if !exists {
                return Ok(Credentials { username, password });
            }

            tracing::debug!(username = %username, "PPPoE username collision, regenerating");
        }

        Err(BillingError::CredentialCollision(USERNAME_MAX_ATTEMPTS))
    }

    /// Insert the service row in `pending` with encrypted credentials.
    /// The first cycle's expiry starts today.
    pub async fn create_service(
        &self,
        customer_id: Uuid,
        package_id: Uuid,
        router_id: Uuid,
        credentials: &Credentials,
    ) -> BillingResult<Service> {
        let password_enc = self.cipher.encrypt(&credentials.password)?;
        let expiry = today_utc() + time::Duration::days(self.config.cycle_days);

        let service: Service = sqlx::query_as(
            r#"
            INSERT INTO services
                (customer_id, package_id, router_id, pppoe_username, pppoe_password_enc,
                 status, activation_date, expiry_date)
            VALUES ($1, $2, $3, $4, $5, 'pending', NOW(), $6)
            RETURNING *
            "#,
        )
        .bind(customer_id)
        .bind(package_id)
        .bind(router_id)
        .bind(&credentials.username)
        .bind(&password_enc)
        .bind(expiry)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            service_id = %service.id,
            customer_id = %customer_id,
            pppoe_username = %credentials.username,
            expiry_date = %expiry,
            "Service created"
        );

        Ok(service)
    }

    /// Push the PPPoE secret to the router. On success the service becomes
    /// active and stores the router-assigned user id; on any failure it is
    /// marked `provisioning_failed` and `Ok(false)` is returned.
    pub async fn provision_to_router(&self, service: &Service) -> BillingResult<bool> {
        let router = self.get_router(service.router_id).await?.ok_or_else(|| {
            BillingError::NotFound(format!("router {} for service", service.router_id))
        })?;
        let package = self.get_package(service.package_id).await?.ok_or_else(|| {
            BillingError::NotFound(format!("package {} for service", service.package_id))
        })?;

        let resolver = ProfileResolver::PackageDerived {
            prefix: &self.config.profile_prefix,
        };
        let profile = resolver.resolve(&package);
        let password = self.cipher.decrypt(&service.pppoe_password_enc)?;

        match self
            .router_client
            .create_user(&router, &service.pppoe_username, &password, &profile)
            .await
        {
            Ok(mikrotik_user_id) => {
                sqlx::query(
                    r#"
                    UPDATE services
                    SET mikrotik_user_id = $2, status = 'active', updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(service.id)
                .bind(&mikrotik_user_id)
                .execute(&self.pool)
                .await?;

                tracing::info!(
                    service_id = %service.id,
                    router = %router.name,
                    profile = %profile,
                    "Service provisioned"
                );
                Ok(true)
            }
            Err(e) => {
                sqlx::query(
                    "UPDATE services SET status = 'provisioning_failed', updated_at = NOW() WHERE id = $1",
                )
                .bind(service.id)
                .execute(&self.pool)
                .await?;

                tracing::error!(
                    service_id = %service.id,
                    router = %router.name,
                    error = %e,
                    "Provisioning failed, service marked for manual retry"
                );
                Ok(false)
            }
        }
    }

    /// Full flow: credentials, service row, router push. The plaintext
    /// credentials in the outcome are the only copy that will ever exist.
    pub async fn provision_service(
        &self,
        customer_id: Uuid,
        package_id: Uuid,
        router_id: Uuid,
    ) -> BillingResult<ProvisioningOutcome> {
        let credentials = self.generate_credentials().await?;
        let service = self
            .create_service(customer_id, package_id, router_id, &credentials)
            .await?;
        let provisioned = self.provision_to_router(&service).await?;

        let service = self
            .get_service(service.id)
            .await?
            .ok_or_else(|| BillingError::Internal("service vanished mid-provisioning".into()))?;

        Ok(ProvisioningOutcome {
            service,
            provisioned,
            credentials,
        })
    }

    /// Re-drive the router push for a service whose first attempt failed
    pub async fn retry_provisioning(&self, service_id: Uuid) -> BillingResult<bool> {
        let service = self
            .get_service(service_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("service {}", service_id)))?;

        let retryable = service.status == ServiceStatus::ProvisioningFailed.as_str()
            || service.status == ServiceStatus::Pending.as_str();
        if !retryable {
            tracing::warn!(
                service_id = %service_id,
                status = %service.status,
                "Service not in a retryable provisioning state"
            );
            return Ok(false);
        }

        self.provision_to_router(&service).await
    }

    /// Logical delete: the PPPoE secret is removed from the router but the
    /// service row (and its financial history) is kept as `terminated`.
    pub async fn terminate_service(&self, service_id: Uuid) -> BillingResult<bool> {
        let service = self
            .get_service(service_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("service {}", service_id)))?;

        if service.status == ServiceStatus::Terminated.as_str() {
            return Ok(true);
        }

        if let Some(user_id) = &service.mikrotik_user_id {
            let router = self.get_router(service.router_id).await?.ok_or_else(|| {
                BillingError::NotFound(format!("router {} for service", service.router_id))
            })?;

            if let Err(e) = self.router_client.delete_user(&router, user_id).await {
                tracing::error!(
                    service_id = %service_id,
                    router = %router.name,
                    mikrotik_user_id = %user_id,
                    error = %e,
                    "Failed to delete PPPoE secret, termination aborted"
                );
                return Ok(false);
            }
        }

        sqlx::query(
            r#"
            UPDATE services
            SET status = 'terminated', mikrotik_user_id = NULL, isolated_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(service_id)
        .execute(&self.pool)
        .await?;

        tracing::info!(service_id = %service_id, "Service terminated");
        Ok(true)
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

    #[test]
    fn test_username_shape() {
        let name = ProvisioningEngine::build_username(date!(2025 - 07 - 09), "A1B2C3");
        assert_eq!(name, "pppoe_20250709_A1B2C3");
    }

    #[test]
    fn test_suffix_charset_and_length() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let suffix = ProvisioningEngine::random_suffix(&mut rng);
            assert_eq!(suffix.len(), USERNAME_SUFFIX_LEN);
            assert!(suffix
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_password_guarantees_all_classes() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let password = ProvisioningEngine::generate_password(&mut rng);
            assert_eq!(password.len(), PASSWORD_LEN);
            assert!(password.chars().any(|c| c.is_ascii_uppercase()));
            assert!(password.chars().any(|c| c.is_ascii_lowercase()));
            assert!(password.chars().any(|c| c.is_ascii_digit()));
            assert!(password.bytes().any(|b| SYMBOLS.contains(&b)));
        }
    }

    #[test]
    fn test_password_classes_not_at_fixed_positions() {
        // With shuffling, the first character cannot always be uppercase.
        let mut rng = rand::thread_rng();
        let mut first_chars: Vec<char> = Vec::new();
        for _ in 0..200 {
            let password = ProvisioningEngine::generate_password(&mut rng);
            first_chars.push(password.chars().next().unwrap());
        }
        assert!(
            !first_chars.iter().all(|c| c.is_ascii_uppercase()),
            "shuffle must break the fixed class layout"
        );
    }
}
