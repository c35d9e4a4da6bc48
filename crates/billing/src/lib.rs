// Billing crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::too_many_arguments)] // Provisioning flows take several reference ids
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! NetBill Billing Module
//!
//! The billing-and-service-lifecycle core for the subscriber platform.
//!
//! ## Features
//!
//! - **Invoice Generation**: daily billing run over due services
//! - **Isolation**: overdue detection, router-profile throttling, and
//!   restoration on payment
//! - **Provisioning**: credential generation and PPPoE user creation
//! - **Webhooks**: idempotent payment-gateway notification processing
//! - **Job Queue**: retryable units of work with per-kind backoff
//! - **Notifications**: WhatsApp/email delivery with rate-limited batches
//! - **Invariants**: runnable consistency checks over the state machine

pub mod error;
pub mod gateway;
pub mod invariants;
pub mod invoices;
pub mod isolation;
pub mod jobs;
pub mod models;
pub mod notify;
pub mod provisioning;
pub mod retry;
pub mod router;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Error
pub use error::{BillingError, BillingResult};

// Gateway
pub use gateway::{
    GatewayKind, GatewayRegistry, GatewayTxStatus, InboundWebhook, MidtransAdapter,
    NormalizedWebhook, PaymentGatewayAdapter, TripayAdapter, XenditAdapter,
};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Invoices
pub use invoices::{BillingEngine, BillingRunSummary};

// Isolation
pub use isolation::{IsolationEngine, IsolationOutcome, OverdueService, ProfileResolver};

// Jobs
pub use jobs::JobQueue;

// Models
pub use models::{Invoice, Package, Payment, QueuedNotification, Router, Service, ServiceJob};

// Notifications
pub use notify::{BulkSendResult, HttpNotificationSender, NotificationQueue, NotificationSender};

// Provisioning
pub use provisioning::{Credentials, ProvisioningEngine, ProvisioningOutcome};

// Retry
pub use retry::RetryPolicy;

// Router
pub use router::{MikrotikRestClient, RouterConnectionPool, RouterControlClient};

// Webhooks
pub use webhooks::{PaymentWebhookProcessor, WebhookOutcome};

use std::sync::Arc;

use netbill_shared::{BillingConfig, SecretCipher};
use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub billing: BillingEngine,
    pub isolation: IsolationEngine,
    pub provisioning: ProvisioningEngine,
    pub webhooks: PaymentWebhookProcessor,
    pub jobs: JobQueue,
    pub notifications: NotificationQueue,
    pub invariants: InvariantChecker,
    pub sender: Arc<dyn NotificationSender>,
    pub router_pool: Arc<RouterConnectionPool>,
    pub gateways: Arc<GatewayRegistry>,
}

impl BillingService {
    /// Create a billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let config = BillingConfig::from_env();
        let cipher = SecretCipher::from_env()?;
        let gateways = Arc::new(GatewayRegistry::from_env());
        let sender = Arc::new(HttpNotificationSender::from_env(config.clone()));
        Self::new(pool, config, cipher, gateways, sender)
    }

    /// Create a billing service with explicit collaborators
    pub fn new(
        pool: PgPool,
        config: BillingConfig,
        cipher: SecretCipher,
        gateways: Arc<GatewayRegistry>,
        sender: Arc<dyn NotificationSender>,
    ) -> BillingResult<Self> {
        let router_pool = Arc::new(RouterConnectionPool::from_config(&config));
        let router_client: Arc<dyn RouterControlClient> = Arc::new(MikrotikRestClient::new(
            &config,
            cipher.clone(),
            Arc::clone(&router_pool),
        )?);

        Ok(Self {
            billing: BillingEngine::new(pool.clone(), Arc::clone(&gateways), config.clone()),
            isolation: IsolationEngine::new(
                pool.clone(),
                Arc::clone(&router_client),
                config.clone(),
            ),
            provisioning: ProvisioningEngine::new(
                pool.clone(),
                Arc::clone(&router_client),
                cipher,
                config.clone(),
            ),
            webhooks: PaymentWebhookProcessor::new(pool.clone(), Arc::clone(&gateways), config),
            jobs: JobQueue::new(pool.clone()),
            notifications: NotificationQueue::new(pool.clone()),
            invariants: InvariantChecker::new(pool),
            sender,
            router_pool,
            gateways,
        })
    }
}
