#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! NetBill Shared Module
//!
//! Types and infrastructure shared between the API server, the billing
//! crate, and the background worker:
//!
//! - **Status enums**: service, invoice, payment, job, and notification
//!   lifecycle states
//! - **Config**: billing/runtime configuration loaded from the environment
//! - **Database**: connection pool construction and embedded migrations
//! - **Crypto**: reversible cipher for PPPoE credentials at rest

pub mod config;
pub mod crypto;
pub mod types;

pub use config::BillingConfig;
pub use crypto::{CipherError, SecretCipher};
pub use types::{
    InvoiceStatus, JobKind, JobStatus, NotificationChannel, NotificationStatus, ServiceStatus,
};

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Create the application database pool
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Create a pool for running migrations (longer timeouts, single connection)
pub async fn create_migration_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Run embedded migrations against the given pool
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}
