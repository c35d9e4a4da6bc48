//! Row types for the billing core
//!
//! Status columns are TEXT; the enums in `netbill_shared::types` provide
//! the canonical names. Row structs derive `FromRow` for runtime
//! `query_as` fetches.

use serde::Serialize;
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

/// A customer's provisioned connection
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Service {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub package_id: Uuid,
    pub router_id: Uuid,
    pub pppoe_username: String,
    /// AES-256-GCM ciphertext; never exposed through the API
    #[serde(skip_serializing)]
    pub pppoe_password_enc: String,
    pub mikrotik_user_id: Option<String>,
    pub status: String,
    pub activation_date: OffsetDateTime,
    pub expiry_date: Date,
    pub isolated_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// One billing-cycle charge against a service
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub service_id: Uuid,
    pub amount: i64,
    pub status: String,
    pub invoice_date: Date,
    pub due_date: Date,
    pub paid_at: Option<OffsetDateTime>,
    pub payment_id: Option<Uuid>,
    pub payment_link: Option<String>,
    pub created_at: OffsetDateTime,
}

/// An applied, successful gateway transaction; immutable once written
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub gateway: String,
    pub transaction_id: String,
    pub amount: i64,
    pub status: String,
    pub metadata: serde_json::Value,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Package {
    pub id: Uuid,
    pub name: String,
    pub price: i64,
    pub mikrotik_profile: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Router {
    pub id: Uuid,
    pub name: String,
    pub base_url: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_enc: String,
}

/// A queued retryable unit of work against a service
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ServiceJob {
    pub id: Uuid,
    pub kind: String,
    pub service_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub status: String,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub next_run_at: OffsetDateTime,
    pub last_error: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// A queued outbound notification
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct QueuedNotification {
    pub id: Uuid,
    pub channel: String,
    pub recipient: String,
    pub subject: Option<String>,
    pub body: String,
    pub status: String,
    pub attempt_count: i32,
    pub next_run_at: OffsetDateTime,
    pub last_error: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Today's date in UTC; all billing-date arithmetic anchors here
pub fn today_utc() -> Date {
    OffsetDateTime::now_utc().date()
}
