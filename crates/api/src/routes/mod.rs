//! Route table

mod admin;
mod webhooks;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/payment/{gateway}", post(webhooks::handle_payment_webhook))
        .route("/admin/services", post(admin::provision_service))
        .route("/admin/services/{id}/isolate", post(admin::isolate_service))
        .route("/admin/services/{id}/restore", post(admin::restore_service))
        .route(
            "/admin/services/{id}/retry-provisioning",
            post(admin::retry_provisioning),
        )
        .route("/admin/services/{id}/terminate", post(admin::terminate_service))
        .route("/admin/billing/run", post(admin::run_billing))
        .route("/admin/jobs/dead", get(admin::list_dead_jobs))
        .route("/admin/invariants", get(admin::run_invariants))
        .route("/admin/webhooks", get(admin::list_webhook_audit))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
