//! Administrative service operations
//!
//! Installation approval (provision), manual isolation/restoration,
//! billing-run trigger, invariant checks, and the webhook audit trail.
//! A provisioning failure during approval is reported as a warning, not a
//! hard error: the service row exists and can be retried.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use netbill_billing::IsolationOutcome;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ProvisionRequest {
    pub customer_id: Uuid,
    pub package_id: Uuid,
    pub router_id: Uuid,
}

pub async fn provision_service(
    State(state): State<AppState>,
    Json(request): Json<ProvisionRequest>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state
        .billing
        .provisioning
        .provision_service(request.customer_id, request.package_id, request.router_id)
        .await?;

    let message = if outcome.provisioned {
        "service provisioned and active".to_string()
    } else {
        // Warning, not error: the approval stands, the router push can be retried
        "service created but router provisioning failed; retry manually".to_string()
    };

    Ok(Json(json!({
        "success": true,
        "message": message,
        "warning": !outcome.provisioned,
        "service": outcome.service,
        "credentials": outcome.credentials,
    })))
}

fn isolation_response(outcome: IsolationOutcome, applied_message: &str) -> Result<Json<Value>, ApiError> {
    match outcome {
        IsolationOutcome::Applied => Ok(Json(json!({
            "success": true,
            "message": applied_message,
        }))),
        IsolationOutcome::Skipped(reason) => Ok(Json(json!({
            "success": false,
            "message": format!("skipped: {}", reason),
        }))),
        IsolationOutcome::RouterFailed(reason) => Err(ApiError {
            status: StatusCode::BAD_GATEWAY,
            message: format!("router call failed: {}", reason),
        }),
    }
}

pub async fn isolate_service(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    // Attach the oldest unpaid invoice when there is one; manual isolation
    // is permitted either way
    let invoice: Option<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT id FROM invoices
        WHERE service_id = $1 AND status = 'unpaid'
        ORDER BY due_date ASC
        LIMIT 1
        "#,
    )
    .bind(id)
    .fetch_optional(&state.pool)
    .await?;

    let outcome = state
        .billing
        .isolation
        .isolate_service(id, invoice.map(|(id,)| id))
        .await?;

    isolation_response(outcome, "service isolated")
}

pub async fn restore_service(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state.billing.isolation.restore_service(id).await?;
    isolation_response(outcome, "service restored")
}

pub async fn retry_provisioning(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let provisioned = state.billing.provisioning.retry_provisioning(id).await?;

    Ok(Json(json!({
        "success": provisioned,
        "message": if provisioned {
            "service provisioned and active"
        } else {
            "provisioning failed again; see logs"
        },
    })))
}

pub async fn terminate_service(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let terminated = state.billing.provisioning.terminate_service(id).await?;

    Ok(Json(json!({
        "success": terminated,
        "message": if terminated {
            "service terminated"
        } else {
            "router user removal failed; termination aborted"
        },
    })))
}

pub async fn run_billing(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let summary = state
        .billing
        .billing
        .generate_invoices_for_due_services()
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": format!(
            "billing run complete: {} generated, {} failed of {} due",
            summary.generated, summary.failed, summary.due_services
        ),
        "summary": summary,
    })))
}

/// Jobs that exhausted their retry budget and await manual remediation
pub async fn list_dead_jobs(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let jobs = state.billing.jobs.list_dead(100).await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("{} dead job(s)", jobs.len()),
        "jobs": jobs,
    })))
}

pub async fn run_invariants(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let summary = state.billing.invariants.run_all_checks().await?;

    Ok(Json(json!({
        "success": summary.healthy,
        "message": if summary.healthy {
            "all invariants hold".to_string()
        } else {
            format!("{} invariant check(s) failing", summary.checks_failed)
        },
        "summary": summary,
    })))
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, FromRow, serde::Serialize)]
pub struct WebhookAuditRow {
    pub id: Uuid,
    pub gateway: String,
    pub source_ip: Option<String>,
    pub outcome: Option<String>,
    pub received_at: OffsetDateTime,
}

pub async fn list_webhook_audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Value>, ApiError> {
    let rows: Vec<WebhookAuditRow> = sqlx::query_as(
        r#"
        SELECT id, gateway, source_ip, outcome, received_at
        FROM webhook_audit
        ORDER BY received_at DESC
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(query.limit.clamp(1, 500))
    .bind(query.offset.max(0))
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("{} audit records", rows.len()),
        "records": rows,
    })))
}
