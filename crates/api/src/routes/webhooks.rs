//! Payment webhook ingestion
//!
//! `POST /webhooks/payment/{gateway}`: the body is gateway-specific JSON;
//! the response is always the `{success, message}` envelope. Duplicate
//! deliveries and gateway-pending statuses are 200s so providers stop
//! retrying.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use netbill_billing::{GatewayKind, InboundWebhook, WebhookOutcome};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, ApiError> {
    let kind = GatewayKind::from_path(&gateway)
        .ok_or_else(|| ApiError::not_found(format!("unknown payment gateway: {}", gateway)))?;

    // Providers sit behind proxies; prefer the forwarded address when set
    let source_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| peer.ip().to_string());

    let header_map: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();

    let webhook = InboundWebhook {
        raw_body: body,
        headers: header_map,
    };

    let outcome = state
        .billing
        .webhooks
        .process(kind, webhook, Some(&source_ip))
        .await?;

    let message = match outcome {
        WebhookOutcome::Processed { .. } => "payment processed".to_string(),
        WebhookOutcome::AlreadyProcessed => "already processed".to_string(),
        WebhookOutcome::Acknowledged(status) => {
            format!("acknowledged, transaction status: {}", status.as_str())
        }
    };

    Ok(Json(json!({ "success": true, "message": message })))
}
