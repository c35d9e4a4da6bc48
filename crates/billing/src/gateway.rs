//! Payment gateway adapters
//!
//! One adapter per supported gateway, each owning its signature scheme and
//! payload normalization. Dispatch is resolved once at construction via
//! [`GatewayRegistry`]; the webhook route only ever sees the
//! [`PaymentGatewayAdapter`] trait.
//!
//! Signature schemes:
//! - **Midtrans**: SHA-512 of `order_id + status_code + gross_amount +
//!   server_key`, carried in the payload itself (`signature_key`)
//! - **Xendit**: static callback token in the `x-callback-token` header
//! - **Tripay**: HMAC-SHA-256 of the raw body, hex, in the
//!   `x-callback-signature` header

use std::collections::HashMap;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256, Sha512};

use crate::error::{BillingError, BillingResult};
use crate::models::Invoice;

type HmacSha256 = Hmac<Sha256>;

/// Supported gateways; the webhook path segment maps here exactly once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayKind {
    Midtrans,
    Xendit,
    Tripay,
}

impl GatewayKind {
    pub fn from_path(segment: &str) -> Option<Self> {
        match segment {
            "midtrans" => Some(GatewayKind::Midtrans),
            "xendit" => Some(GatewayKind::Xendit),
            "tripay" => Some(GatewayKind::Tripay),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayKind::Midtrans => "midtrans",
            GatewayKind::Xendit => "xendit",
            GatewayKind::Tripay => "tripay",
        }
    }
}

impl std::fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gateway transaction status, normalized across providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayTxStatus {
    Success,
    Pending,
    Failed,
    Expired,
    Unknown,
}

impl GatewayTxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayTxStatus::Success => "success",
            GatewayTxStatus::Pending => "pending",
            GatewayTxStatus::Failed => "failed",
            GatewayTxStatus::Expired => "expired",
            GatewayTxStatus::Unknown => "unknown",
        }
    }
}

/// An inbound webhook as received at the HTTP boundary: raw body plus the
/// lowercase header map. Adapters pull whichever header their scheme needs.
#[derive(Debug, Clone)]
pub struct InboundWebhook {
    pub raw_body: String,
    pub headers: HashMap<String, String>,
}

impl InboundWebhook {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }
}

/// Gateway-agnostic shape of a payment notification
#[derive(Debug, Clone)]
pub struct NormalizedWebhook {
    pub transaction_id: String,
    pub status: GatewayTxStatus,
    pub amount: i64,
    /// Invoice reference candidates, tried in order against the invoice PK
    pub external_id: Option<String>,
    pub invoice_id: Option<String>,
    pub order_id: Option<String>,
    /// Raw gateway payload, kept opaque on the payment row
    pub metadata: serde_json::Value,
}

impl NormalizedWebhook {
    /// Invoice reference candidates in resolution order
    pub fn invoice_refs(&self) -> impl Iterator<Item = &str> {
        self.external_id
            .as_deref()
            .into_iter()
            .chain(self.invoice_id.as_deref())
            .chain(self.order_id.as_deref())
    }
}

/// Capability set each gateway adapter must provide
#[async_trait]
pub trait PaymentGatewayAdapter: Send + Sync {
    fn gateway(&self) -> GatewayKind;

    /// Check the webhook's authenticity. `false` means reject with an
    /// authentication error; transport problems are `Err`.
    fn verify_signature(&self, webhook: &InboundWebhook) -> BillingResult<bool>;

    /// Normalize the gateway payload. Missing transaction id or status is
    /// a structural error.
    fn parse_webhook(&self, webhook: &InboundWebhook) -> BillingResult<NormalizedWebhook>;

    /// Create a hosted payment page for an invoice
    async fn create_payment_link(&self, invoice: &Invoice) -> BillingResult<String>;

    /// Query the gateway for a transaction's current status
    async fn get_status(&self, transaction_id: &str) -> BillingResult<GatewayTxStatus>;
}

fn parse_amount(value: &serde_json::Value) -> i64 {
    match value {
        serde_json::Value::Number(n) => n.as_f64().map(|f| f.round() as i64).unwrap_or(0),
        serde_json::Value::String(s) => s.parse::<f64>().map(|f| f.round() as i64).unwrap_or(0),
        _ => 0,
    }
}

fn require_str<'a>(payload: &'a serde_json::Value, field: &str) -> BillingResult<&'a str> {
    payload
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BillingError::InvalidPayload(format!("missing field: {}", field)))
}

fn parse_body(webhook: &InboundWebhook) -> BillingResult<serde_json::Value> {
    serde_json::from_str(&webhook.raw_body)
        .map_err(|e| BillingError::InvalidPayload(format!("invalid JSON body: {}", e)))
}

// ============ MIDTRANS ============

pub struct MidtransAdapter {
    server_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl MidtransAdapter {
    pub fn new(server_key: String, base_url: String) -> Self {
        Self {
            server_key,
            base_url,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var("MIDTRANS_SERVER_KEY").unwrap_or_default(),
            std::env::var("MIDTRANS_BASE_URL")
                .unwrap_or_else(|_| "https://api.midtrans.com".to_string()),
        )
    }

    fn map_status(raw: &str) -> GatewayTxStatus {
        match raw {
            "settlement" | "capture" => GatewayTxStatus::Success,
            "pending" => GatewayTxStatus::Pending,
            "deny" | "cancel" | "failure" => GatewayTxStatus::Failed,
            "expire" => GatewayTxStatus::Expired,
            _ => GatewayTxStatus::Unknown,
        }
    }
}

#[async_trait]
impl PaymentGatewayAdapter for MidtransAdapter {
    fn gateway(&self) -> GatewayKind {
        GatewayKind::Midtrans
    }

    fn verify_signature(&self, webhook: &InboundWebhook) -> BillingResult<bool> {
        let payload = parse_body(webhook)?;
        let order_id = require_str(&payload, "order_id")?;
        let status_code = require_str(&payload, "status_code")?;
        let gross_amount = require_str(&payload, "gross_amount")?;
        let received = require_str(&payload, "signature_key")?;

        let mut hasher = Sha512::new();
        hasher.update(order_id.as_bytes());
        hasher.update(status_code.as_bytes());
        hasher.update(gross_amount.as_bytes());
        hasher.update(self.server_key.as_bytes());
        let expected = hex::encode(hasher.finalize());

        Ok(expected == received)
    }

    fn parse_webhook(&self, webhook: &InboundWebhook) -> BillingResult<NormalizedWebhook> {
        let payload = parse_body(webhook)?;
        let transaction_id = require_str(&payload, "transaction_id")?.to_string();
        let raw_status = require_str(&payload, "transaction_status")?;
        let amount = payload
            .get("gross_amount")
            .map(parse_amount)
            .unwrap_or_default();
        let order_id = payload
            .get("order_id")
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(NormalizedWebhook {
            transaction_id,
            status: Self::map_status(raw_status),
            amount,
            external_id: None,
            invoice_id: None,
            order_id,
            metadata: payload,
        })
    }

    async fn create_payment_link(&self, invoice: &Invoice) -> BillingResult<String> {
        #[derive(Deserialize)]
        struct SnapResponse {
            redirect_url: String,
        }

        let body = json!({
            "transaction_details": {
                "order_id": invoice.id.to_string(),
                "gross_amount": invoice.amount,
            },
        });

        let response = self
            .http
            .post(format!("{}/snap/v1/transactions", self.base_url))
            .basic_auth(&self.server_key, Some(""))
            .json(&body)
            .send()
            .await
            .map_err(|e| BillingError::Gateway(format!("midtrans snap: {}", e)))?
            .error_for_status()
            .map_err(|e| BillingError::Gateway(format!("midtrans snap: {}", e)))?;

        let snap: SnapResponse = response
            .json()
            .await
            .map_err(|e| BillingError::Gateway(format!("midtrans snap response: {}", e)))?;

        Ok(snap.redirect_url)
    }

    async fn get_status(&self, transaction_id: &str) -> BillingResult<GatewayTxStatus> {
        let response = self
            .http
            .get(format!("{}/v2/{}/status", self.base_url, transaction_id))
            .basic_auth(&self.server_key, Some(""))
            .send()
            .await
            .map_err(|e| BillingError::Gateway(format!("midtrans status: {}", e)))?
            .error_for_status()
            .map_err(|e| BillingError::Gateway(format!("midtrans status: {}", e)))?;

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BillingError::Gateway(format!("midtrans status response: {}", e)))?;

        Ok(payload
            .get("transaction_status")
            .and_then(|v| v.as_str())
            .map(Self::map_status)
            .unwrap_or(GatewayTxStatus::Unknown))
    }
}

// ============ XENDIT ============

pub struct XenditAdapter {
    callback_token: String,
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl XenditAdapter {
    pub fn new(callback_token: String, api_key: String, base_url: String) -> Self {
        Self {
            callback_token,
            api_key,
            base_url,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var("XENDIT_CALLBACK_TOKEN").unwrap_or_default(),
            std::env::var("XENDIT_API_KEY").unwrap_or_default(),
            std::env::var("XENDIT_BASE_URL")
                .unwrap_or_else(|_| "https://api.xendit.co".to_string()),
        )
    }

    fn map_status(raw: &str) -> GatewayTxStatus {
        match raw {
            "PAID" | "SETTLED" => GatewayTxStatus::Success,
            "PENDING" => GatewayTxStatus::Pending,
            "EXPIRED" => GatewayTxStatus::Expired,
            "FAILED" => GatewayTxStatus::Failed,
            _ => GatewayTxStatus::Unknown,
        }
    }
}

#[async_trait]
impl PaymentGatewayAdapter for XenditAdapter {
    fn gateway(&self) -> GatewayKind {
        GatewayKind::Xendit
    }

    fn verify_signature(&self, webhook: &InboundWebhook) -> BillingResult<bool> {
        // Xendit authenticates callbacks with a shared static token
        Ok(webhook.header("x-callback-token") == Some(self.callback_token.as_str())
            && !self.callback_token.is_empty())
    }

    fn parse_webhook(&self, webhook: &InboundWebhook) -> BillingResult<NormalizedWebhook> {
        let payload = parse_body(webhook)?;
        let transaction_id = require_str(&payload, "id")?.to_string();
        let raw_status = require_str(&payload, "status")?;
        let amount = payload
            .get("paid_amount")
            .or_else(|| payload.get("amount"))
            .map(parse_amount)
            .unwrap_or_default();
        let external_id = payload
            .get("external_id")
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(NormalizedWebhook {
            transaction_id,
            status: Self::map_status(raw_status),
            amount,
            external_id,
            invoice_id: None,
            order_id: None,
            metadata: payload,
        })
    }

    async fn create_payment_link(&self, invoice: &Invoice) -> BillingResult<String> {
        #[derive(Deserialize)]
        struct XenditInvoice {
            invoice_url: String,
        }

        let body = json!({
            "external_id": invoice.id.to_string(),
            "amount": invoice.amount,
            "description": "Internet subscription invoice",
        });

        let response = self
            .http
            .post(format!("{}/v2/invoices", self.base_url))
            .basic_auth(&self.api_key, Some(""))
            .json(&body)
            .send()
            .await
            .map_err(|e| BillingError::Gateway(format!("xendit invoice: {}", e)))?
            .error_for_status()
            .map_err(|e| BillingError::Gateway(format!("xendit invoice: {}", e)))?;

        let created: XenditInvoice = response
            .json()
            .await
            .map_err(|e| BillingError::Gateway(format!("xendit invoice response: {}", e)))?;

        Ok(created.invoice_url)
    }

    async fn get_status(&self, transaction_id: &str) -> BillingResult<GatewayTxStatus> {
        let response = self
            .http
            .get(format!("{}/v2/invoices/{}", self.base_url, transaction_id))
            .basic_auth(&self.api_key, Some(""))
            .send()
            .await
            .map_err(|e| BillingError::Gateway(format!("xendit status: {}", e)))?
            .error_for_status()
            .map_err(|e| BillingError::Gateway(format!("xendit status: {}", e)))?;

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BillingError::Gateway(format!("xendit status response: {}", e)))?;

        Ok(payload
            .get("status")
            .and_then(|v| v.as_str())
            .map(Self::map_status)
            .unwrap_or(GatewayTxStatus::Unknown))
    }
}

// ============ TRIPAY ============

pub struct TripayAdapter {
    private_key: String,
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl TripayAdapter {
    pub fn new(private_key: String, api_key: String, base_url: String) -> Self {
        Self {
            private_key,
            api_key,
            base_url,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var("TRIPAY_PRIVATE_KEY").unwrap_or_default(),
            std::env::var("TRIPAY_API_KEY").unwrap_or_default(),
            std::env::var("TRIPAY_BASE_URL")
                .unwrap_or_else(|_| "https://tripay.co.id/api".to_string()),
        )
    }

    fn map_status(raw: &str) -> GatewayTxStatus {
        match raw {
            "PAID" => GatewayTxStatus::Success,
            "UNPAID" => GatewayTxStatus::Pending,
            "EXPIRED" => GatewayTxStatus::Expired,
            "FAILED" | "REFUND" => GatewayTxStatus::Failed,
            _ => GatewayTxStatus::Unknown,
        }
    }

    fn compute_signature(&self, raw_body: &str) -> BillingResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.private_key.as_bytes())
            .map_err(|_| BillingError::Internal("invalid tripay private key".to_string()))?;
        mac.update(raw_body.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl PaymentGatewayAdapter for TripayAdapter {
    fn gateway(&self) -> GatewayKind {
        GatewayKind::Tripay
    }

    fn verify_signature(&self, webhook: &InboundWebhook) -> BillingResult<bool> {
        let received = match webhook.header("x-callback-signature") {
            Some(sig) => sig,
            None => return Ok(false),
        };
        let expected = self.compute_signature(&webhook.raw_body)?;
        Ok(expected == received)
    }

    fn parse_webhook(&self, webhook: &InboundWebhook) -> BillingResult<NormalizedWebhook> {
        let payload = parse_body(webhook)?;
        let transaction_id = require_str(&payload, "reference")?.to_string();
        let raw_status = require_str(&payload, "status")?;
        let amount = payload
            .get("total_amount")
            .map(parse_amount)
            .unwrap_or_default();
        let external_id = payload
            .get("merchant_ref")
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(NormalizedWebhook {
            transaction_id,
            status: Self::map_status(raw_status),
            amount,
            external_id,
            invoice_id: None,
            order_id: None,
            metadata: payload,
        })
    }

    async fn create_payment_link(&self, invoice: &Invoice) -> BillingResult<String> {
        #[derive(Deserialize)]
        struct TripayData {
            checkout_url: String,
        }
        #[derive(Deserialize)]
        struct TripayResponse {
            data: TripayData,
        }

        let body = json!({
            "merchant_ref": invoice.id.to_string(),
            "amount": invoice.amount,
        });

        let response = self
            .http
            .post(format!("{}/transaction/create", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BillingError::Gateway(format!("tripay transaction: {}", e)))?
            .error_for_status()
            .map_err(|e| BillingError::Gateway(format!("tripay transaction: {}", e)))?;

        let created: TripayResponse = response
            .json()
            .await
            .map_err(|e| BillingError::Gateway(format!("tripay transaction response: {}", e)))?;

        Ok(created.data.checkout_url)
    }

    async fn get_status(&self, transaction_id: &str) -> BillingResult<GatewayTxStatus> {
        let response = self
            .http
            .get(format!("{}/transaction/detail", self.base_url))
            .query(&[("reference", transaction_id)])
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| BillingError::Gateway(format!("tripay status: {}", e)))?
            .error_for_status()
            .map_err(|e| BillingError::Gateway(format!("tripay status: {}", e)))?;

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BillingError::Gateway(format!("tripay status response: {}", e)))?;

        Ok(payload
            .pointer("/data/status")
            .and_then(|v| v.as_str())
            .map(Self::map_status)
            .unwrap_or(GatewayTxStatus::Unknown))
    }
}

// ============ REGISTRY ============

/// All adapters, constructed once; dispatch by [`GatewayKind`] only
pub struct GatewayRegistry {
    midtrans: MidtransAdapter,
    xendit: XenditAdapter,
    tripay: TripayAdapter,
}

impl GatewayRegistry {
    pub fn from_env() -> Self {
        Self {
            midtrans: MidtransAdapter::from_env(),
            xendit: XenditAdapter::from_env(),
            tripay: TripayAdapter::from_env(),
        }
    }

    pub fn new(midtrans: MidtransAdapter, xendit: XenditAdapter, tripay: TripayAdapter) -> Self {
        Self {
            midtrans,
            xendit,
            tripay,
        }
    }

    pub fn adapter(&self, kind: GatewayKind) -> &dyn PaymentGatewayAdapter {
        match kind {
            GatewayKind::Midtrans => &self.midtrans,
            GatewayKind::Xendit => &self.xendit,
            GatewayKind::Tripay => &self.tripay,
        }
    }

    /// Adapter used for payment links on freshly generated invoices
    pub fn default_adapter(&self) -> &dyn PaymentGatewayAdapter {
        &self.tripay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn webhook(body: &str, headers: &[(&str, &str)]) -> InboundWebhook {
        InboundWebhook {
            raw_body: body.to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_gateway_kind_from_path() {
        assert_eq!(GatewayKind::from_path("midtrans"), Some(GatewayKind::Midtrans));
        assert_eq!(GatewayKind::from_path("xendit"), Some(GatewayKind::Xendit));
        assert_eq!(GatewayKind::from_path("tripay"), Some(GatewayKind::Tripay));
        assert_eq!(GatewayKind::from_path("paypal"), None);
        assert_eq!(GatewayKind::from_path(""), None);
    }

    #[test]
    fn test_midtrans_signature_accepts_valid() {
        let adapter = MidtransAdapter::new("server-key".to_string(), String::new());

        let mut hasher = Sha512::new();
        hasher.update(b"inv-1");
        hasher.update(b"200");
        hasher.update(b"150000.00");
        hasher.update(b"server-key");
        let sig = hex::encode(hasher.finalize());

        let body = format!(
            r#"{{"order_id":"inv-1","status_code":"200","gross_amount":"150000.00","signature_key":"{}","transaction_id":"tx-1","transaction_status":"settlement"}}"#,
            sig
        );
        assert!(adapter.verify_signature(&webhook(&body, &[])).unwrap());
    }

    #[test]
    fn test_midtrans_signature_rejects_tampered_amount() {
        let adapter = MidtransAdapter::new("server-key".to_string(), String::new());

        let mut hasher = Sha512::new();
        hasher.update(b"inv-1");
        hasher.update(b"200");
        hasher.update(b"150000.00");
        hasher.update(b"server-key");
        let sig = hex::encode(hasher.finalize());

        let body = format!(
            r#"{{"order_id":"inv-1","status_code":"200","gross_amount":"1.00","signature_key":"{}","transaction_id":"tx-1","transaction_status":"settlement"}}"#,
            sig
        );
        assert!(!adapter.verify_signature(&webhook(&body, &[])).unwrap());
    }

    #[test]
    fn test_midtrans_parse_and_status_mapping() {
        let adapter = MidtransAdapter::new(String::new(), String::new());
        let body = r#"{"transaction_id":"tx-9","transaction_status":"settlement","gross_amount":"150000.00","order_id":"inv-9"}"#;
        let parsed = adapter.parse_webhook(&webhook(body, &[])).unwrap();

        assert_eq!(parsed.transaction_id, "tx-9");
        assert_eq!(parsed.status, GatewayTxStatus::Success);
        assert_eq!(parsed.amount, 150000);
        assert_eq!(parsed.order_id.as_deref(), Some("inv-9"));
        assert_eq!(parsed.invoice_refs().collect::<Vec<_>>(), vec!["inv-9"]);
    }

    #[test]
    fn test_midtrans_missing_transaction_id_is_structural() {
        let adapter = MidtransAdapter::new(String::new(), String::new());
        let body = r#"{"transaction_status":"settlement"}"#;
        let err = adapter.parse_webhook(&webhook(body, &[])).unwrap_err();
        assert!(matches!(err, BillingError::InvalidPayload(_)));
    }

    #[test]
    fn test_xendit_token_comparison() {
        let adapter = XenditAdapter::new("tok-1".to_string(), String::new(), String::new());
        let body = r#"{"id":"x","status":"PAID"}"#;

        assert!(adapter
            .verify_signature(&webhook(body, &[("x-callback-token", "tok-1")]))
            .unwrap());
        assert!(!adapter
            .verify_signature(&webhook(body, &[("x-callback-token", "wrong")]))
            .unwrap());
        assert!(!adapter.verify_signature(&webhook(body, &[])).unwrap());
    }

    #[test]
    fn test_xendit_empty_token_never_verifies() {
        // A deployment that forgot to set the token must not accept
        // webhooks whose header is also empty
        let adapter = XenditAdapter::new(String::new(), String::new(), String::new());
        let body = r#"{"id":"x","status":"PAID"}"#;
        assert!(!adapter
            .verify_signature(&webhook(body, &[("x-callback-token", "")]))
            .unwrap());
    }

    #[test]
    fn test_xendit_parse_prefers_paid_amount() {
        let adapter = XenditAdapter::new(String::new(), String::new(), String::new());
        let body = r#"{"id":"x-1","status":"PAID","external_id":"inv-3","amount":150000,"paid_amount":100000}"#;
        let parsed = adapter.parse_webhook(&webhook(body, &[])).unwrap();
        assert_eq!(parsed.amount, 100000);
        assert_eq!(parsed.external_id.as_deref(), Some("inv-3"));
        assert_eq!(parsed.status, GatewayTxStatus::Success);
    }

    #[test]
    fn test_tripay_hmac_round_trip() {
        let adapter = TripayAdapter::new("priv".to_string(), String::new(), String::new());
        let body = r#"{"reference":"T0001","merchant_ref":"inv-5","status":"PAID","total_amount":200000}"#;
        let sig = adapter.compute_signature(body).unwrap();

        assert!(adapter
            .verify_signature(&webhook(body, &[("x-callback-signature", sig.as_str())]))
            .unwrap());
        assert!(!adapter
            .verify_signature(&webhook(body, &[("x-callback-signature", "deadbeef")]))
            .unwrap());
    }

    #[test]
    fn test_tripay_parse() {
        let adapter = TripayAdapter::new(String::new(), String::new(), String::new());
        let body = r#"{"reference":"T0001","merchant_ref":"inv-5","status":"UNPAID","total_amount":200000}"#;
        let parsed = adapter.parse_webhook(&webhook(body, &[])).unwrap();
        assert_eq!(parsed.transaction_id, "T0001");
        assert_eq!(parsed.status, GatewayTxStatus::Pending);
        assert_eq!(parsed.amount, 200000);
    }

    #[test]
    fn test_invoice_ref_resolution_order() {
        let normalized = NormalizedWebhook {
            transaction_id: "t".to_string(),
            status: GatewayTxStatus::Success,
            amount: 0,
            external_id: Some("ext".to_string()),
            invoice_id: Some("inv".to_string()),
            order_id: Some("ord".to_string()),
            metadata: serde_json::Value::Null,
        };
        assert_eq!(
            normalized.invoice_refs().collect::<Vec<_>>(),
            vec!["ext", "inv", "ord"]
        );
    }

    #[tokio::test]
    async fn test_midtrans_status_query_maps_settlement() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v2/tx-9/status")
            .with_status(200)
            .with_body(r#"{"transaction_id":"tx-9","transaction_status":"settlement"}"#)
            .create_async()
            .await;

        let adapter = MidtransAdapter::new("key".to_string(), server.url());
        let status = adapter.get_status("tx-9").await.unwrap();
        assert_eq!(status, GatewayTxStatus::Success);
    }

    #[tokio::test]
    async fn test_tripay_payment_link_via_mock() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/transaction/create")
            .with_status(200)
            .with_body(r#"{"success":true,"data":{"checkout_url":"https://pay.example/T1"}}"#)
            .create_async()
            .await;

        let adapter = TripayAdapter::new("p".to_string(), "k".to_string(), server.url());
        let invoice = Invoice {
            id: uuid::Uuid::new_v4(),
            service_id: uuid::Uuid::new_v4(),
            amount: 150000,
            status: "unpaid".to_string(),
            invoice_date: time::macros::date!(2025 - 01 - 01),
            due_date: time::macros::date!(2025 - 01 - 31),
            paid_at: None,
            payment_id: None,
            payment_link: None,
            created_at: time::OffsetDateTime::now_utc(),
        };

        let url = adapter.create_payment_link(&invoice).await.unwrap();
        assert_eq!(url, "https://pay.example/T1");
    }
}
