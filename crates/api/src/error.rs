//! API error handling
//!
//! Every handler failure is converted into the JSON envelope
//! `{"success": false, "message": ...}`; callers never see a stack trace.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use netbill_billing::BillingError;

pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        let status = match &err {
            BillingError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            BillingError::SignatureInvalid => StatusCode::FORBIDDEN,
            BillingError::UnknownGateway(_) | BillingError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Internal detail stays in the logs, not in the response body
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %err, "Unexpected internal error");
            "internal error".to_string()
        } else {
            err.to_string()
        };

        Self { status, message }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(error = %err, "Database error in handler");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}
