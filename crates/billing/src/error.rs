//! Billing error types

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Malformed webhook payload or missing required field; never retried
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Webhook signature check failed; logged as a security event
    #[error("webhook signature verification failed")]
    SignatureInvalid,

    /// Webhook path named a gateway with no registered adapter
    #[error("unknown payment gateway: {0}")]
    UnknownGateway(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Router API unreachable after the client's inner retries
    #[error("router unreachable: {0}")]
    RouterUnreachable(String),

    /// Router API reachable but rejected the request
    #[error("router api error: {0}")]
    RouterApi(String),

    /// Credential generation exhausted its collision-retry budget
    #[error("could not generate a unique PPPoE username after {0} attempts")]
    CredentialCollision(usize),

    #[error("cipher error: {0}")]
    Cipher(#[from] netbill_shared::CipherError),

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error("notification delivery failed: {0}")]
    Notification(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Transient failures are worth another attempt through the job queue;
    /// everything else is terminal for the current unit of work.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BillingError::RouterUnreachable(_)
                | BillingError::Notification(_)
                | BillingError::Database(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BillingError::RouterUnreachable("timeout".into()).is_transient());
        assert!(BillingError::Notification("gateway 502".into()).is_transient());
        assert!(!BillingError::SignatureInvalid.is_transient());
        assert!(!BillingError::InvalidPayload("no transaction_id".into()).is_transient());
        assert!(!BillingError::CredentialCollision(10).is_transient());
    }
}
