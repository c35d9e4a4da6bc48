//! Lifecycle status types
//!
//! Status columns are stored as TEXT and compared against these constants;
//! the enums exist so state names live in one place instead of being
//! scattered as string literals through the SQL.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a provisioned subscriber connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    /// Created, not yet pushed to the router
    Pending,
    /// Provisioned and billable
    Active,
    /// Throttled to the isolation profile for non-payment
    Isolated,
    /// Administratively paused
    Suspended,
    /// Logically deleted; financial history retained
    Terminated,
    /// Router rejected the PPPoE user; recoverable via manual retry
    ProvisioningFailed,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Pending => "pending",
            ServiceStatus::Active => "active",
            ServiceStatus::Isolated => "isolated",
            ServiceStatus::Suspended => "suspended",
            ServiceStatus::Terminated => "terminated",
            ServiceStatus::ProvisioningFailed => "provisioning_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ServiceStatus::Pending),
            "active" => Some(ServiceStatus::Active),
            "isolated" => Some(ServiceStatus::Isolated),
            "suspended" => Some(ServiceStatus::Suspended),
            "terminated" => Some(ServiceStatus::Terminated),
            "provisioning_failed" => Some(ServiceStatus::ProvisioningFailed),
            _ => None,
        }
    }

    /// Whether the router holds a PPPoE user for this service
    pub fn is_provisioned(&self) -> bool {
        matches!(self, ServiceStatus::Active | ServiceStatus::Isolated)
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoice settlement state. "Overdue" is derived by query
/// (unpaid + due_date in the past), never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Unpaid,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Unpaid => "unpaid",
            InvoiceStatus::Paid => "paid",
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of retryable unit of work in the service job queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Isolate,
    Restore,
    RetryProvisioning,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Isolate => "isolate",
            JobKind::Restore => "restore",
            JobKind::RetryProvisioning => "retry_provisioning",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "isolate" => Some(JobKind::Isolate),
            "restore" => Some(JobKind::Restore),
            "retry_provisioning" => Some(JobKind::RetryProvisioning),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution state of a queued job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    /// Retries exhausted; needs manual intervention
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Dead => "dead",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound notification transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Whatsapp,
    Email,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Whatsapp => "whatsapp",
            NotificationChannel::Email => "email",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "whatsapp" => Some(NotificationChannel::Whatsapp),
            "email" => Some(NotificationChannel::Email),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery state of a queued notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Queued,
    Sent,
    Failed,
    Dead,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Queued => "queued",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
            NotificationStatus::Dead => "dead",
        }
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_status_round_trip() {
        for status in [
            ServiceStatus::Pending,
            ServiceStatus::Active,
            ServiceStatus::Isolated,
            ServiceStatus::Suspended,
            ServiceStatus::Terminated,
            ServiceStatus::ProvisioningFailed,
        ] {
            assert_eq!(ServiceStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ServiceStatus::parse("bogus"), None);
    }

    #[test]
    fn test_provisioned_states() {
        assert!(ServiceStatus::Active.is_provisioned());
        assert!(ServiceStatus::Isolated.is_provisioned());
        assert!(!ServiceStatus::Pending.is_provisioned());
        assert!(!ServiceStatus::ProvisioningFailed.is_provisioned());
        assert!(!ServiceStatus::Terminated.is_provisioned());
    }

    #[test]
    fn test_job_kind_round_trip() {
        for kind in [JobKind::Isolate, JobKind::Restore, JobKind::RetryProvisioning] {
            assert_eq!(JobKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(JobKind::parse(""), None);
    }
}
