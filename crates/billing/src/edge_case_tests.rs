// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Billing Core
//!
//! Tests critical boundary conditions in:
//! - Expiry extension (EXP-01 to EXP-05)
//! - Overdue detection window (OVD-01 to OVD-04)
//! - Retry schedules (RETRY-01 to RETRY-04)
//! - Gateway dispatch and parsing (GW-01 to GW-07)
//! - Profile resolution (PROF-01 to PROF-03)

#[cfg(test)]
mod expiry_extension_tests {
    use crate::webhooks::extend_expiry;
    use time::macros::date;

    // =========================================================================
    // EXP-01: Payment 5 days before expiry - cycle compounds from expiry
    // =========================================================================
    #[test]
    fn test_early_payment_compounds_from_expiry() {
        let new = extend_expiry(date!(2025 - 06 - 15), date!(2025 - 06 - 10), 30);
        assert_eq!(new, date!(2025 - 07 - 15), "old_expiry + 30");
    }

    // =========================================================================
    // EXP-02: Payment 5 days after expiry - cycle restarts from today
    // =========================================================================
    #[test]
    fn test_late_payment_restarts_from_today() {
        let new = extend_expiry(date!(2025 - 06 - 05), date!(2025 - 06 - 10), 30);
        assert_eq!(new, date!(2025 - 07 - 10), "today + 30, not stale date + 30");
    }

    // =========================================================================
    // EXP-03: Payment exactly on expiry day - both anchors agree
    // =========================================================================
    #[test]
    fn test_payment_on_expiry_day() {
        let new = extend_expiry(date!(2025 - 06 - 10), date!(2025 - 06 - 10), 30);
        assert_eq!(new, date!(2025 - 07 - 10));
    }

    // =========================================================================
    // EXP-04: Extension across a year boundary
    // =========================================================================
    #[test]
    fn test_extension_across_year_boundary() {
        let new = extend_expiry(date!(2025 - 12 - 20), date!(2025 - 12 - 10), 30);
        assert_eq!(new, date!(2026 - 01 - 19));
    }

    // =========================================================================
    // EXP-05: Repeated on-time payments drift by exactly one cycle each
    // =========================================================================
    #[test]
    fn test_repeated_payments_accumulate_cycles() {
        let today = date!(2025 - 01 - 01);
        let mut expiry = date!(2025 - 01 - 01);
        for _ in 0..3 {
            expiry = extend_expiry(expiry, today, 30);
        }
        assert_eq!(expiry, date!(2025 - 04 - 01), "3 cycles of 30 days");
    }
}

#[cfg(test)]
mod overdue_window_tests {
    use crate::isolation::IsolationEngine;
    use time::macros::date;

    // =========================================================================
    // OVD-01: Due 5 days ago, grace 3 - overdue
    // OVD-02: Due 2 days ago, grace 3 - still in grace
    // =========================================================================
    #[test]
    fn test_grace_period_window() {
        let today = date!(2025 - 06 - 10);
        let cutoff = IsolationEngine::overdue_cutoff(today, 3);

        assert!(date!(2025 - 06 - 05) < cutoff, "5 days late is overdue");
        assert!(date!(2025 - 06 - 08) >= cutoff, "2 days late is in grace");
    }

    // =========================================================================
    // OVD-03: Due exactly grace days ago - boundary stays in grace
    // =========================================================================
    #[test]
    fn test_exact_grace_boundary_not_overdue() {
        let today = date!(2025 - 06 - 10);
        let cutoff = IsolationEngine::overdue_cutoff(today, 3);
        assert!(
            date!(2025 - 06 - 07) >= cutoff,
            "due_date == cutoff must not isolate (strict comparison)"
        );
        assert!(date!(2025 - 06 - 06) < cutoff, "one day past cutoff isolates");
    }

    // =========================================================================
    // OVD-04: Zero grace period - overdue the day after due date
    // =========================================================================
    #[test]
    fn test_zero_grace_period() {
        let today = date!(2025 - 06 - 10);
        let cutoff = IsolationEngine::overdue_cutoff(today, 0);
        assert_eq!(cutoff, today);
        assert!(date!(2025 - 06 - 09) < cutoff, "due yesterday is overdue");
        assert!(date!(2025 - 06 - 10) >= cutoff, "due today is not");
    }
}

#[cfg(test)]
mod retry_schedule_tests {
    use crate::retry::RetryPolicy;
    use std::time::Duration;

    // =========================================================================
    // RETRY-01: Isolation backoff is 60s, 120s, 240s with 3 attempts
    // =========================================================================
    #[test]
    fn test_isolation_backoff_values() {
        let policy = RetryPolicy::isolation();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_after(1), Duration::from_secs(60));
        assert_eq!(policy.delay_after(2), Duration::from_secs(120));
        assert_eq!(policy.delay_after(3), Duration::from_secs(240));
    }

    // =========================================================================
    // RETRY-02: Restoration backoff is 60s, 300s, 900s
    // =========================================================================
    #[test]
    fn test_restoration_backoff_values() {
        let policy = RetryPolicy::restoration();
        assert_eq!(policy.delay_after(1), Duration::from_secs(60));
        assert_eq!(policy.delay_after(2), Duration::from_secs(300));
        assert_eq!(policy.delay_after(3), Duration::from_secs(900));
    }

    // =========================================================================
    // RETRY-03: Third failure is terminal, never retried indefinitely
    // =========================================================================
    #[test]
    fn test_retry_budget_is_bounded() {
        for policy in [
            RetryPolicy::isolation(),
            RetryPolicy::restoration(),
            RetryPolicy::notification(),
        ] {
            assert!(policy.should_retry(policy.max_attempts - 1));
            assert!(!policy.should_retry(policy.max_attempts));
            assert!(!policy.should_retry(policy.max_attempts + 100));
        }
    }

    // =========================================================================
    // RETRY-04: Transient vs terminal error classification
    // =========================================================================
    #[test]
    fn test_error_classification_drives_retry() {
        use crate::error::BillingError;

        assert!(BillingError::RouterUnreachable("connect timeout".into()).is_transient());
        assert!(!BillingError::SignatureInvalid.is_transient());
        assert!(!BillingError::UnknownGateway("paypal".into()).is_transient());
        assert!(!BillingError::NotFound("invoice".into()).is_transient());
    }
}

#[cfg(test)]
mod gateway_dispatch_tests {
    use crate::gateway::*;

    fn webhook(body: &str) -> InboundWebhook {
        InboundWebhook {
            raw_body: body.to_string(),
            headers: Default::default(),
        }
    }

    // =========================================================================
    // GW-01: Unknown gateway path segment resolves to no adapter
    // =========================================================================
    #[test]
    fn test_unknown_gateway_has_no_adapter() {
        assert!(GatewayKind::from_path("stripe").is_none());
        assert!(GatewayKind::from_path("MIDTRANS").is_none(), "case sensitive");
    }

    // =========================================================================
    // GW-02: Pending statuses normalize to Pending across gateways
    // =========================================================================
    #[test]
    fn test_pending_status_normalization() {
        let midtrans = MidtransAdapter::new(String::new(), String::new());
        let body = r#"{"transaction_id":"t","transaction_status":"pending","gross_amount":"1000.00"}"#;
        assert_eq!(
            midtrans.parse_webhook(&webhook(body)).unwrap().status,
            GatewayTxStatus::Pending
        );

        let tripay = TripayAdapter::new(String::new(), String::new(), String::new());
        let body = r#"{"reference":"t","status":"UNPAID","total_amount":1000}"#;
        assert_eq!(
            tripay.parse_webhook(&webhook(body)).unwrap().status,
            GatewayTxStatus::Pending
        );
    }

    // =========================================================================
    // GW-03: Unrecognized gateway status maps to Unknown, not Success
    // =========================================================================
    #[test]
    fn test_unknown_status_never_success() {
        let midtrans = MidtransAdapter::new(String::new(), String::new());
        let body =
            r#"{"transaction_id":"t","transaction_status":"authorize","gross_amount":"1.00"}"#;
        assert_eq!(
            midtrans.parse_webhook(&webhook(body)).unwrap().status,
            GatewayTxStatus::Unknown
        );
    }

    // =========================================================================
    // GW-04: Empty-string transaction id is structural, same as missing
    // =========================================================================
    #[test]
    fn test_empty_transaction_id_rejected() {
        let midtrans = MidtransAdapter::new(String::new(), String::new());
        let body = r#"{"transaction_id":"","transaction_status":"settlement"}"#;
        assert!(midtrans.parse_webhook(&webhook(body)).is_err());
    }

    // =========================================================================
    // GW-05: Non-JSON body is a structural error
    // =========================================================================
    #[test]
    fn test_non_json_body_rejected() {
        let tripay = TripayAdapter::new(String::new(), String::new(), String::new());
        assert!(tripay.parse_webhook(&webhook("not json")).is_err());
    }

    // =========================================================================
    // GW-06: Fractional string amounts round to whole currency units
    // =========================================================================
    #[test]
    fn test_string_amount_parsing() {
        let midtrans = MidtransAdapter::new(String::new(), String::new());
        let body = r#"{"transaction_id":"t","transaction_status":"settlement","gross_amount":"150000.00"}"#;
        assert_eq!(midtrans.parse_webhook(&webhook(body)).unwrap().amount, 150000);
    }

    // =========================================================================
    // GW-07: Raw payload survives into metadata for audit
    // =========================================================================
    #[test]
    fn test_metadata_keeps_raw_payload() {
        let tripay = TripayAdapter::new(String::new(), String::new(), String::new());
        let body = r#"{"reference":"T1","status":"PAID","total_amount":5,"note":"extra"}"#;
        let parsed = tripay.parse_webhook(&webhook(body)).unwrap();
        assert_eq!(
            parsed.metadata.get("note").and_then(|v| v.as_str()),
            Some("extra")
        );
    }
}

#[cfg(test)]
mod profile_resolver_tests {
    use crate::isolation::ProfileResolver;
    use crate::models::Package;
    use uuid::Uuid;

    fn package(name: &str, profile: Option<&str>) -> Package {
        Package {
            id: Uuid::new_v4(),
            name: name.to_string(),
            price: 100000,
            mikrotik_profile: profile.map(String::from),
        }
    }

    // =========================================================================
    // PROF-01: Fixed resolver always wins, even against an override
    // =========================================================================
    #[test]
    fn test_fixed_resolver_ignores_override() {
        let resolver = ProfileResolver::Fixed("isolir");
        assert_eq!(resolver.resolve(&package("Home", Some("gold"))), "isolir");
    }

    // =========================================================================
    // PROF-02: Multi-space package names collapse every space
    // =========================================================================
    #[test]
    fn test_every_space_becomes_underscore() {
        let resolver = ProfileResolver::PackageDerived { prefix: "" };
        assert_eq!(
            resolver.resolve(&package("Paket Rumah 20 Mbps", None)),
            "Paket_Rumah_20_Mbps"
        );
    }

    // =========================================================================
    // PROF-03: Override bypasses prefix entirely
    // =========================================================================
    #[test]
    fn test_override_bypasses_prefix() {
        let resolver = ProfileResolver::PackageDerived { prefix: "ppp_" };
        assert_eq!(resolver.resolve(&package("Home", Some("gold"))), "gold");
    }
}
