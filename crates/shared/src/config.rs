//! Billing runtime configuration
//!
//! Loaded once from the environment and handed to whichever component needs
//! it. Every knob has a default so a bare deployment works out of the box.

use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_or_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Configuration for billing, isolation, provisioning, and notification
#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// Days past due_date before an unpaid invoice triggers isolation
    pub grace_period_days: i64,
    /// Length of one billing cycle; drives due dates and expiry extension
    pub cycle_days: i64,
    /// Router profile applied to isolated subscribers
    pub isolation_profile: String,
    /// Prefix prepended to package-derived profile names
    pub profile_prefix: String,
    /// Inner transport retry count for router API calls
    pub router_connect_attempts: usize,
    /// Connect timeout for router API calls
    pub router_connect_timeout: Duration,
    /// Max concurrent connections per router
    pub router_pool_size: usize,
    /// Idle pooled router entries expire after this interval
    pub router_pool_idle: Duration,
    /// Recipients per outbound notification batch
    pub notify_batch_size: usize,
    /// Enforced spacing between notification batches
    pub notify_batch_delay: Duration,
}

impl BillingConfig {
    pub fn from_env() -> Self {
        Self {
            grace_period_days: env_or("GRACE_PERIOD_DAYS", 3),
            cycle_days: env_or("BILLING_CYCLE_DAYS", 30),
            isolation_profile: env_or_string("ISOLATION_PROFILE", "isolir"),
            profile_prefix: env_or_string("PROFILE_PREFIX", ""),
            router_connect_attempts: env_or("ROUTER_CONNECT_ATTEMPTS", 3),
            router_connect_timeout: Duration::from_secs(env_or("ROUTER_CONNECT_TIMEOUT_SECS", 5)),
            router_pool_size: env_or("ROUTER_POOL_SIZE", 3),
            router_pool_idle: Duration::from_secs(env_or("ROUTER_POOL_IDLE_SECS", 300)),
            notify_batch_size: env_or("NOTIFY_BATCH_SIZE", 50),
            notify_batch_delay: Duration::from_secs(env_or("NOTIFY_BATCH_DELAY_SECS", 60)),
        }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            grace_period_days: 3,
            cycle_days: 30,
            isolation_profile: "isolir".to_string(),
            profile_prefix: String::new(),
            router_connect_attempts: 3,
            router_connect_timeout: Duration::from_secs(5),
            router_pool_size: 3,
            router_pool_idle: Duration::from_secs(300),
            notify_batch_size: 50,
            notify_batch_delay: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BillingConfig::default();
        assert_eq!(config.grace_period_days, 3);
        assert_eq!(config.cycle_days, 30);
        assert_eq!(config.isolation_profile, "isolir");
        assert_eq!(config.router_pool_size, 3);
        assert_eq!(config.router_connect_timeout, Duration::from_secs(5));
        assert_eq!(config.notify_batch_size, 50);
        assert_eq!(config.notify_batch_delay, Duration::from_secs(60));
    }
}
