//! Router control client
//!
//! Talks to the Mikrotik RouterOS v7 REST API (`/rest/ppp/secret`) to
//! manage PPPoE secrets. Transport failures are retried a fixed number of
//! times with a linear delay before surfacing; callers treat the surfaced
//! error as a whole-operation failure and decide separately whether to
//! retry through the job queue.
//!
//! Concurrent access to each router is bounded by [`RouterConnectionPool`]
//! so a burst of isolation jobs cannot overwhelm small home-grade router
//! hardware.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use uuid::Uuid;

use netbill_shared::{BillingConfig, SecretCipher};

use crate::error::{BillingError, BillingResult};
use crate::models::Router;

/// Operations the billing core needs from a router
#[async_trait]
pub trait RouterControlClient: Send + Sync {
    /// Create a PPPoE secret; returns the router-assigned user id
    async fn create_user(
        &self,
        router: &Router,
        username: &str,
        password: &str,
        profile: &str,
    ) -> BillingResult<String>;

    /// Move an existing PPPoE secret to a different profile
    async fn update_user_profile(
        &self,
        router: &Router,
        user_id: &str,
        profile: &str,
    ) -> BillingResult<()>;

    /// Remove a PPPoE secret
    async fn delete_user(&self, router: &Router, user_id: &str) -> BillingResult<()>;

    /// Cheap reachability probe
    async fn test_connection(&self, router: &Router) -> BillingResult<()>;
}

/// Bounds concurrent connections per router identity.
///
/// An explicit object injected into whichever component needs router
/// access; the interior map is the only shared mutable structure in the
/// billing core and is guarded by a mutex for concurrent acquire/release.
pub struct RouterConnectionPool {
    entries: Mutex<HashMap<Uuid, PoolEntry>>,
    capacity: usize,
    idle_timeout: Duration,
}

struct PoolEntry {
    semaphore: Arc<Semaphore>,
    last_used: Instant,
}

impl RouterConnectionPool {
    pub fn new(capacity: usize, idle_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
            idle_timeout,
        }
    }

    pub fn from_config(config: &BillingConfig) -> Self {
        Self::new(config.router_pool_size, config.router_pool_idle)
    }

    /// Acquire a connection slot for the given router, waiting if the
    /// router is already at capacity.
    pub async fn acquire(&self, router_id: Uuid) -> BillingResult<OwnedSemaphorePermit> {
        let semaphore = {
            let mut entries = self.entries.lock().await;
            let entry = entries.entry(router_id).or_insert_with(|| PoolEntry {
                semaphore: Arc::new(Semaphore::new(self.capacity)),
                last_used: Instant::now(),
            });
            entry.last_used = Instant::now();
            Arc::clone(&entry.semaphore)
        };

        semaphore
            .acquire_owned()
            .await
            .map_err(|_| BillingError::Internal("router pool semaphore closed".to_string()))
    }

    /// Drop pool entries idle past the configured timeout. Entries with
    /// permits still out are kept regardless of age.
    pub async fn expire_idle(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        let capacity = self.capacity;
        let idle = self.idle_timeout;
        entries.retain(|_, entry| {
            entry.semaphore.available_permits() < capacity || entry.last_used.elapsed() < idle
        });
        before - entries.len()
    }

    /// Number of routers currently tracked
    pub async fn tracked_routers(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[derive(Debug, Deserialize)]
struct SecretCreated {
    #[serde(rename = ".id")]
    id: String,
}

/// REST client for Mikrotik RouterOS v7
pub struct MikrotikRestClient {
    http: reqwest::Client,
    cipher: SecretCipher,
    pool: Arc<RouterConnectionPool>,
    connect_attempts: usize,
}

impl MikrotikRestClient {
    pub fn new(
        config: &BillingConfig,
        cipher: SecretCipher,
        pool: Arc<RouterConnectionPool>,
    ) -> BillingResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.router_connect_timeout)
            .timeout(config.router_connect_timeout * 3)
            .danger_accept_invalid_certs(true) // routers ship self-signed certs
            .build()
            .map_err(|e| BillingError::Internal(format!("http client build failed: {}", e)))?;

        Ok(Self {
            http,
            cipher,
            pool,
            connect_attempts: config.router_connect_attempts.max(1),
        })
    }

    fn endpoint(router: &Router, path: &str) -> String {
        format!("{}/rest/{}", router.base_url.trim_end_matches('/'), path)
    }

    /// Send one request with the inner transport-retry loop (fixed 1s
    /// interval). Only transport-level failures are retried; an HTTP error
    /// status from the router is authoritative and returned immediately.
    async fn send_with_retry(
        &self,
        router: &Router,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> BillingResult<reqwest::Response> {
        let password = self.cipher.decrypt(&router.password_enc)?;
        let strategy = FixedInterval::from_millis(1000).take(self.connect_attempts - 1);

        let response = Retry::spawn(strategy, || async {
            build()
                .basic_auth(&router.username, Some(&password))
                .send()
                .await
        })
        .await
        .map_err(|e| {
            BillingError::RouterUnreachable(format!(
                "router '{}' after {} attempts: {}",
                router.name, self.connect_attempts, e
            ))
        })?;

        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(BillingError::RouterApi(format!(
                "router '{}' returned {}: {}",
                router.name, status, body
            )))
        }
    }
}

#[async_trait]
impl RouterControlClient for MikrotikRestClient {
    async fn create_user(
        &self,
        router: &Router,
        username: &str,
        password: &str,
        profile: &str,
    ) -> BillingResult<String> {
        let _permit = self.pool.acquire(router.id).await?;

        let url = Self::endpoint(router, "ppp/secret");
        let body = json!({
            "name": username,
            "password": password,
            "profile": profile,
            "service": "pppoe",
        });

        let response = self
            .send_with_retry(router, || self.http.put(&url).json(&body))
            .await?;

        let created: SecretCreated = response
            .json()
            .await
            .map_err(|e| BillingError::RouterApi(format!("malformed create response: {}", e)))?;

        tracing::info!(
            router = %router.name,
            username = %username,
            profile = %profile,
            mikrotik_user_id = %created.id,
            "PPPoE secret created"
        );

        Ok(created.id)
    }

    async fn update_user_profile(
        &self,
        router: &Router,
        user_id: &str,
        profile: &str,
    ) -> BillingResult<()> {
        let _permit = self.pool.acquire(router.id).await?;

        let url = Self::endpoint(router, &format!("ppp/secret/{}", user_id));
        let body = json!({ "profile": profile });

        self.send_with_retry(router, || self.http.patch(&url).json(&body))
            .await?;

        tracing::info!(
            router = %router.name,
            mikrotik_user_id = %user_id,
            profile = %profile,
            "PPPoE secret profile updated"
        );

        Ok(())
    }

    async fn delete_user(&self, router: &Router, user_id: &str) -> BillingResult<()> {
        let _permit = self.pool.acquire(router.id).await?;

        let url = Self::endpoint(router, &format!("ppp/secret/{}", user_id));

        self.send_with_retry(router, || self.http.delete(&url))
            .await?;

        tracing::info!(
            router = %router.name,
            mikrotik_user_id = %user_id,
            "PPPoE secret deleted"
        );

        Ok(())
    }

    async fn test_connection(&self, router: &Router) -> BillingResult<()> {
        let _permit = self.pool.acquire(router.id).await?;

        let url = Self::endpoint(router, "system/resource");
        self.send_with_retry(router, || self.http.get(&url)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD as B64;
    use base64::Engine as _;

    fn test_cipher() -> SecretCipher {
        SecretCipher::from_base64(&B64.encode([7u8; 32])).unwrap()
    }

    fn test_router(base_url: &str, cipher: &SecretCipher) -> Router {
        Router {
            id: Uuid::new_v4(),
            name: "rb750".to_string(),
            base_url: base_url.to_string(),
            username: "api".to_string(),
            password_enc: cipher.encrypt("router-pass").unwrap(),
        }
    }

    fn test_client(pool: Arc<RouterConnectionPool>) -> MikrotikRestClient {
        let config = BillingConfig {
            router_connect_attempts: 1,
            ..BillingConfig::default()
        };
        MikrotikRestClient::new(&config, test_cipher(), pool).unwrap()
    }

    #[tokio::test]
    async fn test_create_user_returns_assigned_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/rest/ppp/secret")
            .with_status(200)
            .with_body(r#"{".id":"*1A","name":"pppoe_x"}"#)
            .create_async()
            .await;

        let cipher = test_cipher();
        let router = test_router(&server.url(), &cipher);
        let pool = Arc::new(RouterConnectionPool::new(3, Duration::from_secs(300)));
        let client = test_client(pool);

        let id = client
            .create_user(&router, "pppoe_x", "pw", "paket_home")
            .await
            .unwrap();

        assert_eq!(id, "*1A");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_update_profile_hits_secret_path() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", "/rest/ppp/secret/*1A")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let cipher = test_cipher();
        let router = test_router(&server.url(), &cipher);
        let pool = Arc::new(RouterConnectionPool::new(3, Duration::from_secs(300)));
        let client = test_client(pool);

        client
            .update_user_profile(&router, "*1A", "isolir")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_router_error_status_is_not_unreachable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/rest/ppp/secret/*1A")
            .with_status(404)
            .with_body(r#"{"error":404,"message":"no such item"}"#)
            .create_async()
            .await;

        let cipher = test_cipher();
        let router = test_router(&server.url(), &cipher);
        let pool = Arc::new(RouterConnectionPool::new(3, Duration::from_secs(300)));
        let client = test_client(pool);

        let err = client.delete_user(&router, "*1A").await.unwrap_err();
        assert!(matches!(err, BillingError::RouterApi(_)));
        assert!(!err.is_transient(), "a 404 from the router must not retry");
    }

    #[tokio::test]
    async fn test_connection_probe_hits_system_resource() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/rest/system/resource")
            .with_status(200)
            .with_body(r#"{"uptime":"1w2d","version":"7.14"}"#)
            .create_async()
            .await;

        let cipher = test_cipher();
        let router = test_router(&server.url(), &cipher);
        let pool = Arc::new(RouterConnectionPool::new(3, Duration::from_secs(300)));
        let client = test_client(pool);

        client.test_connection(&router).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency_per_router() {
        let pool = RouterConnectionPool::new(2, Duration::from_secs(300));
        let router_id = Uuid::new_v4();

        let p1 = pool.acquire(router_id).await.unwrap();
        let _p2 = pool.acquire(router_id).await.unwrap();

        // Third acquire must block until a permit is returned
        let third = tokio::time::timeout(Duration::from_millis(50), pool.acquire(router_id)).await;
        assert!(third.is_err(), "pool should be exhausted at capacity 2");

        drop(p1);
        let third = tokio::time::timeout(Duration::from_millis(50), pool.acquire(router_id)).await;
        assert!(third.is_ok(), "released permit should be reissued");
    }

    #[tokio::test]
    async fn test_pool_isolates_routers() {
        let pool = RouterConnectionPool::new(1, Duration::from_secs(300));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let _pa = pool.acquire(a).await.unwrap();
        // Router b has its own budget
        let pb = tokio::time::timeout(Duration::from_millis(50), pool.acquire(b)).await;
        assert!(pb.is_ok());
    }

    #[tokio::test]
    async fn test_pool_expires_only_idle_entries() {
        let pool = RouterConnectionPool::new(1, Duration::from_millis(0));
        let idle_router = Uuid::new_v4();
        let busy_router = Uuid::new_v4();

        drop(pool.acquire(idle_router).await.unwrap());
        let _held = pool.acquire(busy_router).await.unwrap();

        let expired = pool.expire_idle().await;
        assert_eq!(expired, 1, "only the idle entry expires");
        assert_eq!(pool.tracked_routers().await, 1);
    }

    #[test]
    fn test_endpoint_normalizes_trailing_slash() {
        let cipher = test_cipher();
        let mut router = test_router("https://10.0.0.1", &cipher);
        router.base_url = "https://10.0.0.1/".to_string();
        assert_eq!(
            MikrotikRestClient::endpoint(&router, "ppp/secret"),
            "https://10.0.0.1/rest/ppp/secret"
        );
    }
}
