//! Outbound notifications
//!
//! WhatsApp (HTTP gateway) and email (HTTP API) delivery behind one trait,
//! plus the durable notification queue the worker drains. Bulk sends are
//! chunked and spaced to respect the WhatsApp provider's rate limit.

use async_trait::async_trait;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use netbill_shared::{BillingConfig, NotificationChannel};

use crate::error::{BillingError, BillingResult};
use crate::models::QueuedNotification;
use crate::retry::RetryPolicy;

/// Outcome of one recipient within a bulk send
#[derive(Debug, Clone)]
pub struct BulkSendResult {
    pub recipient: String,
    pub result: Result<(), String>,
}

/// Delivery transport consumed by the billing core
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(
        &self,
        channel: NotificationChannel,
        recipient: &str,
        message: &str,
        subject: Option<&str>,
    ) -> BillingResult<()>;

    /// Send to many recipients on one channel, chunked into batches with
    /// the configured inter-batch spacing.
    async fn send_bulk(
        &self,
        channel: NotificationChannel,
        messages: &[(String, String)],
    ) -> Vec<BulkSendResult>;
}

/// HTTP-backed sender for the WhatsApp gateway and the email API.
///
/// Either transport may be unconfigured (empty credentials); sends on a
/// disabled channel fail with a notification error rather than panicking,
/// and the condition is logged once at construction.
pub struct HttpNotificationSender {
    http: reqwest::Client,
    config: BillingConfig,
    whatsapp_url: String,
    whatsapp_token: String,
    email_url: String,
    email_api_key: String,
    email_from: String,
}

impl HttpNotificationSender {
    pub fn from_env(config: BillingConfig) -> Self {
        let sender = Self {
            http: reqwest::Client::new(),
            config,
            whatsapp_url: std::env::var("WHATSAPP_GATEWAY_URL").unwrap_or_default(),
            whatsapp_token: std::env::var("WHATSAPP_GATEWAY_TOKEN").unwrap_or_default(),
            email_url: std::env::var("EMAIL_API_URL")
                .unwrap_or_else(|_| "https://api.resend.com/emails".to_string()),
            email_api_key: std::env::var("EMAIL_API_KEY").unwrap_or_default(),
            email_from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "billing@localhost".to_string()),
        };

        if sender.whatsapp_url.is_empty() {
            tracing::warn!("WhatsApp notifications not configured (missing WHATSAPP_GATEWAY_URL)");
        }
        if sender.email_api_key.is_empty() {
            tracing::warn!("Email notifications not configured (missing EMAIL_API_KEY)");
        }

        sender
    }

    async fn send_whatsapp(&self, recipient: &str, message: &str) -> BillingResult<()> {
        if self.whatsapp_url.is_empty() {
            return Err(BillingError::Notification(
                "whatsapp gateway not configured".to_string(),
            ));
        }

        let body = json!({
            "target": recipient,
            "message": message,
        });

        self.http
            .post(&self.whatsapp_url)
            .header("Authorization", &self.whatsapp_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| BillingError::Notification(format!("whatsapp gateway: {}", e)))?
            .error_for_status()
            .map_err(|e| BillingError::Notification(format!("whatsapp gateway: {}", e)))?;

        Ok(())
    }

    async fn send_email(
        &self,
        recipient: &str,
        message: &str,
        subject: Option<&str>,
    ) -> BillingResult<()> {
        if self.email_api_key.is_empty() {
            return Err(BillingError::Notification(
                "email api not configured".to_string(),
            ));
        }

        let body = json!({
            "from": self.email_from,
            "to": [recipient],
            "subject": subject.unwrap_or("Notification"),
            "text": message,
        });

        self.http
            .post(&self.email_url)
            .bearer_auth(&self.email_api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BillingError::Notification(format!("email api: {}", e)))?
            .error_for_status()
            .map_err(|e| BillingError::Notification(format!("email api: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl NotificationSender for HttpNotificationSender {
    async fn send(
        &self,
        channel: NotificationChannel,
        recipient: &str,
        message: &str,
        subject: Option<&str>,
    ) -> BillingResult<()> {
        match channel {
            NotificationChannel::Whatsapp => self.send_whatsapp(recipient, message).await,
            NotificationChannel::Email => self.send_email(recipient, message, subject).await,
        }
    }

    async fn send_bulk(
        &self,
        channel: NotificationChannel,
        messages: &[(String, String)],
    ) -> Vec<BulkSendResult> {
        let mut results = Vec::with_capacity(messages.len());

        for (batch_idx, batch) in messages.chunks(self.config.notify_batch_size).enumerate() {
            if batch_idx > 0 {
                tokio::time::sleep(self.config.notify_batch_delay).await;
            }

            for (recipient, message) in batch {
                let outcome = self.send(channel, recipient, message, None).await;
                results.push(BulkSendResult {
                    recipient: recipient.clone(),
                    result: outcome.map_err(|e| e.to_string()),
                });
            }
        }

        results
    }
}

/// Durable queue feeding the worker's notification processor
pub struct NotificationQueue {
    pool: PgPool,
}

impl NotificationQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn enqueue(
        &self,
        channel: NotificationChannel,
        recipient: &str,
        subject: Option<&str>,
        body: &str,
    ) -> BillingResult<Uuid> {
        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO notification_queue (channel, recipient, subject, body)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(channel.as_str())
        .bind(recipient)
        .bind(subject)
        .bind(body)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn claim_due(&self, limit: i64) -> BillingResult<Vec<QueuedNotification>> {
        let rows: Vec<QueuedNotification> = sqlx::query_as(
            r#"
            UPDATE notification_queue
            SET attempt_count = attempt_count + 1
            WHERE id IN (
                SELECT id FROM notification_queue
                WHERE status IN ('queued', 'failed')
                  AND next_run_at <= NOW()
                ORDER BY next_run_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn mark_sent(&self, id: Uuid) -> BillingResult<()> {
        sqlx::query("UPDATE notification_queue SET status = 'sent', last_error = NULL WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Reschedule or dead-letter a failed delivery on the notification
    /// backoff schedule.
    pub async fn mark_failed(&self, item: &QueuedNotification, error: &str) -> BillingResult<()> {
        let policy = RetryPolicy::notification();
        let failed_attempts = item.attempt_count as u32;

        if policy.should_retry(failed_attempts) {
            let delay = policy.delay_after(failed_attempts);
            sqlx::query(
                r#"
                UPDATE notification_queue
                SET status = 'failed',
                    last_error = $2,
                    next_run_at = NOW() + ($3 || ' seconds')::INTERVAL
                WHERE id = $1
                "#,
            )
            .bind(item.id)
            .bind(error)
            .bind(delay.as_secs() as i64)
            .execute(&self.pool)
            .await?;

            tracing::warn!(
                notification_id = %item.id,
                channel = %item.channel,
                attempt = failed_attempts,
                error = %error,
                "Notification delivery failed, retry scheduled"
            );
        } else {
            sqlx::query(
                "UPDATE notification_queue SET status = 'dead', last_error = $2 WHERE id = $1",
            )
            .bind(item.id)
            .bind(error)
            .execute(&self.pool)
            .await?;

            tracing::error!(
                notification_id = %item.id,
                channel = %item.channel,
                recipient = %item.recipient,
                attempts = failed_attempts,
                error = %error,
                "Notification failed after all retries. Manual intervention required."
            );
        }

        Ok(())
    }

    pub async fn cleanup_old(&self, keep_days: i64) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM notification_queue
            WHERE status IN ('sent', 'dead')
              AND created_at < NOW() - ($1 || ' days')::INTERVAL
            "#,
        )
        .bind(keep_days)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// In-memory sender for tests: records every send, optionally failing
/// specific recipients.
#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingSender {
        pub sent: Mutex<Vec<(NotificationChannel, String, String)>>,
        pub fail_recipients: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl NotificationSender for RecordingSender {
        async fn send(
            &self,
            channel: NotificationChannel,
            recipient: &str,
            message: &str,
            _subject: Option<&str>,
        ) -> BillingResult<()> {
            if let Some(err) = self.fail_recipients.lock().unwrap().get(recipient) {
                return Err(BillingError::Notification(err.clone()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((channel, recipient.to_string(), message.to_string()));
            Ok(())
        }

        async fn send_bulk(
            &self,
            channel: NotificationChannel,
            messages: &[(String, String)],
        ) -> Vec<BulkSendResult> {
            let mut results = Vec::new();
            for (recipient, message) in messages {
                let outcome = self.send(channel, recipient, message, None).await;
                results.push(BulkSendResult {
                    recipient: recipient.clone(),
                    result: outcome.map_err(|e| e.to_string()),
                });
            }
            results
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn whatsapp_sender(url: &str) -> HttpNotificationSender {
        HttpNotificationSender {
            http: reqwest::Client::new(),
            config: BillingConfig {
                notify_batch_size: 2,
                notify_batch_delay: std::time::Duration::from_millis(10),
                ..BillingConfig::default()
            },
            whatsapp_url: url.to_string(),
            whatsapp_token: "tok".to_string(),
            email_url: String::new(),
            email_api_key: String::new(),
            email_from: "billing@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_whatsapp_send_posts_to_gateway() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("authorization", "tok")
            .with_status(200)
            .with_body(r#"{"status":true}"#)
            .create_async()
            .await;

        let sender = whatsapp_sender(&server.url());
        sender
            .send(NotificationChannel::Whatsapp, "628123", "tagihan", None)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unconfigured_channel_is_an_error_not_a_panic() {
        let sender = whatsapp_sender("");
        let err = sender
            .send(NotificationChannel::Whatsapp, "628123", "x", None)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Notification(_)));
    }

    #[tokio::test]
    async fn test_bulk_send_batches_and_reports_per_recipient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body("{}")
            .expect(3)
            .create_async()
            .await;

        let sender = whatsapp_sender(&server.url());
        let messages: Vec<(String, String)> = (0..3)
            .map(|i| (format!("62812{}", i), "pay up".to_string()))
            .collect();

        let started = std::time::Instant::now();
        let results = sender
            .send_bulk(NotificationChannel::Whatsapp, &messages)
            .await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.result.is_ok()));
        // batch size 2 forces one inter-batch delay
        assert!(started.elapsed() >= std::time::Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_bulk_send_failures_stay_per_recipient() {
        let sender = testing::RecordingSender::default();
        sender
            .fail_recipients
            .lock()
            .unwrap()
            .insert("628999".to_string(), "blocked number".to_string());

        let messages = vec![
            ("628111".to_string(), "tagihan".to_string()),
            ("628999".to_string(), "tagihan".to_string()),
        ];
        let results = sender
            .send_bulk(NotificationChannel::Whatsapp, &messages)
            .await;

        assert!(results[0].result.is_ok());
        assert!(results[1].result.is_err(), "one bad number must not fail the batch");
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }
}
