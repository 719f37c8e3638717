//! Outbound webhook transport.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::domains::eventsourcing::models::WebhookSettings;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("connection problem: {0}")]
    Connection(String),
    #[error("status != 200 (got {0})")]
    Status(u16),
    #[error("bad webhook settings: {0}")]
    BadSettings(String),
}

/// POSTs a serialized payload to a subscriber.
///
/// A trait so tests can script failures; production wiring uses
/// [`HttpWebhookTransport`].
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn deliver(&self, settings: &WebhookSettings, payload: &str)
        -> Result<(), DeliveryError>;
}

/// reqwest-backed transport with a fixed request timeout.
pub struct HttpWebhookTransport {
    client: reqwest::Client,
}

impl HttpWebhookTransport {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("client builder with static options should never fail");
        Self { client }
    }
}

impl Default for HttpWebhookTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl WebhookTransport for HttpWebhookTransport {
    async fn deliver(
        &self,
        settings: &WebhookSettings,
        payload: &str,
    ) -> Result<(), DeliveryError> {
        let mut request = self
            .client
            .post(&settings.webhook_url)
            .header("content-type", "application/json")
            .body(payload.to_string());

        for (name, value) in &settings.webhook_headers {
            request = request.header(name, value);
        }
        if !settings.webhook_cookies.is_empty() {
            let cookie = settings
                .webhook_cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            request = request.header("cookie", cookie);
        }
        if let Some((user, pass)) = &settings.webhook_auth {
            request = request.basic_auth(user, Some(pass));
        }

        info!(url = %settings.webhook_url, "do webhook request");
        let response = request
            .send()
            .await
            .map_err(|e| DeliveryError::Connection(e.to_string()))?;

        let status = response.status();
        info!(status = status.as_u16(), "webhook response");
        if status.as_u16() != 200 {
            return Err(DeliveryError::Status(status.as_u16()));
        }
        Ok(())
    }
}
