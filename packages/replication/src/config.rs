use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Timeout applied to every outbound webhook POST
    pub webhook_timeout: Duration,
    /// First retry delay after a failed delivery attempt
    pub delivery_backoff_base: Duration,
    /// Upper bound for the exponential backoff
    pub delivery_backoff_cap: Duration,
    /// Delivery attempt ceiling; `None` retries indefinitely
    pub delivery_max_attempts: Option<u32>,
    /// How long the delivery worker sleeps when the queue is empty
    pub worker_poll_interval: Duration,
    /// API version rendered into payloads when a subscription does not pin one
    pub latest_api_version: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let max_attempts: u32 = env::var("DELIVERY_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .context("DELIVERY_MAX_ATTEMPTS must be a number (0 = unbounded)")?;

        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            webhook_timeout: Duration::from_secs(
                env::var("WEBHOOK_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .context("WEBHOOK_TIMEOUT_SECS must be a number")?,
            ),
            delivery_backoff_base: Duration::from_millis(
                env::var("DELIVERY_BACKOFF_BASE_MS")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse()
                    .context("DELIVERY_BACKOFF_BASE_MS must be a number")?,
            ),
            delivery_backoff_cap: Duration::from_millis(
                env::var("DELIVERY_BACKOFF_CAP_MS")
                    .unwrap_or_else(|_| "600000".to_string())
                    .parse()
                    .context("DELIVERY_BACKOFF_CAP_MS must be a number")?,
            ),
            delivery_max_attempts: if max_attempts == 0 {
                None
            } else {
                Some(max_attempts)
            },
            worker_poll_interval: Duration::from_millis(
                env::var("WORKER_POLL_INTERVAL_MS")
                    .unwrap_or_else(|_| "250".to_string())
                    .parse()
                    .context("WORKER_POLL_INTERVAL_MS must be a number")?,
            ),
            latest_api_version: env::var("LATEST_API_VERSION")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .context("LATEST_API_VERSION must be a number")?,
        })
    }
}
