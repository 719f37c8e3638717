use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::common::Principal;

/// Kind of subscription transport. Only webhooks exist today; the integer
/// wire value (`type: 1`) is kept for compatibility with existing callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SubscriptionKind {
    Webhook,
}

impl TryFrom<u8> for SubscriptionKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(SubscriptionKind::Webhook),
            other => Err(format!("unknown subscription type: {other}")),
        }
    }
}

impl From<SubscriptionKind> for u8 {
    fn from(kind: SubscriptionKind) -> u8 {
        match kind {
            SubscriptionKind::Webhook => 1,
        }
    }
}

/// Transport settings stored on a webhook subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSettings {
    pub webhook_url: String,
    /// Basic auth credentials as a `[user, pass]` pair
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_auth: Option<(String, String)>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub webhook_headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub webhook_cookies: BTreeMap<String, String>,
    /// Protocol version payloads are rendered in
    #[serde(default = "default_api_version")]
    pub api_version: u32,
}

fn default_api_version() -> u32 {
    1
}

impl WebhookSettings {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            webhook_auth: None,
            webhook_headers: BTreeMap::new(),
            webhook_cookies: BTreeMap::new(),
            api_version: 1,
        }
    }
}

/// A persisted expression of interest in a set of event-name patterns.
///
/// Entity-like on purpose: it carries its own `uid`/`version` pair so the
/// subscription table can itself be replicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub uid: String,
    pub version: i64,
    pub name: String,
    pub kind: SubscriptionKind,
    pub owner: Principal,
    pub settings: WebhookSettings,
    pub events: Vec<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Subscription {
    pub fn new(
        owner: Principal,
        name: impl Into<String>,
        kind: SubscriptionKind,
        settings: WebhookSettings,
        events: Vec<String>,
    ) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Self {
            id,
            uid: id.to_string(),
            version: 1,
            name: name.into(),
            kind,
            owner,
            settings,
            events,
            created: now,
            updated: now,
        }
    }
}
