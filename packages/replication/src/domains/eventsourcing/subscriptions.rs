//! Subscription lifecycle operations and input validation.

use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::common::Principal;

use super::capture::Replicator;
use super::models::{HistoryAction, Subscription, SubscriptionKind, WebhookSettings};
use super::registry::ReplicatingRegistry;
use super::serializer::Permissions;
use super::store::SubscriptionStore;

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("settings is not a dictionary")]
    SettingsWrongType,
    #[error("settings.webhook_url not exists")]
    NoWebhookUrl,
    #[error("settings.webhook_url has wrong format")]
    WebhookUrlBadFormat,
    #[error("settings.webhook_headers has wrong format")]
    WebhookHeadersBadFormat,
    #[error("settings.webhook_auth has wrong format")]
    WebhookAuthBadFormat,
    #[error("settings.webhook_cookies has wrong format")]
    WebhookCookiesBadFormat,
    #[error("no events")]
    NoEvents,
    #[error("wrong event name \"{0}\"")]
    WrongEvent(String),
    #[error("no event permission for \"{0}\"")]
    NoEventPermission(String),
    #[error("serialize \"{0}\" event problem")]
    SerializeProblem(String),
    #[error("name is already used by another user")]
    NameUsedByAnotherUser,
    #[error("you are trying to update not your subscription")]
    NotYourSubscription,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl SubscribeError {
    /// Stable machine-readable code surfaced by the management API.
    pub fn code(&self) -> &'static str {
        match self {
            SubscribeError::SettingsWrongType => "settings_wrong_type",
            SubscribeError::NoWebhookUrl => "no_webhook_url",
            SubscribeError::WebhookUrlBadFormat => "settings_webhook_url_bad_format",
            SubscribeError::WebhookHeadersBadFormat => "settings_webhook_headers_bad_format",
            SubscribeError::WebhookAuthBadFormat => "settings_webhook_auth_bad_format",
            SubscribeError::WebhookCookiesBadFormat => "settings_webhook_cookies_bad_format",
            SubscribeError::NoEvents => "no_events",
            SubscribeError::WrongEvent(_) => "wrong_event",
            SubscribeError::NoEventPermission(_) => "no_event_permission",
            SubscribeError::SerializeProblem(_) => "serialize",
            SubscribeError::NameUsedByAnotherUser => "name_used_by_another_user",
            SubscribeError::NotYourSubscription => "not_your_subscription",
            SubscribeError::Storage(_) => "storage_error",
        }
    }
}

/// A parsed event-name pattern: `type[.action[.uid]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPattern {
    pub type_name: String,
    pub action: Option<HistoryAction>,
    pub uid: Option<String>,
}

impl EventPattern {
    pub fn parse(pattern: &str, registry: &ReplicatingRegistry) -> Result<Self, SubscribeError> {
        let parts: Vec<&str> = pattern.split('.').collect();
        if parts.len() > 3 || parts[0].is_empty() {
            return Err(SubscribeError::WrongEvent(pattern.to_string()));
        }
        if !registry.is_registered(parts[0]) {
            return Err(SubscribeError::WrongEvent(pattern.to_string()));
        }
        let action = match parts.get(1) {
            Some(raw) => Some(
                HistoryAction::parse(raw)
                    .ok_or_else(|| SubscribeError::WrongEvent(pattern.to_string()))?,
            ),
            None => None,
        };
        Ok(Self {
            type_name: parts[0].to_string(),
            action,
            uid: parts.get(2).map(|s| s.to_string()),
        })
    }
}

/// Validate the raw `settings` object from a subscribe request and convert
/// it into typed [`WebhookSettings`].
pub fn validate_settings(raw: &Value, api_version: u32) -> Result<WebhookSettings, SubscribeError> {
    let obj = raw.as_object().ok_or(SubscribeError::SettingsWrongType)?;

    let webhook_url = obj.get("webhook_url").ok_or(SubscribeError::NoWebhookUrl)?;
    let webhook_url = webhook_url
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or(SubscribeError::WebhookUrlBadFormat)?
        .to_string();

    let mut settings = WebhookSettings::new(webhook_url);
    // a subscription may pin an older envelope revision; default to latest
    settings.api_version = match obj.get("api_version") {
        Some(v) => v
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or(SubscribeError::SettingsWrongType)?,
        None => api_version,
    };

    if let Some(headers) = obj.get("webhook_headers") {
        let headers = headers
            .as_object()
            .ok_or(SubscribeError::WebhookHeadersBadFormat)?;
        for (name, value) in headers {
            let value = value
                .as_str()
                .ok_or(SubscribeError::WebhookHeadersBadFormat)?;
            settings
                .webhook_headers
                .insert(name.clone(), value.to_string());
        }
    }

    if let Some(auth) = obj.get("webhook_auth") {
        let pair = auth
            .as_array()
            .filter(|a| a.len() == 2)
            .ok_or(SubscribeError::WebhookAuthBadFormat)?;
        let user = pair[0].as_str().ok_or(SubscribeError::WebhookAuthBadFormat)?;
        let pass = pair[1].as_str().ok_or(SubscribeError::WebhookAuthBadFormat)?;
        settings.webhook_auth = Some((user.to_string(), pass.to_string()));
    }

    if let Some(cookies) = obj.get("webhook_cookies") {
        let cookies = cookies
            .as_object()
            .ok_or(SubscribeError::WebhookCookiesBadFormat)?;
        for (name, value) in cookies {
            let value = value
                .as_str()
                .ok_or(SubscribeError::WebhookCookiesBadFormat)?;
            settings
                .webhook_cookies
                .insert(name.clone(), value.to_string());
        }
    }

    Ok(settings)
}

/// Validate the event pattern list: non-empty, every pattern well-formed
/// over a registered type, and the owner may read each type's history.
pub fn validate_subscribe_input(
    registry: &ReplicatingRegistry,
    permissions: &dyn Permissions,
    owner: &Principal,
    events: &[String],
) -> Result<(), SubscribeError> {
    if events.is_empty() {
        return Err(SubscribeError::NoEvents);
    }
    for event in events {
        let pattern = EventPattern::parse(event, registry)?;
        if !permissions.can_view_history(owner, &pattern.type_name) {
            return Err(SubscribeError::NoEventPermission(event.clone()));
        }
    }
    Ok(())
}

/// Idempotent subscribe: get-or-create by `(name, kind)`, merging new event
/// patterns into an existing subscription owned by the same principal.
pub async fn subscribe(
    store: &dyn SubscriptionStore,
    owner: &Principal,
    name: &str,
    kind: SubscriptionKind,
    settings: WebhookSettings,
    events: Vec<String>,
) -> Result<Subscription, SubscribeError> {
    let existing = store.get_by_name(name, kind).await?;

    let Some(mut subscription) = existing else {
        let subscription = Subscription::new(owner.clone(), name, kind, settings, events);
        store.insert(subscription.clone()).await?;
        info!(name, owner = %owner, "subscription created");
        return Ok(subscription);
    };

    if subscription.owner != *owner {
        return Err(SubscribeError::NameUsedByAnotherUser);
    }

    let extra_events: Vec<String> = events
        .into_iter()
        .filter(|e| !subscription.events.contains(e))
        .collect();
    if extra_events.is_empty() && subscription.settings == settings {
        return Ok(subscription);
    }

    subscription.settings = settings;
    subscription.events.extend(extra_events);
    store.update(subscription.clone()).await?;
    let subscription = store
        .get(subscription.id)
        .await?
        .unwrap_or(subscription);
    info!(name, owner = %owner, "subscription updated");
    Ok(subscription)
}

/// Remove event patterns from a subscription. Symmetric to [`subscribe`]:
/// missing subscriptions are created empty rather than erroring.
pub async fn unsubscribe(
    store: &dyn SubscriptionStore,
    owner: &Principal,
    name: &str,
    kind: SubscriptionKind,
    events: &[String],
) -> Result<Subscription, SubscribeError> {
    let existing = store.get_by_name(name, kind).await?;

    let Some(mut subscription) = existing else {
        let subscription = Subscription::new(
            owner.clone(),
            name,
            kind,
            WebhookSettings::new(""),
            Vec::new(),
        );
        store.insert(subscription.clone()).await?;
        return Ok(subscription);
    };

    if subscription.owner != *owner {
        return Err(SubscribeError::NotYourSubscription);
    }

    let remaining: Vec<String> = subscription
        .events
        .iter()
        .filter(|e| !events.contains(e))
        .cloned()
        .collect();
    if remaining == subscription.events {
        return Ok(subscription);
    }

    subscription.events = remaining;
    store.update(subscription.clone()).await?;
    let subscription = store
        .get(subscription.id)
        .await?
        .unwrap_or(subscription);
    info!(name, owner = %owner, "subscription events removed");
    Ok(subscription)
}

/// Administrative bulk re-send: enqueue the current latest history record
/// of every entity matching the given patterns, for this one subscription.
pub async fn re_replicate(
    replicator: &Replicator,
    subscription: &Subscription,
    patterns: &[String],
) -> Result<usize, SubscribeError> {
    // validate everything before enqueueing anything
    let mut parsed = Vec::with_capacity(patterns.len());
    for raw in patterns {
        let pattern = EventPattern::parse(raw, replicator.registry())?;
        if let Some(uid) = &pattern.uid {
            if !replicator.entity_exists(&pattern.type_name, uid).await? {
                return Err(SubscribeError::WrongEvent(raw.clone()));
            }
        }
        parsed.push(pattern);
    }

    let mut total = 0;
    for pattern in parsed {
        total += replicator
            .enqueue_latest(
                subscription.id,
                &pattern.type_name,
                pattern.action,
                pattern.uid.as_deref(),
            )
            .await
            .map_err(|e| SubscribeError::Storage(e.into()))?;
    }
    info!(
        name = %subscription.name,
        enqueued = total,
        "re-replication scheduled"
    );
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::eventsourcing::models::{EntitySchema, FieldDef};
    use crate::domains::eventsourcing::serializer::AllowAll;
    use crate::domains::eventsourcing::store::InMemorySubscriptionStore;
    use serde_json::json;
    use uuid::Uuid;

    fn registry() -> ReplicatingRegistry {
        let mut registry = ReplicatingRegistry::new();
        registry
            .register(
                "contact",
                EntitySchema::new(
                    "contact",
                    vec![FieldDef::scalar("uid"), FieldDef::scalar("version")],
                ),
            )
            .unwrap();
        registry
    }

    fn alice() -> Principal {
        Principal::new(Uuid::new_v4(), "alice")
    }

    #[test]
    fn test_validate_settings_happy_path() {
        let raw = json!({
            "webhook_url": "http://example.org/hook",
            "webhook_headers": {"x-token": "secret"},
            "webhook_auth": ["user", "pass"],
        });
        let settings = validate_settings(&raw, 1).unwrap();
        assert_eq!(settings.webhook_url, "http://example.org/hook");
        assert_eq!(settings.webhook_headers["x-token"], "secret");
        assert_eq!(
            settings.webhook_auth,
            Some(("user".to_string(), "pass".to_string()))
        );
    }

    #[test]
    fn test_validate_settings_error_codes() {
        let cases = [
            (json!([]), "settings_wrong_type"),
            (json!({}), "no_webhook_url"),
            (json!({"webhook_url": ""}), "settings_webhook_url_bad_format"),
            (
                json!({"webhook_url": "http://x/", "webhook_headers": ["nope"]}),
                "settings_webhook_headers_bad_format",
            ),
            (
                json!({"webhook_url": "http://x/", "webhook_auth": ["only-user"]}),
                "settings_webhook_auth_bad_format",
            ),
            (
                json!({"webhook_url": "http://x/", "webhook_cookies": ["nope"]}),
                "settings_webhook_cookies_bad_format",
            ),
            (
                json!({"webhook_url": "http://x/", "webhook_cookies": {"s": 1}}),
                "settings_webhook_cookies_bad_format",
            ),
            (
                json!({"webhook_url": "http://x/", "api_version": "one"}),
                "settings_wrong_type",
            ),
        ];
        for (raw, code) in cases {
            assert_eq!(validate_settings(&raw, 1).unwrap_err().code(), code);
        }
    }

    #[test]
    fn test_validate_settings_keeps_pinned_api_version() {
        let raw = json!({"webhook_url": "http://x/", "api_version": 1});
        assert_eq!(validate_settings(&raw, 2).unwrap().api_version, 1);

        let raw = json!({"webhook_url": "http://x/"});
        assert_eq!(validate_settings(&raw, 2).unwrap().api_version, 2);
    }

    #[test]
    fn test_validate_events() {
        let registry = registry();
        let owner = alice();

        let err =
            validate_subscribe_input(&registry, &AllowAll, &owner, &[]).unwrap_err();
        assert_eq!(err.code(), "no_events");

        let err = validate_subscribe_input(
            &registry,
            &AllowAll,
            &owner,
            &["unknown".to_string()],
        )
        .unwrap_err();
        assert_eq!(err.code(), "wrong_event");

        let err = validate_subscribe_input(
            &registry,
            &AllowAll,
            &owner,
            &["contact.?".to_string()],
        )
        .unwrap_err();
        assert_eq!(err.code(), "wrong_event");

        validate_subscribe_input(
            &registry,
            &AllowAll,
            &owner,
            &["contact".to_string(), "contact.+.U1".to_string()],
        )
        .unwrap();
    }

    #[test]
    fn test_validate_events_requires_read_permission() {
        struct DenyAll;

        impl Permissions for DenyAll {
            fn can_view_history(&self, _principal: &Principal, _type_name: &str) -> bool {
                false
            }
        }

        let err = validate_subscribe_input(
            &registry(),
            &DenyAll,
            &alice(),
            &["contact".to_string()],
        )
        .unwrap_err();
        assert_eq!(err.code(), "no_event_permission");
        assert!(matches!(err, SubscribeError::NoEventPermission(e) if e == "contact"));
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let store = InMemorySubscriptionStore::new();
        let owner = alice();
        let settings = WebhookSettings::new("http://example.org/hook");

        let first = subscribe(
            &store,
            &owner,
            "n",
            SubscriptionKind::Webhook,
            settings.clone(),
            vec!["contact".to_string()],
        )
        .await
        .unwrap();
        let second = subscribe(
            &store,
            &owner,
            "n",
            SubscriptionKind::Webhook,
            settings,
            vec!["contact".to_string()],
        )
        .await
        .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.events, vec!["contact".to_string()]);
        assert_eq!(second.version, first.version);
    }

    #[tokio::test]
    async fn test_subscribe_merges_new_events() {
        let store = InMemorySubscriptionStore::new();
        let owner = alice();
        let settings = WebhookSettings::new("http://example.org/hook");

        subscribe(
            &store,
            &owner,
            "n",
            SubscriptionKind::Webhook,
            settings.clone(),
            vec!["contact".to_string()],
        )
        .await
        .unwrap();
        let merged = subscribe(
            &store,
            &owner,
            "n",
            SubscriptionKind::Webhook,
            settings,
            vec!["contact".to_string(), "contact.+".to_string()],
        )
        .await
        .unwrap();

        assert_eq!(
            merged.events,
            vec!["contact".to_string(), "contact.+".to_string()]
        );
        assert_eq!(merged.version, 2);
    }

    #[tokio::test]
    async fn test_subscribe_foreign_owner_rejected() {
        let store = InMemorySubscriptionStore::new();
        let settings = WebhookSettings::new("http://example.org/hook");

        let original = subscribe(
            &store,
            &alice(),
            "n",
            SubscriptionKind::Webhook,
            settings.clone(),
            vec!["contact".to_string()],
        )
        .await
        .unwrap();

        let bob = Principal::new(Uuid::new_v4(), "bob");
        let err = subscribe(
            &store,
            &bob,
            "n",
            SubscriptionKind::Webhook,
            settings,
            vec!["contact.+".to_string()],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SubscribeError::NameUsedByAnotherUser));

        // unchanged
        let current = store.get(original.id).await.unwrap().unwrap();
        assert_eq!(current.events, vec!["contact".to_string()]);
        assert_eq!(current.version, original.version);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_events() {
        let store = InMemorySubscriptionStore::new();
        let owner = alice();
        let settings = WebhookSettings::new("http://example.org/hook");

        subscribe(
            &store,
            &owner,
            "n",
            SubscriptionKind::Webhook,
            settings,
            vec!["contact".to_string(), "contact.+".to_string()],
        )
        .await
        .unwrap();

        let updated = unsubscribe(
            &store,
            &owner,
            "n",
            SubscriptionKind::Webhook,
            &["contact.+".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(updated.events, vec!["contact".to_string()]);

        // removing an unknown pattern changes nothing
        let same = unsubscribe(
            &store,
            &owner,
            "n",
            SubscriptionKind::Webhook,
            &["contact.-".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(same.version, updated.version);
    }
}
