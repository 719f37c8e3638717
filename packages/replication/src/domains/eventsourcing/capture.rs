//! History capture and event matching.
//!
//! Storage-layer code calls the `Replicator` directly after a committed
//! mutation. Capture appends the immutable history record and matching
//! enqueues delivery tasks; both run inline with the mutation and never
//! touch the network.

use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::kernel::delivery::{DeliveryQueue, DeliveryTask};

use super::models::{
    EntityRecord, Event, HistoryAction, HistoryRecord, NewHistoryRecord, SubscriptionKind,
};
use super::registry::ReplicatingRegistry;
use super::store::{HistoryStore, SubscriptionStore};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("type \"{0}\" is not registered for replication")]
    NotRegistered(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Context a mutation may attach to its history record.
#[derive(Debug, Clone, Default)]
pub struct MutationContext {
    pub user_id: Option<Uuid>,
    pub change_reason: Option<String>,
}

/// Captures entity mutations and dispatches matching delivery tasks.
pub struct Replicator {
    registry: Arc<ReplicatingRegistry>,
    history: Arc<dyn HistoryStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    queue: Arc<dyn DeliveryQueue>,
}

impl Replicator {
    pub fn new(
        registry: Arc<ReplicatingRegistry>,
        history: Arc<dyn HistoryStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        queue: Arc<dyn DeliveryQueue>,
    ) -> Self {
        Self {
            registry,
            history,
            subscriptions,
            queue,
        }
    }

    pub fn registry(&self) -> &ReplicatingRegistry {
        &self.registry
    }

    pub async fn on_entity_created(
        &self,
        type_name: &str,
        entity: &EntityRecord,
        ctx: MutationContext,
    ) -> Result<HistoryRecord, CaptureError> {
        self.capture(type_name, entity, HistoryAction::Created, ctx)
            .await
    }

    pub async fn on_entity_changed(
        &self,
        type_name: &str,
        entity: &EntityRecord,
        ctx: MutationContext,
    ) -> Result<HistoryRecord, CaptureError> {
        self.capture(type_name, entity, HistoryAction::Changed, ctx)
            .await
    }

    pub async fn on_entity_deleted(
        &self,
        type_name: &str,
        entity: &EntityRecord,
        ctx: MutationContext,
    ) -> Result<HistoryRecord, CaptureError> {
        self.capture(type_name, entity, HistoryAction::Deleted, ctx)
            .await
    }

    async fn capture(
        &self,
        type_name: &str,
        entity: &EntityRecord,
        action: HistoryAction,
        ctx: MutationContext,
    ) -> Result<HistoryRecord, CaptureError> {
        if !self.registry.is_registered(type_name) {
            return Err(CaptureError::NotRegistered(type_name.to_string()));
        }

        let record = self
            .history
            .append(NewHistoryRecord {
                history_type: action,
                history_user_id: ctx.user_id,
                history_change_reason: ctx.change_reason,
                entity_type: type_name.to_string(),
                uid: entity.uid.clone(),
                version: entity.version,
                fields: entity.fields.clone(),
            })
            .await?;

        self.dispatch(&record).await?;
        Ok(record)
    }

    /// Match a fresh history record against webhook subscriptions and
    /// enqueue one task per subscriber. Zero matches is a cheap no-op.
    async fn dispatch(&self, record: &HistoryRecord) -> Result<()> {
        let event = Event::from_record(record);
        let names = event.event_names();

        let subscribers = self
            .subscriptions
            .find_overlapping(&names, SubscriptionKind::Webhook)
            .await?;
        if subscribers.is_empty() {
            debug!(event = %event, "no subscribers");
            return Ok(());
        }

        info!(
            event = %event,
            history_id = record.history_id,
            subscribers = subscribers.len(),
            "replicate"
        );
        for subscriber in subscribers {
            self.queue
                .enqueue(DeliveryTask::new(
                    subscriber.id,
                    record.entity_type.clone(),
                    record.history_id,
                ))
                .await?;
        }
        Ok(())
    }

    /// Whether any history exists for the given entity.
    pub async fn entity_exists(&self, type_name: &str, uid: &str) -> Result<bool> {
        let records = self.history.latest_per_entity(type_name).await?;
        Ok(records.iter().any(|r| r.uid == uid))
    }

    /// Re-enqueue the current latest record of every entity matching the
    /// given patterns, for one subscription. Used to backfill a recovering
    /// or newly-registered subscriber.
    pub async fn enqueue_latest(
        &self,
        subscription_id: Uuid,
        type_name: &str,
        action: Option<HistoryAction>,
        uid: Option<&str>,
    ) -> Result<usize, CaptureError> {
        if !self.registry.is_registered(type_name) {
            return Err(CaptureError::NotRegistered(type_name.to_string()));
        }

        let records = self.history.latest_per_entity(type_name).await?;
        let mut enqueued = 0;
        for record in records {
            if action.map_or(false, |a| record.history_type != a) {
                continue;
            }
            if uid.map_or(false, |u| record.uid != u) {
                continue;
            }
            self.queue
                .enqueue(DeliveryTask::new(
                    subscription_id,
                    record.entity_type.clone(),
                    record.history_id,
                ))
                .await?;
            enqueued += 1;
        }
        Ok(enqueued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Principal;
    use crate::domains::eventsourcing::models::{
        EntitySchema, FieldDef, Subscription, WebhookSettings,
    };
    use crate::domains::eventsourcing::store::{InMemoryHistoryStore, InMemorySubscriptionStore};
    use crate::kernel::delivery::InMemoryDeliveryQueue;
    use serde_json::{json, Map};

    fn contact_entity(uid: &str, version: i64, name: &str) -> EntityRecord {
        let mut fields = Map::new();
        fields.insert("name".to_string(), json!(name));
        EntityRecord::new(uid, version, fields)
    }

    struct Fixture {
        replicator: Replicator,
        subscriptions: Arc<InMemorySubscriptionStore>,
        queue: Arc<InMemoryDeliveryQueue>,
    }

    async fn fixture() -> Fixture {
        let mut registry = ReplicatingRegistry::new();
        registry
            .register(
                "contact",
                EntitySchema::new(
                    "contact",
                    vec![
                        FieldDef::scalar("uid"),
                        FieldDef::scalar("version"),
                        FieldDef::scalar("name"),
                    ],
                ),
            )
            .unwrap();

        let subscriptions = Arc::new(InMemorySubscriptionStore::new());
        let queue = Arc::new(InMemoryDeliveryQueue::new());
        let replicator = Replicator::new(
            Arc::new(registry),
            Arc::new(InMemoryHistoryStore::new()),
            subscriptions.clone(),
            queue.clone(),
        );
        Fixture {
            replicator,
            subscriptions,
            queue,
        }
    }

    async fn add_subscription(fixture: &Fixture, events: Vec<&str>) -> Subscription {
        let subscription = Subscription::new(
            Principal::new(Uuid::new_v4(), "alice"),
            "s1",
            SubscriptionKind::Webhook,
            WebhookSettings::new("http://example.org/hook"),
            events.into_iter().map(String::from).collect(),
        );
        fixture
            .subscriptions
            .insert(subscription.clone())
            .await
            .unwrap();
        subscription
    }

    #[tokio::test]
    async fn test_unregistered_type_is_rejected() {
        let fixture = fixture().await;
        let err = fixture
            .replicator
            .on_entity_created(
                "comment",
                &contact_entity("U1", 1, "A"),
                MutationContext::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::NotRegistered(_)));
    }

    #[tokio::test]
    async fn test_capture_without_subscribers_enqueues_nothing() {
        let fixture = fixture().await;
        let record = fixture
            .replicator
            .on_entity_created(
                "contact",
                &contact_entity("U1", 1, "A"),
                MutationContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(record.history_type, HistoryAction::Created);
        assert!(fixture.queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_creation_pattern_matches_only_creations() {
        let fixture = fixture().await;
        add_subscription(&fixture, vec!["contact.+"]).await;

        fixture
            .replicator
            .on_entity_created(
                "contact",
                &contact_entity("U1", 1, "A"),
                MutationContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(fixture.queue.len().await, 1);

        fixture
            .replicator
            .on_entity_changed(
                "contact",
                &contact_entity("U1", 2, "B"),
                MutationContext::default(),
            )
            .await
            .unwrap();
        fixture
            .replicator
            .on_entity_deleted(
                "contact",
                &contact_entity("U1", 3, "B"),
                MutationContext::default(),
            )
            .await
            .unwrap();

        // still only the creation task
        assert_eq!(fixture.queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_enqueue_latest_backfills_per_entity() {
        let fixture = fixture().await;
        let subscription = add_subscription(&fixture, vec!["contact"]).await;

        for (uid, version) in [("U1", 1), ("U2", 1), ("U1", 2)] {
            let entity = contact_entity(uid, version, "X");
            if version == 1 {
                fixture
                    .replicator
                    .on_entity_created("contact", &entity, MutationContext::default())
                    .await
                    .unwrap();
            } else {
                fixture
                    .replicator
                    .on_entity_changed("contact", &entity, MutationContext::default())
                    .await
                    .unwrap();
            }
        }
        // drop the capture-time tasks, keep only the backfill
        let _ = fixture
            .queue
            .claim_ready(chrono::Utc::now(), 100)
            .await
            .unwrap();

        let enqueued = fixture
            .replicator
            .enqueue_latest(subscription.id, "contact", None, None)
            .await
            .unwrap();
        assert_eq!(enqueued, 2);
        assert_eq!(fixture.queue.len().await, 2);
    }
}
