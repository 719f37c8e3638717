//! Storage seams for the producer side.
//!
//! The pipeline talks to subscriptions and history through these traits so
//! the relational engine stays an external collaborator. The in-memory
//! implementations back the server default wiring and every test.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{
    HistoryRecord, NewHistoryRecord, Subscription, SubscriptionKind,
};

/// Persisted subscription records.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Subscription>>;

    async fn get_by_name(
        &self,
        name: &str,
        kind: SubscriptionKind,
    ) -> Result<Option<Subscription>>;

    /// Subscriptions of `kind` whose `events` set intersects `names`.
    ///
    /// This is the hot path called inline with every tracked mutation; it
    /// must stay a plain indexed/overlap lookup with no I/O beyond storage.
    async fn find_overlapping(
        &self,
        names: &[String],
        kind: SubscriptionKind,
    ) -> Result<Vec<Subscription>>;

    async fn insert(&self, subscription: Subscription) -> Result<()>;

    /// Persist changed `settings`/`events`, bumping `version` and `updated`.
    async fn update(&self, subscription: Subscription) -> Result<()>;

    async fn delete(&self, id: Uuid) -> Result<()>;

    async fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<Subscription>>;
}

/// Append-only history streams, one per entity type.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a record, assigning the next `history_id` of the stream.
    async fn append(&self, record: NewHistoryRecord) -> Result<HistoryRecord>;

    async fn get(&self, entity_type: &str, history_id: i64) -> Result<Option<HistoryRecord>>;

    /// Records of a stream, oldest first, optionally filtered by history_id.
    async fn list(
        &self,
        entity_type: &str,
        history_id: Option<i64>,
    ) -> Result<Vec<HistoryRecord>>;

    /// The most recent record of every entity in a stream.
    async fn latest_per_entity(&self, entity_type: &str) -> Result<Vec<HistoryRecord>>;
}

/// In-memory subscription store.
#[derive(Default)]
pub struct InMemorySubscriptionStore {
    rows: RwLock<HashMap<Uuid, Subscription>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn get(&self, id: Uuid) -> Result<Option<Subscription>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn get_by_name(
        &self,
        name: &str,
        kind: SubscriptionKind,
    ) -> Result<Option<Subscription>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|s| s.name == name && s.kind == kind)
            .cloned())
    }

    async fn find_overlapping(
        &self,
        names: &[String],
        kind: SubscriptionKind,
    ) -> Result<Vec<Subscription>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|s| s.kind == kind && s.events.iter().any(|e| names.contains(e)))
            .cloned()
            .collect())
    }

    async fn insert(&self, subscription: Subscription) -> Result<()> {
        self.rows
            .write()
            .await
            .insert(subscription.id, subscription);
        Ok(())
    }

    async fn update(&self, mut subscription: Subscription) -> Result<()> {
        subscription.version += 1;
        subscription.updated = Utc::now();
        self.rows
            .write()
            .await
            .insert(subscription.id, subscription);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.rows.write().await.remove(&id);
        Ok(())
    }

    async fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<Subscription>> {
        let mut rows: Vec<Subscription> = self
            .rows
            .read()
            .await
            .values()
            .filter(|s| s.owner.id == owner_id)
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.created);
        Ok(rows)
    }
}

/// In-memory append-only history store.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    streams: RwLock<HashMap<String, Vec<HistoryRecord>>>,
    next_id: AtomicI64,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, record: NewHistoryRecord) -> Result<HistoryRecord> {
        let history_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = HistoryRecord {
            history_id,
            history_type: record.history_type,
            history_date: Utc::now(),
            history_user_id: record.history_user_id,
            history_change_reason: record.history_change_reason,
            entity_type: record.entity_type,
            uid: record.uid,
            version: record.version,
            fields: record.fields,
        };
        self.streams
            .write()
            .await
            .entry(record.entity_type.clone())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn get(&self, entity_type: &str, history_id: i64) -> Result<Option<HistoryRecord>> {
        Ok(self
            .streams
            .read()
            .await
            .get(entity_type)
            .and_then(|stream| stream.iter().find(|r| r.history_id == history_id))
            .cloned())
    }

    async fn list(
        &self,
        entity_type: &str,
        history_id: Option<i64>,
    ) -> Result<Vec<HistoryRecord>> {
        Ok(self
            .streams
            .read()
            .await
            .get(entity_type)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|r| history_id.map_or(true, |id| r.history_id == id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest_per_entity(&self, entity_type: &str) -> Result<Vec<HistoryRecord>> {
        let streams = self.streams.read().await;
        let Some(stream) = streams.get(entity_type) else {
            return Ok(Vec::new());
        };

        // Streams are append-ordered, so the last record per uid wins.
        let mut latest: HashMap<&str, &HistoryRecord> = HashMap::new();
        for record in stream {
            latest.insert(record.uid.as_str(), record);
        }
        let mut records: Vec<HistoryRecord> = latest.into_values().cloned().collect();
        records.sort_by_key(|r| r.history_id);
        Ok(records)
    }
}
