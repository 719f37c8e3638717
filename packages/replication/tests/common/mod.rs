//! Shared in-memory test harness.
//!
//! Wires both sides of the pipeline into one process: the producer's stores
//! and delivery worker, and a consumer whose replica store the tests can
//! inspect. The transport loops payloads straight into the consumer's
//! processor so end-to-end tests run without a network.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map};
use uuid::Uuid;

use replication_core::common::Principal;
use replication_core::domains::eventsourcing::{
    subscribe, AllowAll, EntityRecord, EntitySchema, FieldDef, ReplicatingRegistry, Subscription,
    SubscriptionKind, WebhookSettings,
};
use replication_core::domains::replica::processor::WebhookEnvelope;
use replication_core::domains::replica::{InMemoryReplicaStore, Processor, ReplicatedRegistry};
use replication_core::kernel::delivery::{
    DeliveryError, DeliveryWorker, RetryPolicy, WebhookTransport,
};
use replication_core::kernel::{ReplicaDeps, ReplicationDeps};

pub fn schemas() -> Vec<EntitySchema> {
    vec![
        EntitySchema::new(
            "contact",
            vec![
                FieldDef::scalar("uid"),
                FieldDef::scalar("version"),
                FieldDef::scalar("name"),
                FieldDef::scalar("phones"),
            ],
        ),
        EntitySchema::new(
            "comment",
            vec![
                FieldDef::scalar("uid"),
                FieldDef::scalar("version"),
                FieldDef::scalar("message"),
                FieldDef::relation("contact", "contact"),
            ],
        ),
    ]
}

pub fn replicating_registry() -> Arc<ReplicatingRegistry> {
    let mut registry = ReplicatingRegistry::new();
    for schema in schemas() {
        registry
            .register(schema.type_name.clone(), schema)
            .expect("schema registration");
    }
    Arc::new(registry)
}

pub fn replicated_registry() -> Arc<ReplicatedRegistry> {
    let mut registry = ReplicatedRegistry::new();
    for schema in schemas() {
        registry
            .register(schema.type_name.clone(), schema)
            .expect("schema registration");
    }
    Arc::new(registry)
}

/// Transport that applies payloads directly through the consumer processor,
/// optionally failing the first N attempts to exercise the retry loop.
pub struct LoopbackTransport {
    processor: Arc<Processor>,
    fail_first: AtomicU32,
    pub delivered: AtomicU32,
}

impl LoopbackTransport {
    pub fn new(processor: Arc<Processor>) -> Self {
        Self {
            processor,
            fail_first: AtomicU32::new(0),
            delivered: AtomicU32::new(0),
        }
    }

    pub fn failing_first(processor: Arc<Processor>, failures: u32) -> Self {
        let transport = Self::new(processor);
        transport.fail_first.store(failures, Ordering::SeqCst);
        transport
    }

    pub fn delivered_count(&self) -> u32 {
        self.delivered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebhookTransport for LoopbackTransport {
    async fn deliver(
        &self,
        _settings: &WebhookSettings,
        payload: &str,
    ) -> Result<(), DeliveryError> {
        if self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(DeliveryError::Connection("scripted failure".to_string()));
        }

        let envelope: WebhookEnvelope = serde_json::from_str(payload)
            .map_err(|e| DeliveryError::BadSettings(e.to_string()))?;
        envelope
            .validate()
            .map_err(|_| DeliveryError::Status(400))?;
        match self.processor.process_envelope(&envelope).await {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(_) => Err(DeliveryError::Status(409)),
        }
    }
}

/// Both sides of the pipeline plus the worker that connects them.
pub struct TestHarness {
    pub replication: ReplicationDeps,
    pub replica: ReplicaDeps,
    pub replica_store: Arc<InMemoryReplicaStore>,
    pub transport: Arc<LoopbackTransport>,
    pub worker: DeliveryWorker,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_failures(0, RetryPolicy::default())
    }

    pub fn with_failures(failures: u32, policy: RetryPolicy) -> Self {
        let replication = ReplicationDeps::in_memory(replicating_registry(), Arc::new(AllowAll));
        let replica_store = Arc::new(InMemoryReplicaStore::new());
        let replica = ReplicaDeps::new(replicated_registry(), replica_store.clone());
        let transport = Arc::new(LoopbackTransport::failing_first(
            replica.processor.clone(),
            failures,
        ));
        let worker = DeliveryWorker::new(
            replication.queue.clone(),
            replication.subscriptions.clone(),
            replication.history.clone(),
            replication.view.clone(),
            transport.clone(),
            policy,
        );
        Self {
            replication,
            replica,
            replica_store,
            transport,
            worker,
        }
    }

    pub async fn subscribe_all(&self, owner: &Principal, name: &str) -> Subscription {
        subscribe(
            self.replication.subscriptions.as_ref(),
            owner,
            name,
            SubscriptionKind::Webhook,
            WebhookSettings::new("http://consumer.test/webhook"),
            vec!["contact".to_string(), "comment".to_string()],
        )
        .await
        .expect("subscribe")
    }
}

pub fn alice() -> Principal {
    Principal::new(Uuid::new_v4(), "alice")
}

pub fn contact(uid: &str, version: i64, name: &str) -> EntityRecord {
    let mut fields = Map::new();
    fields.insert("name".to_string(), json!(name));
    fields.insert("phones".to_string(), json!(["+1234567890"]));
    EntityRecord::new(uid, version, fields)
}

pub fn comment(uid: &str, version: i64, message: &str, contact_uid: &str) -> EntityRecord {
    let mut fields = Map::new();
    fields.insert("message".to_string(), json!(message));
    fields.insert(
        "contact".to_string(),
        json!({"_uid": contact_uid, "_type": "contact"}),
    );
    EntityRecord::new(uid, version, fields)
}
