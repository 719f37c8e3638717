//! Central dependency container (using traits for testability)
//!
//! Route handlers and the delivery worker reach every external concern
//! through this bundle. All storage and transport seams are trait objects so
//! tests can swap them for in-memory or scripted implementations.

use std::sync::Arc;

use crate::domains::eventsourcing::serializer::{AuthorizedView, HistoryApiView, Permissions};
use crate::domains::eventsourcing::store::{
    HistoryStore, InMemoryHistoryStore, InMemorySubscriptionStore, SubscriptionStore,
};
use crate::domains::eventsourcing::{Replicator, ReplicatingRegistry};
use crate::domains::replica::{Processor, ReplicatedRegistry, ReplicaStore};
use crate::kernel::delivery::{DeliveryQueue, InMemoryDeliveryQueue};

/// Dependencies shared by the API routes and the delivery worker.
#[derive(Clone)]
pub struct ReplicationDeps {
    pub registry: Arc<ReplicatingRegistry>,
    pub history: Arc<dyn HistoryStore>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub queue: Arc<dyn DeliveryQueue>,
    pub permissions: Arc<dyn Permissions>,
    /// The authorized read path payloads are rendered through
    pub view: Arc<dyn AuthorizedView>,
    pub replicator: Arc<Replicator>,
    /// API version stamped onto new subscriptions
    pub latest_api_version: u32,
}

impl ReplicationDeps {
    pub fn new(
        registry: Arc<ReplicatingRegistry>,
        history: Arc<dyn HistoryStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        queue: Arc<dyn DeliveryQueue>,
        permissions: Arc<dyn Permissions>,
        latest_api_version: u32,
    ) -> Self {
        let view: Arc<dyn AuthorizedView> = Arc::new(HistoryApiView::new(
            registry.clone(),
            history.clone(),
            permissions.clone(),
        ));
        let replicator = Arc::new(Replicator::new(
            registry.clone(),
            history.clone(),
            subscriptions.clone(),
            queue.clone(),
        ));
        Self {
            registry,
            history,
            subscriptions,
            queue,
            permissions,
            view,
            replicator,
            latest_api_version,
        }
    }

    /// Wire everything against in-memory stores.
    pub fn in_memory(
        registry: Arc<ReplicatingRegistry>,
        permissions: Arc<dyn Permissions>,
    ) -> Self {
        Self::new(
            registry,
            Arc::new(InMemoryHistoryStore::new()),
            Arc::new(InMemorySubscriptionStore::new()),
            Arc::new(InMemoryDeliveryQueue::new()),
            permissions,
            1,
        )
    }
}

/// Consumer-side dependencies for the inbound webhook endpoint.
#[derive(Clone)]
pub struct ReplicaDeps {
    pub registry: Arc<ReplicatedRegistry>,
    pub store: Arc<dyn ReplicaStore>,
    pub processor: Arc<Processor>,
}

impl ReplicaDeps {
    pub fn new(registry: Arc<ReplicatedRegistry>, store: Arc<dyn ReplicaStore>) -> Self {
        let processor = Arc::new(Processor::new(registry.clone(), store.clone()));
        Self {
            registry,
            store,
            processor,
        }
    }

    pub fn with_processor(mut self, processor: Arc<Processor>) -> Self {
        self.processor = processor;
        self
    }
}
