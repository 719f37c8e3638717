//! Producer side of the replication pipeline.
//!
//! Tracked entity mutations are captured as immutable history records,
//! matched against webhook subscriptions and handed to the delivery kernel.

pub mod capture;
pub mod models;
pub mod registry;
pub mod serializer;
pub mod store;
pub mod subscriptions;

pub use capture::{CaptureError, MutationContext, Replicator};
pub use models::*;
pub use registry::{RegistryError, ReplicatingRegistry};
pub use serializer::{
    check_serializable, render_record, serialize, subscription_statuses, AllowAll,
    AuthorizedView, HistoryApiView, HistoryFilter, Permissions, SerializeError,
    LATEST_API_VERSION,
};
pub use store::{
    HistoryStore, InMemoryHistoryStore, InMemorySubscriptionStore, SubscriptionStore,
};
pub use subscriptions::{
    re_replicate, subscribe, unsubscribe, validate_settings, validate_subscribe_input,
    EventPattern, SubscribeError,
};
