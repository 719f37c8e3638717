//! Authorized rendering of history records.
//!
//! Webhook payloads are rendered through the same view the live history
//! endpoint uses, as the subscription owner. Permission rules are therefore
//! enforced exactly once: a payload can never be richer than what the owner
//! could read themselves, and a permission change applies to future
//! deliveries with no extra code.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::common::{Page, Principal};

use super::models::{HistoryRecord, WebhookSettings};
use super::registry::ReplicatingRegistry;
use super::store::HistoryStore;

/// Envelope revision this view knows how to render. Bumped together with
/// a new `render_record` shape; subscriptions pin the version they expect.
pub const LATEST_API_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("no permission to read \"{0}\" history")]
    PermissionDenied(String),
    #[error("unknown type \"{0}\"")]
    UnknownType(String),
    #[error("unsupported api version {0}")]
    UnsupportedApiVersion(u32),
    #[error("serialize api no content")]
    NoContent,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Read-permission checks, evaluated against the caller's identity.
///
/// Field-level permission evaluation lives outside this crate; the pipeline
/// only asks whether the principal may read a type's history at all.
pub trait Permissions: Send + Sync {
    fn can_view_history(&self, principal: &Principal, type_name: &str) -> bool;
}

/// Permissive default used by tests and single-tenant deployments.
pub struct AllowAll;

impl Permissions for AllowAll {
    fn can_view_history(&self, _principal: &Principal, _type_name: &str) -> bool {
        true
    }
}

/// Filter accepted by the history view.
#[derive(Debug, Clone)]
pub struct HistoryFilter {
    pub history_id: Option<i64>,
    /// Envelope revision the caller expects, from the subscription's
    /// pinned `api_version`
    pub api_version: u32,
}

impl Default for HistoryFilter {
    fn default() -> Self {
        Self {
            history_id: None,
            api_version: LATEST_API_VERSION,
        }
    }
}

/// The authorized read path, shared by the live history endpoint and the
/// webhook serializer so there is exactly one permission codepath. The
/// filter carries the subscription's pinned `api_version`; a view rejects
/// revisions it cannot render.
#[async_trait]
pub trait AuthorizedView: Send + Sync {
    async fn render_history(
        &self,
        principal: &Principal,
        type_name: &str,
        filter: HistoryFilter,
    ) -> Result<Page, SerializeError>;
}

/// Default view over the registry and history store.
pub struct HistoryApiView {
    registry: Arc<ReplicatingRegistry>,
    history: Arc<dyn HistoryStore>,
    permissions: Arc<dyn Permissions>,
}

impl HistoryApiView {
    pub fn new(
        registry: Arc<ReplicatingRegistry>,
        history: Arc<dyn HistoryStore>,
        permissions: Arc<dyn Permissions>,
    ) -> Self {
        Self {
            registry,
            history,
            permissions,
        }
    }
}

#[async_trait]
impl AuthorizedView for HistoryApiView {
    async fn render_history(
        &self,
        principal: &Principal,
        type_name: &str,
        filter: HistoryFilter,
    ) -> Result<Page, SerializeError> {
        // One envelope revision so far; a subscription pinning anything else
        // must fail here so the subscribe-time probe catches it.
        if filter.api_version != LATEST_API_VERSION {
            return Err(SerializeError::UnsupportedApiVersion(filter.api_version));
        }
        if !self.registry.is_registered(type_name) {
            return Err(SerializeError::UnknownType(type_name.to_string()));
        }
        if !self.permissions.can_view_history(principal, type_name) {
            return Err(SerializeError::PermissionDenied(type_name.to_string()));
        }

        let records = self.history.list(type_name, filter.history_id).await?;
        debug!(
            type_name,
            history_id = ?filter.history_id,
            count = records.len(),
            "rendered history view"
        );
        Ok(Page::single(records.iter().map(render_record).collect()))
    }
}

/// Render one history record into its wire object: the entity fields plus
/// history metadata and the `_uid`/`_type`/`_version` identity triple.
pub fn render_record(record: &HistoryRecord) -> Value {
    // BTreeMap keeps the rendered key order stable across deliveries
    let mut obj: BTreeMap<String, Value> = record
        .fields
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    obj.insert("history_id".into(), record.history_id.into());
    obj.insert(
        "history_type".into(),
        Value::String(record.history_type.as_str().to_string()),
    );
    obj.insert(
        "history_date".into(),
        Value::String(record.history_date.to_rfc3339()),
    );
    obj.insert(
        "history_user_id".into(),
        record
            .history_user_id
            .map(|id| Value::String(id.to_string()))
            .unwrap_or(Value::Null),
    );
    obj.insert(
        "history_change_reason".into(),
        record
            .history_change_reason
            .clone()
            .map(Value::String)
            .unwrap_or(Value::Null),
    );
    obj.insert("_uid".into(), Value::String(record.uid.clone()));
    obj.insert("_type".into(), Value::String(record.entity_type.clone()));
    obj.insert("_version".into(), record.version.into());

    Value::Object(obj.into_iter().collect())
}

/// Serialize one history record for the subscription owner, as a canonical
/// JSON envelope. Fails when the owner cannot read the history endpoint or
/// the record is not visible through it.
pub async fn serialize(
    view: &dyn AuthorizedView,
    owner: &Principal,
    settings: &WebhookSettings,
    record: &HistoryRecord,
) -> Result<String, SerializeError> {
    let filter = HistoryFilter {
        history_id: Some(record.history_id),
        api_version: settings.api_version,
    };
    let page = view
        .render_history(owner, &record.entity_type, filter)
        .await?;
    if page.is_empty() {
        return Err(SerializeError::NoContent);
    }
    serde_json::to_string(&page).map_err(|e| SerializeError::Storage(e.into()))
}

/// Probe the serialize path for a type without needing a live record.
///
/// Lets operators audit "is this type deliverable to this owner" before a
/// mutation ever fires.
pub async fn check_serializable(
    view: &dyn AuthorizedView,
    owner: &Principal,
    settings: &WebhookSettings,
    type_name: &str,
) -> Result<(), SerializeError> {
    let filter = HistoryFilter {
        history_id: None,
        api_version: settings.api_version,
    };
    view.render_history(owner, type_name, filter).await?;
    Ok(())
}

/// Per-type deliverability report for an owner: `OK` or `ERROR: <reason>`.
pub async fn subscription_statuses(
    view: &dyn AuthorizedView,
    registry: &ReplicatingRegistry,
    owner: &Principal,
    settings: &WebhookSettings,
) -> BTreeMap<String, String> {
    let mut statuses = BTreeMap::new();
    for (type_name, _) in registry.all_registered() {
        let status = match check_serializable(view, owner, settings, type_name).await {
            Ok(()) => "OK".to_string(),
            Err(e) => format!("ERROR: {e}"),
        };
        statuses.insert(type_name.to_string(), status);
    }
    statuses
}
