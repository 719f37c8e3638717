//! Local replica storage.
//!
//! The version gate lives inside the store: every apply is a single atomic
//! compare-and-upsert under the store's own lock, the contract a SQL
//! implementation must honor with `UPDATE ... WHERE version < $incoming`.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

/// A locally stored copy of a remote entity.
///
/// `version` always carries the authoritative upstream value; `deleted` is
/// a soft-delete marker so dependent replicas keep resolving.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaRecord {
    pub uid: String,
    pub version: i64,
    pub fields: Map<String, Value>,
    pub deleted: Option<DateTime<Utc>>,
}

/// Outcome of a version-gated write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    /// Incoming version was not strictly greater than the stored one
    Stale { current: i64 },
}

#[async_trait]
pub trait ReplicaStore: Send + Sync {
    async fn get(&self, type_name: &str, uid: &str) -> Result<Option<ReplicaRecord>>;

    /// Version-gated upsert: create the row if absent, overwrite it only if
    /// `version` is strictly greater than the stored version. Atomic.
    async fn apply(
        &self,
        type_name: &str,
        uid: &str,
        version: i64,
        fields: Map<String, Value>,
    ) -> Result<ApplyOutcome>;

    /// Version-gated soft delete (`version >= stored` wins, matching the
    /// upstream delete gate).
    async fn soft_delete(&self, type_name: &str, uid: &str, version: i64)
        -> Result<ApplyOutcome>;

    /// Hard removal, same gate as [`soft_delete`].
    async fn remove(&self, type_name: &str, uid: &str, version: i64) -> Result<ApplyOutcome>;
}

/// In-memory replica store, one table per type.
#[derive(Default)]
pub struct InMemoryReplicaStore {
    tables: RwLock<HashMap<String, HashMap<String, ReplicaRecord>>>,
}

impl InMemoryReplicaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReplicaStore for InMemoryReplicaStore {
    async fn get(&self, type_name: &str, uid: &str) -> Result<Option<ReplicaRecord>> {
        Ok(self
            .tables
            .read()
            .await
            .get(type_name)
            .and_then(|t| t.get(uid))
            .cloned())
    }

    async fn apply(
        &self,
        type_name: &str,
        uid: &str,
        version: i64,
        fields: Map<String, Value>,
    ) -> Result<ApplyOutcome> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(type_name.to_string()).or_default();

        match table.get_mut(uid) {
            None => {
                table.insert(
                    uid.to_string(),
                    ReplicaRecord {
                        uid: uid.to_string(),
                        version,
                        fields,
                        deleted: None,
                    },
                );
                Ok(ApplyOutcome::Created)
            }
            Some(existing) if version > existing.version => {
                existing.version = version;
                existing.fields = fields;
                existing.deleted = None;
                Ok(ApplyOutcome::Updated)
            }
            Some(existing) => Ok(ApplyOutcome::Stale {
                current: existing.version,
            }),
        }
    }

    async fn soft_delete(
        &self,
        type_name: &str,
        uid: &str,
        version: i64,
    ) -> Result<ApplyOutcome> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(type_name.to_string()).or_default();

        match table.get_mut(uid) {
            None => Ok(ApplyOutcome::Stale { current: 0 }),
            Some(existing) if version >= existing.version => {
                existing.version = version;
                existing.deleted = Some(Utc::now());
                Ok(ApplyOutcome::Updated)
            }
            Some(existing) => Ok(ApplyOutcome::Stale {
                current: existing.version,
            }),
        }
    }

    async fn remove(&self, type_name: &str, uid: &str, version: i64) -> Result<ApplyOutcome> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(type_name.to_string()).or_default();

        match table.get(uid) {
            None => Ok(ApplyOutcome::Stale { current: 0 }),
            Some(existing) if version >= existing.version => {
                table.remove(uid);
                Ok(ApplyOutcome::Updated)
            }
            Some(existing) => Ok(ApplyOutcome::Stale {
                current: existing.version,
            }),
        }
    }
}
