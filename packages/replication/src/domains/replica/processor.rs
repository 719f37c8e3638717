//! Inbound webhook payload processing.
//!
//! Applies delivered history records into the replica store: envelope shape
//! checks, foreign-key re-resolution by stable uid and the version-gated
//! idempotent upsert. Stale and duplicate deliveries are absorbed silently;
//! everything else surfaces as a structured per-record error.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::domains::eventsourcing::models::{FieldKind, HistoryAction};

use super::registry::ReplicatedRegistry;
use super::store::{ApplyOutcome, ReplicaStore};

/// Envelope shape violations, rejected before any record is applied.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("results[{0}] is not an object")]
    NotAnObject(usize),
    #[error("results[{index}] has no \"{field}\"")]
    MissingField { index: usize, field: &'static str },
    #[error("results[{index}] \"{field}\" has wrong type")]
    WrongFieldType { index: usize, field: &'static str },
    #[error("results[{0}] history_type is not one of +, ~, -")]
    BadAction(usize),
    #[error("results[{0}] _version must be a positive integer")]
    BadVersion(usize),
}

/// The canonical inbound payload.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub count: i64,
    pub results: Vec<Value>,
}

impl WebhookEnvelope {
    /// Check every record carries the identity triple, a known action and a
    /// positive version before anything is applied.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        for (index, record) in self.results.iter().enumerate() {
            let obj = record
                .as_object()
                .ok_or(EnvelopeError::NotAnObject(index))?;

            for field in ["_type", "_uid", "history_date"] {
                let value = obj
                    .get(field)
                    .ok_or(EnvelopeError::MissingField { index, field })?;
                if !value.is_string() {
                    return Err(EnvelopeError::WrongFieldType { index, field });
                }
            }

            let version = obj.get("_version").ok_or(EnvelopeError::MissingField {
                index,
                field: "_version",
            })?;
            if !version.as_i64().is_some_and(|v| v > 0) {
                return Err(EnvelopeError::BadVersion(index));
            }

            let action = obj.get("history_type").ok_or(EnvelopeError::MissingField {
                index,
                field: "history_type",
            })?;
            let valid = action
                .as_str()
                .and_then(HistoryAction::parse)
                .is_some();
            if !valid {
                return Err(EnvelopeError::BadAction(index));
            }
        }
        Ok(())
    }
}

/// Structured per-record failure, rendered as
/// `"{type}.{action}.{uid}: {reason} (v={version})"`.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{entity_type}.{action}.{uid}: {reason} (v={version})")]
pub struct ProcessError {
    pub entity_type: String,
    pub action: String,
    pub uid: String,
    pub version: i64,
    pub reason: String,
}

/// What to do with incoming `-` (deleted) records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletePolicy {
    /// Accept but do not apply (the observed upstream behavior)
    #[default]
    Ignore,
    /// Stamp the `deleted` marker, version-gated
    SoftDelete,
    /// Remove the row, version-gated
    HardDelete,
}

/// Applies validated webhook records into the replica store.
pub struct Processor {
    registry: Arc<ReplicatedRegistry>,
    store: Arc<dyn ReplicaStore>,
    delete_policy: DeletePolicy,
}

impl Processor {
    pub fn new(registry: Arc<ReplicatedRegistry>, store: Arc<dyn ReplicaStore>) -> Self {
        Self {
            registry,
            store,
            delete_policy: DeletePolicy::default(),
        }
    }

    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    /// Apply every record of an envelope, stopping at the first failure.
    pub async fn process_envelope(&self, envelope: &WebhookEnvelope) -> Result<(), ProcessError> {
        for record in &envelope.results {
            if let Some(obj) = record.as_object() {
                self.process_record(obj).await?;
            }
        }
        Ok(())
    }

    /// Apply one record. Stale versions are a logged no-op, not an error,
    /// so at-least-once redeliveries stay side-effect free.
    pub async fn process_record(&self, record: &Map<String, Value>) -> Result<(), ProcessError> {
        // validated by WebhookEnvelope::validate
        let entity_type = record
            .get("_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let uid = record
            .get("_uid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let version = record
            .get("_version")
            .and_then(Value::as_i64)
            .unwrap_or_default();
        let action_tag = record
            .get("history_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let err = |reason: String| ProcessError {
            entity_type: entity_type.clone(),
            action: action_tag.to_string(),
            uid: uid.clone(),
            version,
            reason,
        };

        let action = HistoryAction::parse(&action_tag)
            .ok_or_else(|| err("Unsupported _action".to_string()))?;
        let schema = self
            .registry
            .lookup(&entity_type)
            .ok_or_else(|| err("Unsupported _type".to_string()))?
            .clone();

        info!(
            event = %format!("{entity_type}.{action_tag}.{uid}"),
            version,
            "process historical record"
        );

        match action {
            HistoryAction::Deleted => self.apply_delete(&entity_type, &uid, version).await,
            HistoryAction::Created | HistoryAction::Changed => {
                let mut attributes = Map::new();
                for field in &schema.fields {
                    if field.name == "uid" || field.name == "version" {
                        continue;
                    }
                    let Some(value) = record.get(&field.name) else {
                        continue;
                    };

                    let value = match &field.kind {
                        FieldKind::Scalar => value.clone(),
                        FieldKind::Relation { related_type } => {
                            if value.is_null() {
                                Value::Null
                            } else {
                                let related_uid = self
                                    .resolve_fk(&field.name, related_type, value)
                                    .await
                                    .map_err(&err)?;
                                Value::String(related_uid)
                            }
                        }
                    };
                    attributes.insert(field.name.clone(), value);
                }

                match self
                    .store
                    .apply(&entity_type, &uid, version, attributes)
                    .await
                    .map_err(|e| err(e.to_string()))?
                {
                    ApplyOutcome::Created | ApplyOutcome::Updated => Ok(()),
                    ApplyOutcome::Stale { current } => {
                        warn!(
                            event = %format!("{entity_type}.{action_tag}.{uid}"),
                            version,
                            current,
                            "old version, skipping"
                        );
                        Ok(())
                    }
                }
            }
        }
    }

    /// Resolve a relation field to the related replica's uid.
    async fn resolve_fk(
        &self,
        field: &str,
        related_type: &str,
        value: &Value,
    ) -> Result<String, String> {
        let related_uid = match value {
            Value::Object(fk) => {
                if !fk.contains_key("_uid") || !fk.contains_key("_type") {
                    return Err(format!("FK \"{field}\": no FK[_type] or no FK[_uid]"));
                }
                if fk["_type"].as_str() != Some(related_type) {
                    return Err(format!("FK \"{field}\": wrong FK[_type]"));
                }
                fk["_uid"]
                    .as_str()
                    .ok_or_else(|| format!("FK \"{field}\": type(_uid) != str"))?
                    .to_string()
            }
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        let exists = self
            .store
            .get(related_type, &related_uid)
            .await
            .map_err(|e| e.to_string())?
            .is_some();
        if !exists {
            return Err(format!("FK \"{field}\": DoesNotExists"));
        }
        Ok(related_uid)
    }

    async fn apply_delete(
        &self,
        entity_type: &str,
        uid: &str,
        version: i64,
    ) -> Result<(), ProcessError> {
        let outcome = match self.delete_policy {
            DeletePolicy::Ignore => {
                info!(entity_type, uid, version, "delete ignored by policy");
                return Ok(());
            }
            DeletePolicy::SoftDelete => self.store.soft_delete(entity_type, uid, version).await,
            DeletePolicy::HardDelete => self.store.remove(entity_type, uid, version).await,
        };

        match outcome {
            Ok(ApplyOutcome::Stale { current }) => {
                warn!(entity_type, uid, version, current, "delete skipped");
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) => Err(ProcessError {
                entity_type: entity_type.to_string(),
                action: "-".to_string(),
                uid: uid.to_string(),
                version,
                reason: e.to_string(),
            }),
        }
    }
}
