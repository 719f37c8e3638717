use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// What happened to the tracked entity.
///
/// Serialized as the single-character tags the wire format uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryAction {
    #[serde(rename = "+")]
    Created,
    #[serde(rename = "~")]
    Changed,
    #[serde(rename = "-")]
    Deleted,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Created => "+",
            HistoryAction::Changed => "~",
            HistoryAction::Deleted => "-",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "+" => Some(HistoryAction::Created),
            "~" => Some(HistoryAction::Changed),
            "-" => Some(HistoryAction::Deleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable snapshot of one entity mutation.
///
/// Appended exactly once per mutation by history capture, never changed or
/// deleted afterwards. `history_id` is assigned by the store and strictly
/// increases within a type's stream, so downstream consumers can use it as
/// a dedup and ordering token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub history_id: i64,
    pub history_type: HistoryAction,
    pub history_date: DateTime<Utc>,
    pub history_user_id: Option<Uuid>,
    pub history_change_reason: Option<String>,

    pub entity_type: String,
    pub uid: String,
    pub version: i64,
    pub fields: Map<String, Value>,
}

/// A new record handed to the history store, before an id is assigned.
#[derive(Debug, Clone)]
pub struct NewHistoryRecord {
    pub history_type: HistoryAction,
    pub history_user_id: Option<Uuid>,
    pub history_change_reason: Option<String>,
    pub entity_type: String,
    pub uid: String,
    pub version: i64,
    pub fields: Map<String, Value>,
}

/// Transient wrapper binding a history record to its derived identity.
///
/// Never persisted; lives only for the capture → match → enqueue hop.
#[derive(Debug, Clone)]
pub struct Event {
    pub entity_type: String,
    pub action: HistoryAction,
    pub uid: String,
    pub version: i64,
    pub history_id: i64,
}

impl Event {
    pub fn from_record(record: &HistoryRecord) -> Self {
        Self {
            entity_type: record.entity_type.clone(),
            action: record.history_type,
            uid: record.uid.clone(),
            version: record.version,
            history_id: record.history_id,
        }
    }

    /// Coarse-to-fine names a subscription's `events` set is matched against.
    pub fn event_names(&self) -> [String; 3] {
        let t = &self.entity_type;
        let a = self.action.as_str();
        [
            t.clone(),
            format!("{t}.{a}"),
            format!("{t}.{a}.{}", self.uid),
        ]
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{} (v={})",
            self.entity_type, self.action, self.uid, self.version
        )
    }
}
