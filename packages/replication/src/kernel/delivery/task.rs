use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One pending webhook delivery.
///
/// Carries references only, never the payload: the worker re-fetches the
/// freshest access-controlled view at delivery time, and tasks stay small
/// enough for any queue backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryTask {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub entity_type: String,
    pub history_id: i64,
    /// Attempts already made; 0 for a fresh task
    pub attempt: u32,
    /// Not ready before this instant (set by retry scheduling)
    pub run_at: DateTime<Utc>,
}

impl DeliveryTask {
    pub fn new(subscription_id: Uuid, entity_type: impl Into<String>, history_id: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscription_id,
            entity_type: entity_type.into(),
            history_id,
            attempt: 0,
            run_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for DeliveryTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}#{} -> {}",
            self.entity_type, self.history_id, self.subscription_id
        )
    }
}
