use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::kernel::delivery::DeliveryQueue;
use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    delivery_queue: DeliveryQueueHealth,
}

#[derive(Serialize)]
pub struct DeliveryQueueHealth {
    status: String,
    depth: usize,
}

/// Health check endpoint
///
/// Reports the delivery queue depth so operators can spot a stuck or
/// backlogged worker. Always 200 while the process is serving.
pub async fn health_handler(
    Extension(state): Extension<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let depth = state.replication.queue.len().await;

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            delivery_queue: DeliveryQueueHealth {
                status: "ok".to_string(),
                depth,
            },
        }),
    )
}
