//! Inbound webhook receiver.
//!
//! Counterpart to the delivery worker: accepts the canonical page envelope,
//! validates its shape and applies every record through the replica
//! processor. Answers 200 only once everything is durably applied, so the
//! producer's at-least-once retry loop can key off the status code alone.

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use tracing::warn;

use crate::domains::replica::processor::WebhookEnvelope;
use crate::server::app::AppState;

use super::ApiError;

/// POST /api/v1/webhook
pub async fn webhook_handler(
    Extension(state): Extension<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, Response> {
    let envelope: WebhookEnvelope = serde_json::from_value(body)
        .map_err(|e| bad_payload(e.to_string()).into_response())?;
    envelope
        .validate()
        .map_err(|e| bad_payload(e.to_string()).into_response())?;

    if let Err(e) = state.replica.processor.process_envelope(&envelope).await {
        warn!(error = %e, "webhook processing failed");
        return Err((
            StatusCode::CONFLICT,
            Json(json!({
                "code": "webhook_processing_error",
                "message": e.to_string(),
            })),
        )
            .into_response());
    }

    Ok(Json(json!({"status": "ok"})))
}

fn bad_payload(message: String) -> ApiError {
    ApiError::bad_request("invalid_payload", message)
}
