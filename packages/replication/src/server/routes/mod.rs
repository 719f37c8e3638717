pub mod health;
pub mod subscriptions;
pub mod webhook;

pub use health::health_handler;
pub use subscriptions::{
    list_subscriptions_handler, re_replicate_handler, statuses_handler, subscribe_handler,
    unsubscribe_handler,
};
pub use webhook::webhook_handler;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::common::Principal;
use crate::domains::eventsourcing::SubscribeError;

/// Error envelope every management endpoint renders: a stable machine
/// readable `code` plus a human readable `message`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({"code": self.code, "message": self.message})),
        )
            .into_response()
    }
}

impl From<SubscribeError> for ApiError {
    fn from(err: SubscribeError) -> Self {
        let status = match &err {
            SubscribeError::NotYourSubscription => StatusCode::FORBIDDEN,
            SubscribeError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        Self::new(status, err.code(), err.to_string())
    }
}

/// Resolve the acting principal from the gateway-injected identity headers.
///
/// Authentication itself happens upstream; this service only trusts
/// `x-user-id` and `x-user-name` the way the deployment's proxy sets them.
pub fn principal_from_headers(headers: &HeaderMap) -> Result<Principal, ApiError> {
    let id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "missing or invalid x-user-id header",
            )
        })?;
    let username = headers
        .get("x-user-name")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "missing x-user-name header",
            )
        })?;
    Ok(Principal::new(id, username))
}
