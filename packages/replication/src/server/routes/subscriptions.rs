//! Subscription management endpoints.
//!
//! Validation mirrors the subscribe pipeline exactly: settings shape, event
//! patterns, read permission per type, then a serialize probe per type so a
//! subscription can never be created that would fail on its first delivery.

use std::collections::BTreeSet;

use axum::extract::{Extension, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::domains::eventsourcing::{
    check_serializable, re_replicate, subscribe, subscription_statuses, unsubscribe,
    validate_settings, validate_subscribe_input, EventPattern, Subscription, SubscriptionKind,
    SubscriptionStore,
};
use crate::server::app::AppState;

use super::{principal_from_headers, ApiError};

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SubscriptionKind,
    pub settings: Value,
    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SubscriptionKind,
    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct NamedSubscriptionQuery {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct ReReplicateRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SubscriptionKind,
    pub events: Vec<String>,
}

fn storage_error(e: anyhow::Error) -> ApiError {
    ApiError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "storage_error",
        e.to_string(),
    )
}

/// POST /api/v1/subscriptions
pub async fn subscribe_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Json(request): Json<SubscribeRequest>,
) -> Result<Json<Subscription>, ApiError> {
    let principal = principal_from_headers(&headers)?;
    let replication = &state.replication;

    let settings = validate_settings(&request.settings, replication.latest_api_version)?;
    validate_subscribe_input(
        &replication.registry,
        replication.permissions.as_ref(),
        &principal,
        &request.events,
    )?;

    // Probe the serialize path once per distinct type so a broken view is
    // caught at subscribe time, not on the first delivery.
    let mut checked = BTreeSet::new();
    for event in &request.events {
        let pattern = EventPattern::parse(event, &replication.registry)?;
        if !checked.insert(pattern.type_name.clone()) {
            continue;
        }
        if check_serializable(
            replication.view.as_ref(),
            &principal,
            &settings,
            &pattern.type_name,
        )
        .await
        .is_err()
        {
            return Err(ApiError::bad_request(
                "serialize",
                format!("serialize \"{event}\" event problem"),
            ));
        }
    }

    let subscription = subscribe(
        replication.subscriptions.as_ref(),
        &principal,
        &request.name,
        request.kind,
        settings,
        request.events,
    )
    .await?;
    Ok(Json(subscription))
}

/// DELETE /api/v1/subscriptions
pub async fn unsubscribe_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Json(request): Json<UnsubscribeRequest>,
) -> Result<Json<Subscription>, ApiError> {
    let principal = principal_from_headers(&headers)?;

    let subscription = unsubscribe(
        state.replication.subscriptions.as_ref(),
        &principal,
        &request.name,
        request.kind,
        &request.events,
    )
    .await?;
    Ok(Json(subscription))
}

/// GET /api/v1/subscriptions
pub async fn list_subscriptions_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Subscription>>, ApiError> {
    let principal = principal_from_headers(&headers)?;

    let subscriptions = state
        .replication
        .subscriptions
        .list_for_owner(principal.id)
        .await
        .map_err(storage_error)?;
    Ok(Json(subscriptions))
}

/// GET /api/v1/subscriptions/statuses?name=...
///
/// Per-type deliverability report for one subscription: `OK` or
/// `ERROR: <reason>` for every registered type.
pub async fn statuses_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Query(query): Query<NamedSubscriptionQuery>,
) -> Result<Json<Value>, ApiError> {
    let principal = principal_from_headers(&headers)?;
    let subscription = owned_subscription(&state, &principal, &query.name).await?;

    let statuses = subscription_statuses(
        state.replication.view.as_ref(),
        &state.replication.registry,
        &subscription.owner,
        &subscription.settings,
    )
    .await;
    Ok(Json(json!(statuses)))
}

/// POST /api/v1/subscriptions/replicate
///
/// Re-send the latest record of every entity matching the given patterns.
pub async fn re_replicate_handler(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Json(request): Json<ReReplicateRequest>,
) -> Result<Json<Value>, ApiError> {
    let principal = principal_from_headers(&headers)?;
    let subscription = owned_subscription(&state, &principal, &request.name).await?;

    let enqueued = re_replicate(&state.replication.replicator, &subscription, &request.events).await?;
    Ok(Json(json!({"status": "ok", "enqueued": enqueued})))
}

async fn owned_subscription(
    state: &AppState,
    principal: &crate::common::Principal,
    name: &str,
) -> Result<Subscription, ApiError> {
    let subscription = state
        .replication
        .subscriptions
        .get_by_name(name, SubscriptionKind::Webhook)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("subscription \"{name}\" does not exist"),
            )
        })?;
    if subscription.owner != *principal {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "not_your_subscription",
            "you are trying to access not your subscription",
        ));
    }
    Ok(subscription)
}
