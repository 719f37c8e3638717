//! Application setup and server configuration.

use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::kernel::{ReplicaDeps, ReplicationDeps};
use crate::server::routes::{
    health_handler, list_subscriptions_handler, re_replicate_handler, statuses_handler,
    subscribe_handler, unsubscribe_handler, webhook_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub replication: ReplicationDeps,
    pub replica: ReplicaDeps,
}

/// Build the Axum application router
///
/// One process serves both sides of the pipeline: the producer's management
/// API and the consumer's webhook receiver. Deployments that only play one
/// role simply never call the other routes.
pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route(
            "/api/v1/subscriptions",
            post(subscribe_handler)
                .delete(unsubscribe_handler)
                .get(list_subscriptions_handler),
        )
        .route("/api/v1/subscriptions/statuses", get(statuses_handler))
        .route("/api/v1/subscriptions/replicate", post(re_replicate_handler))
        .route("/api/v1/webhook", post(webhook_handler))
        // Health check (no auth)
        .route("/health", get(health_handler))
        .layer(Extension(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
