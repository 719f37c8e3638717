// Main entry point for the replication server

use std::sync::Arc;

use anyhow::{Context, Result};
use replication_core::domains::eventsourcing::{
    AllowAll, EntitySchema, FieldDef, ReplicatingRegistry,
};
use replication_core::domains::replica::{InMemoryReplicaStore, ReplicatedRegistry};
use replication_core::kernel::delivery::{
    DeliveryWorker, DeliveryWorkerConfig, HttpWebhookTransport, RetryPolicy,
};
use replication_core::kernel::{ReplicaDeps, ReplicationDeps};
use replication_core::server::{build_app, AppState};
use replication_core::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// The entity types this deployment replicates. Contact carries a plain
/// scalar payload, comment references it so FK re-resolution is exercised.
fn schemas() -> Vec<EntitySchema> {
    vec![
        EntitySchema::new(
            "contact",
            vec![
                FieldDef::scalar("uid"),
                FieldDef::scalar("version"),
                FieldDef::scalar("name"),
                FieldDef::scalar("phones"),
            ],
        ),
        EntitySchema::new(
            "comment",
            vec![
                FieldDef::scalar("uid"),
                FieldDef::scalar("version"),
                FieldDef::scalar("message"),
                FieldDef::relation("contact", "contact"),
            ],
        ),
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,replication_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting replication server");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Register replicated types on both sides of the pipeline
    let mut registry = ReplicatingRegistry::new();
    let mut replicated = ReplicatedRegistry::new();
    for schema in schemas() {
        let type_name = schema.type_name.clone();
        registry
            .register(type_name.clone(), schema.clone())
            .with_context(|| format!("Failed to register type {type_name}"))?;
        replicated
            .register(type_name.clone(), schema)
            .with_context(|| format!("Failed to register replicated type {type_name}"))?;
    }

    let replication = ReplicationDeps::in_memory(Arc::new(registry), Arc::new(AllowAll));
    let replica = ReplicaDeps::new(Arc::new(replicated), Arc::new(InMemoryReplicaStore::new()));

    // Create and spawn the delivery worker as a background task
    let worker = DeliveryWorker::new(
        replication.queue.clone(),
        replication.subscriptions.clone(),
        replication.history.clone(),
        replication.view.clone(),
        Arc::new(HttpWebhookTransport::new(config.webhook_timeout)),
        RetryPolicy {
            base: config.delivery_backoff_base,
            cap: config.delivery_backoff_cap,
            max_attempts: config.delivery_max_attempts,
        },
    )
    .with_config(DeliveryWorkerConfig {
        poll_interval: config.worker_poll_interval,
        ..DeliveryWorkerConfig::default()
    });
    let shutdown = worker.shutdown_handle();
    tokio::spawn(async move {
        if let Err(e) = worker.run().await {
            tracing::error!(error = %e, "Delivery worker exited with error");
        }
    });

    let app = build_app(AppState {
        replication,
        replica,
    });

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
    Ok(())
}
