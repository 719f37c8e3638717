//! End-to-end pipeline tests.
//!
//! Drive a mutation on the producer side and assert on the consumer's
//! replica store, with the delivery worker and a loopback transport in
//! between. Retry behavior is exercised by draining the queue past future
//! `run_at` values instead of sleeping.

mod common;

use std::time::Duration;

use common::{alice, comment, contact, TestHarness};
use replication_core::domains::eventsourcing::{re_replicate, MutationContext, SubscriptionStore};
use replication_core::domains::replica::ReplicaStore;
use replication_core::kernel::delivery::{DeliveryQueue, DeliveryStatus, DeliveryTask, RetryPolicy};

fn fast_policy(max_attempts: Option<u32>) -> RetryPolicy {
    RetryPolicy {
        base: Duration::from_millis(1),
        cap: Duration::from_millis(10),
        max_attempts,
    }
}

#[tokio::test]
async fn test_create_then_update_reaches_replica() {
    let harness = TestHarness::new();
    harness.subscribe_all(&alice(), "consumer").await;

    harness
        .replication
        .replicator
        .on_entity_created("contact", &contact("C1", 1, "John"), MutationContext::default())
        .await
        .unwrap();
    harness.worker.drain().await.unwrap();

    let replica = harness
        .replica_store
        .get("contact", "C1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(replica.version, 1);
    assert_eq!(replica.fields["name"], "John");

    harness
        .replication
        .replicator
        .on_entity_changed("contact", &contact("C1", 2, "Jane"), MutationContext::default())
        .await
        .unwrap();
    harness.worker.drain().await.unwrap();

    let replica = harness
        .replica_store
        .get("contact", "C1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(replica.version, 2);
    assert_eq!(replica.fields["name"], "Jane");
}

#[tokio::test]
async fn test_duplicate_redelivery_is_a_no_op() {
    let harness = TestHarness::new();
    let subscription = harness.subscribe_all(&alice(), "consumer").await;

    let v1 = harness
        .replication
        .replicator
        .on_entity_created("contact", &contact("C1", 1, "John"), MutationContext::default())
        .await
        .unwrap();
    harness
        .replication
        .replicator
        .on_entity_changed("contact", &contact("C1", 2, "Jane"), MutationContext::default())
        .await
        .unwrap();
    harness.worker.drain().await.unwrap();

    // redeliver the stale v1 record; the consumer answers 200 and keeps v2
    harness
        .replication
        .queue
        .enqueue(DeliveryTask::new(subscription.id, "contact", v1.history_id))
        .await
        .unwrap();
    let statuses = harness.worker.drain().await.unwrap();
    assert_eq!(statuses, vec![DeliveryStatus::Delivered]);

    let replica = harness
        .replica_store
        .get("contact", "C1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(replica.version, 2);
    assert_eq!(replica.fields["name"], "Jane");
}

#[tokio::test]
async fn test_relation_resolves_on_the_consumer() {
    let harness = TestHarness::new();
    harness.subscribe_all(&alice(), "consumer").await;

    harness
        .replication
        .replicator
        .on_entity_created("contact", &contact("C1", 1, "John"), MutationContext::default())
        .await
        .unwrap();
    harness
        .replication
        .replicator
        .on_entity_created("comment", &comment("M1", 1, "hi", "C1"), MutationContext::default())
        .await
        .unwrap();
    harness.worker.drain().await.unwrap();

    let replica = harness
        .replica_store
        .get("comment", "M1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(replica.fields["contact"], "C1");
}

#[tokio::test]
async fn test_out_of_order_delivery_heals_through_retry() {
    let harness = TestHarness::with_failures(0, fast_policy(None));
    harness.subscribe_all(&alice(), "consumer").await;

    // the comment's task lands in the queue before its contact exists
    harness
        .replication
        .replicator
        .on_entity_created("comment", &comment("M1", 1, "hi", "C1"), MutationContext::default())
        .await
        .unwrap();
    harness
        .replication
        .replicator
        .on_entity_created("contact", &contact("C1", 1, "John"), MutationContext::default())
        .await
        .unwrap();

    let statuses = harness.worker.drain().await.unwrap();
    assert!(statuses.contains(&DeliveryStatus::Retrying));
    assert_eq!(
        statuses
            .iter()
            .filter(|s| **s == DeliveryStatus::Delivered)
            .count(),
        2
    );

    let replica = harness
        .replica_store
        .get("comment", "M1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(replica.fields["contact"], "C1");
}

#[tokio::test]
async fn test_transient_failures_retry_until_success() {
    let harness = TestHarness::with_failures(2, fast_policy(None));
    harness.subscribe_all(&alice(), "consumer").await;

    harness
        .replication
        .replicator
        .on_entity_created("contact", &contact("C1", 1, "John"), MutationContext::default())
        .await
        .unwrap();

    let statuses = harness.worker.drain().await.unwrap();
    assert_eq!(
        statuses,
        vec![
            DeliveryStatus::Retrying,
            DeliveryStatus::Retrying,
            DeliveryStatus::Delivered,
        ]
    );
    assert!(harness
        .replica_store
        .get("contact", "C1")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_attempt_ceiling_dead_letters() {
    let harness = TestHarness::with_failures(u32::MAX, fast_policy(Some(3)));
    harness.subscribe_all(&alice(), "consumer").await;

    harness
        .replication
        .replicator
        .on_entity_created("contact", &contact("C1", 1, "John"), MutationContext::default())
        .await
        .unwrap();

    let statuses = harness.worker.drain().await.unwrap();
    assert_eq!(
        statuses,
        vec![
            DeliveryStatus::Retrying,
            DeliveryStatus::Retrying,
            DeliveryStatus::DeadLettered,
        ]
    );
    assert!(harness.replication.queue.is_empty().await);
    assert!(harness
        .replica_store
        .get("contact", "C1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_removed_subscription_drops_pending_tasks() {
    let harness = TestHarness::new();
    let subscription = harness.subscribe_all(&alice(), "consumer").await;

    harness
        .replication
        .replicator
        .on_entity_created("contact", &contact("C1", 1, "John"), MutationContext::default())
        .await
        .unwrap();
    harness
        .replication
        .subscriptions
        .delete(subscription.id)
        .await
        .unwrap();

    let statuses = harness.worker.drain().await.unwrap();
    assert_eq!(statuses, vec![DeliveryStatus::NotSubscribed]);
}

#[tokio::test]
async fn test_re_replicate_backfills_latest_versions() {
    let harness = TestHarness::new();
    let subscription = harness.subscribe_all(&alice(), "consumer").await;

    harness
        .replication
        .replicator
        .on_entity_created("contact", &contact("C1", 1, "John"), MutationContext::default())
        .await
        .unwrap();
    harness
        .replication
        .replicator
        .on_entity_changed("contact", &contact("C1", 2, "Jane"), MutationContext::default())
        .await
        .unwrap();
    harness
        .replication
        .replicator
        .on_entity_created("contact", &contact("C2", 1, "Mary"), MutationContext::default())
        .await
        .unwrap();
    harness.worker.drain().await.unwrap();

    // one task per entity, carrying only the latest version
    let enqueued = re_replicate(
        &harness.replication.replicator,
        &subscription,
        &["contact".to_string()],
    )
    .await
    .unwrap();
    assert_eq!(enqueued, 2);

    let statuses = harness.worker.drain().await.unwrap();
    assert_eq!(statuses.len(), 2);
    assert!(statuses.iter().all(|s| *s == DeliveryStatus::Delivered));

    let replica = harness
        .replica_store
        .get("contact", "C1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(replica.version, 2);
    assert!(harness
        .replica_store
        .get("contact", "C2")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_mutation_without_subscribers_is_quiet() {
    let harness = TestHarness::new();

    harness
        .replication
        .replicator
        .on_entity_created("contact", &contact("C1", 1, "John"), MutationContext::default())
        .await
        .unwrap();

    assert!(harness.replication.queue.is_empty().await);
    let statuses = harness.worker.drain().await.unwrap();
    assert!(statuses.is_empty());
}
