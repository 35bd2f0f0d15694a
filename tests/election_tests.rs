//! Election tests: one active `LicenseService` at a time
//!
//! The oldest instance wins. Inactive instances keep their status current but
//! never create children, and losing the active instance promotes another.

mod common;

use common::{
    converge_service, plain_spec, reconciler, seed_service, state_of, test_config, NAMESPACE,
};
use k8s_openapi::api::apps::v1::Deployment;
use license_service_operator::broadcast::scope_channel;
use license_service_operator::capabilities::{Capabilities, StaticCapabilities};
use license_service_operator::config::ControllerConfig;
use license_service_operator::crd::{InstanceStatus, LicenseService};
use license_service_operator::engine::{MemoryStore, ObjectKey};
use license_service_operator::error::Error;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn workload(instance: &str) -> ObjectKey {
    ObjectKey::new(NAMESPACE, format!("{instance}-license-service"))
}

fn mark(store: &MemoryStore, key: &ObjectKey, state: &str) {
    let mut resource = store.object::<LicenseService>(key).expect("resource");
    resource.status = Some(InstanceStatus {
        state: Some(state.to_string()),
        ..InstanceStatus::default()
    });
    store.insert(resource);
}

/// Reconciler whose elections are spaced a minute apart
fn cooling_reconciler(store: &MemoryStore) -> common::TestReconciler {
    let (publisher, _scope) = scope_channel();
    let config = ControllerConfig {
        election_cooldown_secs: 60,
        ..test_config()
    };
    common::init_rustls();
    common::TestReconciler::new(
        store.clone(),
        StaticCapabilities(Capabilities::default()),
        config,
        publisher,
    )
}

#[tokio::test]
async fn test_oldest_instance_becomes_active() {
    let store = MemoryStore::new();
    let (reconciler, _scope) = reconciler(&store, Capabilities::default());
    let older = seed_service(&store, "a", "2024-01-01T00:00:00Z", plain_spec());
    let newer = seed_service(&store, "b", "2024-06-01T00:00:00Z", plain_spec());

    // the newer instance is reconciled first; the outcome must not depend on it
    let outcome = reconciler
        .reconcile_license_service(&newer)
        .await
        .expect("pass succeeds");
    assert!(!outcome.is_done(), "inactive instances are requeued");

    assert_eq!(state_of(&store, &older).as_deref(), Some("ACTIVE"));
    assert_eq!(state_of(&store, &newer).as_deref(), Some("INACTIVE"));
    assert!(store.object::<Deployment>(&workload("b")).is_none());

    converge_service(&reconciler, &older).await;
    assert!(store.object::<Deployment>(&workload("a")).is_some());
    assert!(store.object::<Deployment>(&workload("b")).is_none());
}

#[tokio::test]
async fn test_three_instances_elect_the_earliest_whichever_is_reconciled_first() {
    let store = MemoryStore::new();
    let (reconciler, _scope) = reconciler(&store, Capabilities::default());
    let second = seed_service(&store, "b", "2024-02-01T00:00:00Z", plain_spec());
    let third = seed_service(&store, "c", "2024-03-01T00:00:00Z", plain_spec());
    let first = seed_service(&store, "a", "2024-01-01T00:00:00Z", plain_spec());

    reconciler
        .reconcile_license_service(&third)
        .await
        .expect("pass succeeds");

    assert_eq!(state_of(&store, &first).as_deref(), Some("ACTIVE"));
    assert_eq!(state_of(&store, &second).as_deref(), Some("INACTIVE"));
    assert_eq!(state_of(&store, &third).as_deref(), Some("INACTIVE"));
}

#[tokio::test]
async fn test_inactive_instance_reports_not_elected() {
    let store = MemoryStore::new();
    let (reconciler, _scope) = reconciler(&store, Capabilities::default());
    seed_service(&store, "a", "2024-01-01T00:00:00Z", plain_spec());
    let newer = seed_service(&store, "b", "2024-06-01T00:00:00Z", plain_spec());

    reconciler
        .reconcile_license_service(&newer)
        .await
        .expect("pass succeeds");

    let status = store
        .object::<LicenseService>(&newer)
        .and_then(|s| s.status)
        .expect("status written");
    let ready = status
        .conditions
        .iter()
        .find(|c| c.r#type == "Ready")
        .expect("Ready condition");
    assert_eq!(ready.status, "False");
    assert_eq!(ready.reason.as_deref(), Some("NotElected"));
}

#[tokio::test]
async fn test_deleting_the_active_instance_promotes_the_next_one() {
    let store = MemoryStore::new();
    let (reconciler, _scope) = reconciler(&store, Capabilities::default());
    let older = seed_service(&store, "a", "2024-01-01T00:00:00Z", plain_spec());
    let newer = seed_service(&store, "b", "2024-06-01T00:00:00Z", plain_spec());
    converge_service(&reconciler, &older).await;
    assert_eq!(state_of(&store, &newer).as_deref(), Some("INACTIVE"));

    assert!(store.remove::<LicenseService>(&older));
    let outcome = reconciler
        .reconcile_license_service(&older)
        .await
        .expect("deletion pass succeeds");
    assert!(outcome.is_done());
    assert_eq!(state_of(&store, &newer).as_deref(), Some("ACTIVE"));

    converge_service(&reconciler, &newer).await;
    assert!(store.object::<Deployment>(&workload("b")).is_some());
}

#[tokio::test]
async fn test_inactive_instance_takes_over_when_no_one_is_active() {
    let store = MemoryStore::new();
    let (reconciler, _scope) = reconciler(&store, Capabilities::default());
    let older = seed_service(&store, "a", "2024-01-01T00:00:00Z", plain_spec());
    let newer = seed_service(&store, "b", "2024-06-01T00:00:00Z", plain_spec());
    converge_service(&reconciler, &older).await;

    // deleted without the deletion watch noticing: the periodic requeue of the
    // inactive instance repairs it
    store.remove::<LicenseService>(&older);
    converge_service(&reconciler, &newer).await;

    assert_eq!(state_of(&store, &newer).as_deref(), Some("ACTIVE"));
    assert!(store.object::<Deployment>(&workload("b")).is_some());
}

#[tokio::test]
async fn test_two_active_instances_are_resolved_to_one() {
    let store = MemoryStore::new();
    let (reconciler, _scope) = reconciler(&store, Capabilities::default());
    let older = seed_service(&store, "a", "2024-01-01T00:00:00Z", plain_spec());
    let newer = seed_service(&store, "b", "2024-06-01T00:00:00Z", plain_spec());
    mark(&store, &older, "ACTIVE");
    mark(&store, &newer, "ACTIVE");

    reconciler
        .reconcile_license_service(&newer)
        .await
        .expect("pass succeeds");

    assert_eq!(state_of(&store, &older).as_deref(), Some("ACTIVE"));
    assert_eq!(state_of(&store, &newer).as_deref(), Some("INACTIVE"));
    assert!(store.object::<Deployment>(&workload("b")).is_none());
}

#[tokio::test]
async fn test_election_waits_out_the_cooldown() {
    let store = MemoryStore::new();
    let reconciler = cooling_reconciler(&store);
    let first = seed_service(&store, "a", "2024-01-01T00:00:00Z", plain_spec());
    converge_service(&reconciler, &first).await;

    let second = seed_service(&store, "b", "2024-06-01T00:00:00Z", plain_spec());
    let outcome = reconciler
        .reconcile_license_service(&second)
        .await
        .expect("pass succeeds");

    assert!(!outcome.is_done());
    let delay = outcome.requeue_after.expect("requeue delay");
    assert!(delay > Duration::ZERO && delay <= Duration::from_secs(60));
    assert_eq!(state_of(&store, &second), None);
}

#[tokio::test(start_paused = true)]
async fn test_deletion_inside_the_cooldown_is_retried_until_reelected() {
    let store = MemoryStore::new();
    let reconciler = cooling_reconciler(&store);
    let older = seed_service(&store, "a", "2024-01-01T00:00:00Z", plain_spec());
    let newer = seed_service(&store, "b", "2024-06-01T00:00:00Z", plain_spec());
    converge_service(&reconciler, &older).await;
    assert_eq!(state_of(&store, &newer).as_deref(), Some("INACTIVE"));

    store.remove::<LicenseService>(&older);
    let outcome = reconciler
        .reconcile_license_service(&older)
        .await
        .expect("deletion pass succeeds");
    assert!(outcome.requeue_after.is_some(), "the election is still cooling down");
    assert_eq!(state_of(&store, &newer).as_deref(), Some("INACTIVE"));

    reconciler
        .reelect_after_deletion(&older, &CancellationToken::new())
        .await
        .expect("re-election succeeds");

    assert_eq!(state_of(&store, &newer).as_deref(), Some("ACTIVE"));
}

#[tokio::test(start_paused = true)]
async fn test_deletion_retry_stops_on_shutdown() {
    let store = MemoryStore::new();
    let reconciler = cooling_reconciler(&store);
    let older = seed_service(&store, "a", "2024-01-01T00:00:00Z", plain_spec());
    let newer = seed_service(&store, "b", "2024-06-01T00:00:00Z", plain_spec());
    converge_service(&reconciler, &older).await;

    store.remove::<LicenseService>(&older);
    let cancel = CancellationToken::new();
    cancel.cancel();
    reconciler
        .reelect_after_deletion(&older, &cancel)
        .await
        .expect("shutdown is not an error");

    assert_eq!(state_of(&store, &newer).as_deref(), Some("INACTIVE"));
}

#[tokio::test]
async fn test_failed_status_writes_are_reported_together() {
    let store = MemoryStore::new();
    let (reconciler, _scope) = reconciler(&store, Capabilities::default());
    let first = seed_service(&store, "a", "2024-01-01T00:00:00Z", plain_spec());
    seed_service(&store, "b", "2024-06-01T00:00:00Z", plain_spec());
    seed_service(&store, "c", "2024-07-01T00:00:00Z", plain_spec());
    store.fail_status_writes_for("b");
    store.fail_status_writes_for("c");

    let error = reconciler
        .reconcile_license_service(&first)
        .await
        .expect_err("election reports the failed writes");

    match error {
        Error::Election {
            failed, attempted, ..
        } => {
            assert_eq!(failed, 2);
            assert_eq!(attempted, 3);
        }
        other => panic!("expected an election error, got {other}"),
    }
    // the write that could succeed did
    assert_eq!(state_of(&store, &first).as_deref(), Some("ACTIVE"));
}
