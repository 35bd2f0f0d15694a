//! Existence and update algorithm against the in-memory API server

mod common;

use common::{plain_spec, seed_service, NAMESPACE};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use license_service_operator::crd::LicenseService;
use license_service_operator::engine::{
    Converger, MemoryStore, ObjectKey, Presence, Timing, UpdateStrategy,
};
use license_service_operator::error::Error;
use std::collections::BTreeMap;
use std::time::Duration;

const TIMING: Timing = Timing {
    create_requeue: Duration::ZERO,
    settle_delay: Duration::ZERO,
};

fn owner(store: &MemoryStore) -> LicenseService {
    let key = seed_service(store, "instance", "2024-01-01T00:00:00Z", plain_spec());
    store.object(&key).expect("owner seeded")
}

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        labels: Some(BTreeMap::from([(
            "app.kubernetes.io/managed-by".to_string(),
            "license-service-operator".to_string(),
        )])),
        ..ObjectMeta::default()
    }
}

fn config_map(name: &str, value: &str) -> ConfigMap {
    ConfigMap {
        metadata: meta(name),
        data: Some(BTreeMap::from([("value".to_string(), value.to_string())])),
        ..ConfigMap::default()
    }
}

fn value_of(store: &MemoryStore, name: &str) -> Option<String> {
    store
        .object::<ConfigMap>(&ObjectKey::new(NAMESPACE, name))
        .and_then(|c| c.data)
        .and_then(|d| d.get("value").cloned())
}

#[tokio::test]
async fn test_created_object_is_owned_and_requeues() {
    let store = MemoryStore::new();
    let owner = owner(&store);
    let converger = Converger::new(&store, &owner, TIMING).expect("converger");

    let outcome = converger
        .ensure(config_map("settings", "1"), UpdateStrategy::InPlace)
        .await
        .expect("ensure succeeds");
    assert!(!outcome.is_done());

    let created = store
        .object::<ConfigMap>(&ObjectKey::new(NAMESPACE, "settings"))
        .expect("created");
    assert!(converger.owns(&created));
    let reference = created
        .metadata
        .owner_references
        .unwrap_or_default()
        .into_iter()
        .next()
        .expect("owner reference");
    assert_eq!(reference.kind, "LicenseService");
    assert_eq!(reference.controller, Some(true));

    let outcome = converger
        .ensure(config_map("settings", "1"), UpdateStrategy::InPlace)
        .await
        .expect("ensure succeeds");
    assert!(outcome.is_done());
}

#[tokio::test]
async fn test_drift_is_replaced_in_place() {
    let store = MemoryStore::new();
    let owner = owner(&store);
    let converger = Converger::new(&store, &owner, TIMING).expect("converger");
    converger
        .ensure(config_map("settings", "1"), UpdateStrategy::InPlace)
        .await
        .expect("create");

    store.reset_writes();
    let outcome = converger
        .ensure(config_map("settings", "2"), UpdateStrategy::InPlace)
        .await
        .expect("update");

    assert!(outcome.is_done());
    assert_eq!(value_of(&store, "settings").as_deref(), Some("2"));
    assert_eq!(store.writes().replaces, 1);
    assert_eq!(store.writes().deletes, 0);
}

#[tokio::test]
async fn test_rejected_update_falls_back_to_recreate() {
    let store = MemoryStore::new();
    let owner = owner(&store);
    let converger = Converger::new(&store, &owner, TIMING).expect("converger");
    converger
        .ensure(config_map("settings", "1"), UpdateStrategy::InPlace)
        .await
        .expect("create");
    store.reject_replace_for::<ConfigMap>();

    store.reset_writes();
    let outcome = converger
        .ensure(config_map("settings", "2"), UpdateStrategy::InPlace)
        .await
        .expect("recreate");

    assert!(!outcome.is_done());
    assert_eq!(value_of(&store, "settings").as_deref(), Some("2"));
    let writes = store.writes();
    assert_eq!((writes.deletes, writes.creates), (1, 1));
}

#[tokio::test]
async fn test_recreate_strategy_never_replaces() {
    let store = MemoryStore::new();
    let owner = owner(&store);
    let converger = Converger::new(&store, &owner, TIMING).expect("converger");
    converger
        .ensure(config_map("settings", "1"), UpdateStrategy::Recreate)
        .await
        .expect("create");

    store.reset_writes();
    converger
        .ensure(config_map("settings", "2"), UpdateStrategy::Recreate)
        .await
        .expect("recreate");

    let writes = store.writes();
    assert_eq!(writes.replaces, 0);
    assert_eq!((writes.deletes, writes.creates), (1, 1));
    let recreated = store
        .object::<ConfigMap>(&ObjectKey::new(NAMESPACE, "settings"))
        .expect("recreated");
    assert!(converger.owns(&recreated));
}

#[tokio::test]
async fn test_stale_update_requeues_instead_of_failing() {
    let store = MemoryStore::new();
    let owner = owner(&store);
    let converger = Converger::new(&store, &owner, TIMING).expect("converger");
    converger
        .ensure(config_map("settings", "1"), UpdateStrategy::InPlace)
        .await
        .expect("create");
    let stale = store
        .object::<ConfigMap>(&ObjectKey::new(NAMESPACE, "settings"))
        .expect("created");
    // someone else writes in between, bumping the resource version
    store.insert(stale.clone());

    let outcome = converger
        .update_or_recreate(config_map("settings", "2"), &stale)
        .await
        .expect("conflict is not an error");

    assert!(!outcome.is_done());
    assert_eq!(value_of(&store, "settings").as_deref(), Some("1"));
}

#[tokio::test]
async fn test_create_only_objects_are_never_updated() {
    let store = MemoryStore::new();
    let owner = owner(&store);
    let converger = Converger::new(&store, &owner, TIMING).expect("converger");
    let secret = |token: &str| Secret {
        metadata: meta("token"),
        data: Some(BTreeMap::from([(
            "token".to_string(),
            ByteString(token.as_bytes().to_vec()),
        )])),
        ..Secret::default()
    };
    converger
        .ensure(secret("first"), UpdateStrategy::CreateOnly)
        .await
        .expect("create");

    store.reset_writes();
    let outcome = converger
        .ensure(secret("second"), UpdateStrategy::CreateOnly)
        .await
        .expect("ensure");

    assert!(outcome.is_done());
    assert_eq!(store.writes().total(), 0);
    let stored = store
        .object::<Secret>(&ObjectKey::new(NAMESPACE, "token"))
        .and_then(|s| s.data)
        .and_then(|d| d.get("token").cloned());
    assert_eq!(stored, Some(ByteString(b"first".to_vec())));
}

#[tokio::test]
async fn test_create_if_missing_reports_the_found_object() {
    let store = MemoryStore::new();
    let owner = owner(&store);
    let converger = Converger::new(&store, &owner, TIMING).expect("converger");

    let first = converger
        .create_if_missing(config_map("settings", "1"))
        .await
        .expect("create");
    assert!(matches!(first, Presence::Created));

    let second = converger
        .create_if_missing(config_map("settings", "2"))
        .await
        .expect("lookup");
    match second {
        Presence::Found(found) => {
            assert_eq!(
                found.data.and_then(|d| d.get("value").cloned()).as_deref(),
                Some("1")
            );
        }
        other => panic!("expected the existing object, got {other:?}"),
    }
}

#[tokio::test]
async fn test_ensure_absent_deletes_owned_and_keeps_foreign_objects() {
    let store = MemoryStore::new();
    let owner = owner(&store);
    let converger = Converger::new(&store, &owner, TIMING).expect("converger");
    converger
        .ensure(config_map("owned", "1"), UpdateStrategy::InPlace)
        .await
        .expect("create");
    store.insert(config_map("foreign", "1"));

    let outcome = converger
        .ensure_absent::<ConfigMap>(&ObjectKey::new(NAMESPACE, "owned"))
        .await
        .expect("delete");
    assert!(!outcome.is_done());
    assert_eq!(value_of(&store, "owned"), None);

    let outcome = converger
        .ensure_absent::<ConfigMap>(&ObjectKey::new(NAMESPACE, "foreign"))
        .await
        .expect("skip");
    assert!(outcome.is_done());
    assert_eq!(value_of(&store, "foreign").as_deref(), Some("1"));

    let outcome = converger
        .ensure_absent::<ConfigMap>(&ObjectKey::new(NAMESPACE, "missing"))
        .await
        .expect("nothing to do");
    assert!(outcome.is_done());
}

#[tokio::test]
async fn test_cross_namespace_ownership_is_refused() {
    let store = MemoryStore::new();
    let owner = owner(&store);
    let converger = Converger::new(&store, &owner, TIMING).expect("converger");
    let mut elsewhere = config_map("settings", "1");
    elsewhere.metadata.namespace = Some("other".to_string());

    let error = converger
        .ensure(elsewhere, UpdateStrategy::InPlace)
        .await
        .expect_err("cross-namespace owner");

    assert!(matches!(error, Error::Ownership { .. }), "got {error}");
    assert!(store.objects::<ConfigMap>().is_empty());
}

#[tokio::test]
async fn test_object_controlled_by_another_owner_is_refused() {
    let store = MemoryStore::new();
    let owner = owner(&store);
    let other = {
        let key = seed_service(&store, "other", "2024-02-01T00:00:00Z", plain_spec());
        store.object::<LicenseService>(&key).expect("other owner")
    };
    let converger = Converger::new(&store, &owner, TIMING).expect("converger");
    let foreign = Converger::new(&store, &other, TIMING).expect("converger");

    let mut object = config_map("settings", "1");
    foreign.adopt(&mut object).expect("first owner");

    let error = converger.adopt(&mut object).expect_err("second controller");
    assert!(matches!(error, Error::Ownership { .. }), "got {error}");
}
