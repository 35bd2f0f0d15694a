//! Convergence tests for the `LicenseService` and `LicenseReporter` drivers
//!
//! Every test runs the drivers against the in-memory API server until a pass
//! finishes without a requeue, then inspects what was written.

mod common;

use common::{
    converge_reporter, converge_service, plain_spec, reconciler, seed_reporter, seed_service,
    NAMESPACE,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use license_service_operator::capabilities::Capabilities;
use license_service_operator::crd::{
    IngressOptions, LicenseReporter, LicenseReporterSpec, LicenseService, MeteringDefinition,
    Route, ServiceMonitor,
};
use license_service_operator::engine::{MemoryStore, ObjectKey};
use std::collections::BTreeMap;

fn child(name: &str) -> ObjectKey {
    ObjectKey::new(NAMESPACE, name)
}

#[tokio::test]
async fn test_service_converges_and_next_pass_writes_nothing() {
    let store = MemoryStore::new();
    let (reconciler, _scope) = reconciler(&store, Capabilities::default());
    let key = seed_service(&store, "instance", "2024-01-01T00:00:00Z", plain_spec());

    converge_service(&reconciler, &key).await;

    store.reset_writes();
    let outcome = reconciler
        .reconcile_license_service(&key)
        .await
        .expect("pass succeeds");
    assert!(outcome.is_done());
    assert_eq!(
        store.writes().total(),
        0,
        "a converged resource should not be written again: {:?}",
        store.writes()
    );
}

#[tokio::test]
async fn test_service_children_exist_and_are_owned() {
    let store = MemoryStore::new();
    let (reconciler, _scope) = reconciler(&store, Capabilities::default());
    let key = seed_service(&store, "instance", "2024-01-01T00:00:00Z", plain_spec());

    converge_service(&reconciler, &key).await;

    let owner = store
        .object::<LicenseService>(&key)
        .expect("LicenseService exists");
    let owner_uid = owner.metadata.uid.clone().expect("uid assigned");
    let owned_by_instance = |refs: Option<Vec<OwnerReference>>| {
        refs.unwrap_or_default()
            .iter()
            .any(|r| r.uid == owner_uid && r.controller == Some(true))
    };

    let deployment = store
        .object::<Deployment>(&child("instance-license-service"))
        .expect("deployment created");
    assert!(owned_by_instance(deployment.metadata.owner_references));
    let service = store
        .object::<Service>(&child("instance-license-service"))
        .expect("service created");
    assert!(owned_by_instance(service.metadata.owner_references));
    let token = store
        .object::<Secret>(&child("instance-license-service-api-token"))
        .expect("api token created");
    assert!(owned_by_instance(token.metadata.owner_references));
    let info = store
        .object::<ConfigMap>(&child("instance-license-service-info"))
        .expect("info config map created");
    assert!(owned_by_instance(info.metadata.owner_references));
    assert_eq!(
        info.data.unwrap_or_default().get("url").map(String::as_str),
        Some("http://instance-license-service.licensing.svc:8080")
    );

    // HTTPS is off: no certificate, no route on plain Kubernetes
    assert!(store
        .object::<Secret>(&child("instance-license-service-tls"))
        .is_none());
    assert!(store.objects::<Route>().is_empty());
    assert!(store.objects::<NetworkPolicy>().is_empty());

    let status = owner.status.expect("status written");
    assert_eq!(status.state.as_deref(), Some("ACTIVE"));
    assert_eq!(status.observed_generation, Some(1));
    let ready = status
        .conditions
        .iter()
        .find(|c| c.r#type == "Ready")
        .expect("Ready condition");
    assert_eq!(ready.status, "False");
    assert_eq!(ready.reason.as_deref(), Some("NoPods"));
}

#[tokio::test]
async fn test_api_token_is_generated_once() {
    let store = MemoryStore::new();
    let (reconciler, _scope) = reconciler(&store, Capabilities::default());
    let key = seed_service(&store, "instance", "2024-01-01T00:00:00Z", plain_spec());
    let token_key = child("instance-license-service-api-token");

    converge_service(&reconciler, &key).await;
    let first = store.object::<Secret>(&token_key).expect("token").data;

    converge_service(&reconciler, &key).await;
    let second = store.object::<Secret>(&token_key).expect("token").data;

    assert!(first.is_some());
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_foreign_labels_survive_and_operator_labels_are_restored() {
    let store = MemoryStore::new();
    let (reconciler, _scope) = reconciler(&store, Capabilities::default());
    let key = seed_service(&store, "instance", "2024-01-01T00:00:00Z", plain_spec());
    converge_service(&reconciler, &key).await;

    let deployment_key = child("instance-license-service");
    let mut deployment = store
        .object::<Deployment>(&deployment_key)
        .expect("deployment");
    let labels = deployment.metadata.labels.get_or_insert_with(BTreeMap::new);
    labels.insert("team".to_string(), "licensing".to_string());
    labels.remove("app.kubernetes.io/managed-by");
    store.insert(deployment);

    converge_service(&reconciler, &key).await;

    let labels = store
        .object::<Deployment>(&deployment_key)
        .expect("deployment")
        .metadata
        .labels
        .unwrap_or_default();
    assert_eq!(labels.get("team").map(String::as_str), Some("licensing"));
    assert!(labels.contains_key("app.kubernetes.io/managed-by"));
}

#[tokio::test]
async fn test_objects_owned_by_someone_else_are_left_alone() {
    let store = MemoryStore::new();
    let (reconciler, _scope) = reconciler(&store, Capabilities::default());
    let key = seed_service(&store, "instance", "2024-01-01T00:00:00Z", plain_spec());

    let foreign = store.insert(ConfigMap {
        metadata: ObjectMeta {
            name: Some("instance-license-service-info".to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "owner".to_string(),
            "someone-else".to_string(),
        )])),
        ..ConfigMap::default()
    });

    converge_service(&reconciler, &key).await;

    let after = store
        .object::<ConfigMap>(&child("instance-license-service-info"))
        .expect("config map still exists");
    assert_eq!(after.data, foreign.data);
    assert_eq!(
        after.metadata.resource_version,
        foreign.metadata.resource_version
    );
    assert!(after.metadata.owner_references.is_none());
}

#[tokio::test]
async fn test_disabling_ingress_deletes_the_owned_ingress() {
    let store = MemoryStore::new();
    let (reconciler, _scope) = reconciler(&store, Capabilities::default());
    let mut spec = plain_spec();
    spec.ingress = IngressOptions {
        enabled: true,
        host: Some("licensing.example.com".to_string()),
        ..IngressOptions::default()
    };
    let key = seed_service(&store, "instance", "2024-01-01T00:00:00Z", spec);
    let ingress_key = child("instance-license-service");

    converge_service(&reconciler, &key).await;
    assert!(store.object::<Ingress>(&ingress_key).is_some());

    let mut resource = store.object::<LicenseService>(&key).expect("resource");
    resource.spec.ingress.enabled = false;
    store.insert(resource);

    converge_service(&reconciler, &key).await;
    assert!(store.object::<Ingress>(&ingress_key).is_none());
}

#[tokio::test]
async fn test_network_policy_follows_the_flag() {
    let store = MemoryStore::new();
    let (reconciler, _scope) = reconciler(&store, Capabilities::default());
    let mut spec = plain_spec();
    spec.network_policy_enabled = true;
    let key = seed_service(&store, "instance", "2024-01-01T00:00:00Z", spec);

    converge_service(&reconciler, &key).await;
    assert!(store
        .object::<NetworkPolicy>(&child("instance-license-service"))
        .is_some());
}

#[tokio::test]
async fn test_openshift_capabilities_add_route_monitor_and_metering() {
    let store = MemoryStore::new();
    let (reconciler, _scope) = reconciler(&store, Capabilities::openshift());
    let key = seed_service(
        &store,
        "instance",
        "2024-01-01T00:00:00Z",
        Default::default(),
    );

    converge_service(&reconciler, &key).await;

    let workload = child("instance-license-service");
    assert!(store.object::<Route>(&workload).is_some());
    assert!(store.object::<ServiceMonitor>(&workload).is_some());
    assert!(store.object::<MeteringDefinition>(&workload).is_some());
    // the service CA issues the certificate, so the operator generates none
    assert!(store
        .object::<Secret>(&child("instance-license-service-tls"))
        .is_none());
    assert!(store.objects::<Ingress>().is_empty());

    let status = store
        .object::<LicenseService>(&key)
        .and_then(|s| s.status)
        .expect("status written");
    let features = status.features.expect("features mirrored");
    assert!(features.route_enabled);
    assert!(features.service_monitor_enabled);
    assert_eq!(features.cert_source.as_deref(), Some("ocp"));
}

#[tokio::test]
async fn test_active_instance_publishes_namespace_scope() {
    let store = MemoryStore::new();
    let (reconciler, mut scope) = reconciler(&store, Capabilities::default());
    let mut spec = plain_spec();
    spec.features.namespace_scope_enabled = true;
    let key = seed_service(&store, "instance", "2024-01-01T00:00:00Z", spec);

    assert_eq!(scope.latest(), None);
    converge_service(&reconciler, &key).await;
    assert_eq!(scope.latest(), Some(true));
}

#[tokio::test]
async fn test_reporter_converges_with_database_credentials() {
    let store = MemoryStore::new();
    let (reconciler, _scope) = reconciler(&store, Capabilities::default());
    let mut spec = LicenseReporterSpec::default();
    spec.https.enabled = Some(false);
    let key = seed_reporter(&store, "usage", spec);

    converge_reporter(&reconciler, &key).await;

    let credentials = store
        .object::<Secret>(&child("usage-reporter-db-credentials"))
        .expect("credentials created");
    let data = credentials.data.unwrap_or_default();
    assert!(data.contains_key("password"));
    assert_ne!(data.get("password"), Some(&ByteString(Vec::new())));
    assert!(store
        .object::<Deployment>(&child("usage-reporter"))
        .is_some());
    assert!(store.object::<Service>(&child("usage-reporter")).is_some());

    let status = store
        .object::<LicenseReporter>(&key)
        .and_then(|r| r.status)
        .expect("status written");
    assert_eq!(status.state, None);

    store.reset_writes();
    converge_reporter(&reconciler, &key).await;
    assert_eq!(store.writes().total(), 0);
}
