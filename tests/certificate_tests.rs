//! Self-signed certificate lifecycle through the `LicenseService` driver

mod common;

use common::{converge_service, reconciler, seed_service, NAMESPACE};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use license_service_operator::capabilities::Capabilities;
use license_service_operator::certificates::{
    generate_with_validity, inspect, CertificateInfo, TLS_CERT_KEY, TLS_KEY_KEY,
};
use license_service_operator::constants::RESTARTED_AT_ANNOTATION;
use license_service_operator::crd::{CertSource, LicenseService, LicenseServiceSpec};
use license_service_operator::engine::{MemoryStore, ObjectKey};
use std::collections::BTreeMap;
use time::{Duration, OffsetDateTime};

const PRIMARY: &str = "instance-license-service.licensing.svc";

fn tls_key() -> ObjectKey {
    ObjectKey::new(NAMESPACE, "instance-license-service-tls")
}

fn deployment_key() -> ObjectKey {
    ObjectKey::new(NAMESPACE, "instance-license-service")
}

fn hostnames() -> Vec<String> {
    vec![
        PRIMARY.to_string(),
        format!("{PRIMARY}.cluster.local"),
    ]
}

fn stored_cert(store: &MemoryStore) -> Vec<u8> {
    store
        .object::<Secret>(&tls_key())
        .and_then(|s| s.data)
        .and_then(|data| data.get(TLS_CERT_KEY).cloned())
        .map(|bytes| bytes.0)
        .unwrap_or_default()
}

/// Overwrite the certificate in the managed secret, keeping its ownership
fn replace_cert(store: &MemoryStore, cert_pem: &[u8]) {
    let mut secret = store.object::<Secret>(&tls_key()).expect("tls secret");
    secret
        .data
        .get_or_insert_with(BTreeMap::new)
        .insert(TLS_CERT_KEY.to_string(), ByteString(cert_pem.to_vec()));
    store.insert(secret);
}

fn expiring_in(days: i64) -> Vec<u8> {
    let now = OffsetDateTime::now_utc();
    generate_with_validity(&hostnames(), now - Duration::days(1), now + Duration::days(days))
        .expect("certificate generated")
        .cert_pem
        .into_bytes()
}

fn restart_stamp(store: &MemoryStore) -> Option<String> {
    store
        .object::<Deployment>(&deployment_key())
        .and_then(|d| d.spec)
        .and_then(|s| s.template.metadata)
        .and_then(|m| m.annotations)
        .and_then(|a| a.get(RESTARTED_AT_ANNOTATION).cloned())
}

async fn converged() -> (MemoryStore, common::TestReconciler, ObjectKey) {
    let store = MemoryStore::new();
    let (reconciler, _scope) = reconciler(&store, Capabilities::default());
    let key = seed_service(
        &store,
        "instance",
        "2024-01-01T00:00:00Z",
        LicenseServiceSpec::default(),
    );
    converge_service(&reconciler, &key).await;
    (store, reconciler, key)
}

#[tokio::test]
async fn test_self_signed_secret_is_created() {
    let (store, _reconciler, _key) = converged().await;

    let secret = store.object::<Secret>(&tls_key()).expect("tls secret");
    assert_eq!(secret.type_.as_deref(), Some("kubernetes.io/tls"));
    let data = secret.data.expect("data");
    assert!(data.contains_key(TLS_KEY_KEY));
    let cert = &data.get(TLS_CERT_KEY).expect("certificate").0;
    assert!(inspect(cert, PRIMARY, OffsetDateTime::now_utc()).is_valid());
    // created before the deployment existed, so nothing had to be restarted
    assert_eq!(restart_stamp(&store), None);
}

#[tokio::test]
async fn test_certificate_inside_rotation_window_is_replaced_and_pods_restarted() {
    let (store, reconciler, key) = converged().await;
    let expiring = expiring_in(89);
    replace_cert(&store, &expiring);

    converge_service(&reconciler, &key).await;

    let cert = stored_cert(&store);
    assert_ne!(cert, expiring);
    assert!(inspect(&cert, PRIMARY, OffsetDateTime::now_utc()).is_valid());
    assert!(restart_stamp(&store).is_some());
}

#[tokio::test]
async fn test_certificate_outside_rotation_window_is_kept() {
    let (store, reconciler, key) = converged().await;
    let healthy = expiring_in(91);
    replace_cert(&store, &healthy);

    store.reset_writes();
    converge_service(&reconciler, &key).await;

    assert_eq!(stored_cert(&store), healthy);
    assert_eq!(restart_stamp(&store), None);
    assert_eq!(store.writes().total(), 0);
}

#[tokio::test]
async fn test_corrupt_certificate_is_regenerated() {
    let (store, reconciler, key) = converged().await;
    replace_cert(&store, b"not a certificate");

    converge_service(&reconciler, &key).await;

    let cert = stored_cert(&store);
    assert!(inspect(&cert, PRIMARY, OffsetDateTime::now_utc()).is_valid());
    assert!(restart_stamp(&store).is_some());
}

#[tokio::test]
async fn test_new_hostname_triggers_a_certificate_covering_it() {
    let (store, reconciler, key) = converged().await;
    let mut resource = store.object::<LicenseService>(&key).expect("resource");
    resource.spec.hostname = Some("licensing.example.com".to_string());
    store.insert(resource);

    converge_service(&reconciler, &key).await;

    let info = CertificateInfo::from_pem(&stored_cert(&store)).expect("parseable certificate");
    assert!(info.covers("licensing.example.com"));
    assert!(info.covers(PRIMARY));
}

#[tokio::test]
async fn test_user_provided_secret_at_the_managed_name_is_untouched() {
    let store = MemoryStore::new();
    let (reconciler, _scope) = reconciler(&store, Capabilities::default());
    let key = seed_service(
        &store,
        "instance",
        "2024-01-01T00:00:00Z",
        LicenseServiceSpec::default(),
    );
    store.insert(Secret {
        metadata: ObjectMeta {
            name: Some(tls_key().name),
            namespace: Some(NAMESPACE.to_string()),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([(
            TLS_CERT_KEY.to_string(),
            ByteString(b"provided by the user".to_vec()),
        )])),
        ..Secret::default()
    });

    converge_service(&reconciler, &key).await;

    assert_eq!(stored_cert(&store), b"provided by the user".to_vec());
}

#[tokio::test]
async fn test_custom_source_is_never_generated() {
    let store = MemoryStore::new();
    let (reconciler, _scope) = reconciler(&store, Capabilities::default());
    let mut spec = LicenseServiceSpec::default();
    spec.https.certs_source = Some(CertSource::Custom);
    spec.https.custom_secret_name = Some("customer-tls".to_string());
    let key = seed_service(&store, "instance", "2024-01-01T00:00:00Z", spec);
    let custom = store.insert(Secret {
        metadata: ObjectMeta {
            name: Some("customer-tls".to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([(
            TLS_CERT_KEY.to_string(),
            ByteString(b"customer certificate".to_vec()),
        )])),
        ..Secret::default()
    });

    converge_service(&reconciler, &key).await;

    assert!(store.object::<Secret>(&tls_key()).is_none());
    let after = store
        .object::<Secret>(&ObjectKey::new(NAMESPACE, "customer-tls"))
        .expect("custom secret");
    assert_eq!(after.data, custom.data);
    assert_eq!(
        after.metadata.resource_version,
        custom.metadata.resource_version
    );
}

#[tokio::test]
async fn test_rotation_that_loses_a_write_race_does_not_restart_pods() {
    let (store, reconciler, key) = converged().await;
    let expiring = expiring_in(10);
    replace_cert(&store, &expiring);
    store.conflict_replace_for::<Secret>();

    let outcome = reconciler
        .reconcile_license_service(&key)
        .await
        .expect("a conflict is not an error");

    assert!(!outcome.is_done(), "the rotation is retried");
    assert_eq!(stored_cert(&store), expiring);
    assert_eq!(restart_stamp(&store), None);
}

#[tokio::test]
async fn test_ip_hostname_converges_to_a_certificate_with_an_ip_san() {
    let store = MemoryStore::new();
    let (reconciler, _scope) = reconciler(&store, Capabilities::default());
    let mut spec = LicenseServiceSpec::default();
    spec.hostname = Some("10.0.0.5".to_string());
    let key = seed_service(&store, "instance", "2024-01-01T00:00:00Z", spec);

    converge_service(&reconciler, &key).await;

    let cert = stored_cert(&store);
    let info = CertificateInfo::from_pem(&cert).expect("parseable certificate");
    assert!(info.covers("10.0.0.5"));
    assert!(!info.covers("10.0.0.6"));

    store.reset_writes();
    let outcome = reconciler
        .reconcile_license_service(&key)
        .await
        .expect("pass succeeds");
    assert!(outcome.is_done());
    assert_eq!(store.writes().total(), 0);
    assert_eq!(stored_cert(&store), cert);
}
