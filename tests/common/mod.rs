//! Common test utilities for the reconciliation tests
//!
//! Provides fixtures for custom resources, a reconciler wired to an in-memory
//! API server, and helpers that drive passes until they settle.

#![allow(dead_code, reason = "each test binary uses a different subset of the fixtures")]

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use license_service_operator::broadcast::{scope_channel, ScopeSubscriber};
use license_service_operator::capabilities::{Capabilities, StaticCapabilities};
use license_service_operator::config::ControllerConfig;
use license_service_operator::crd::{
    LicenseReporter, LicenseReporterSpec, LicenseService, LicenseServiceSpec,
};
use license_service_operator::engine::{MemoryStore, ObjectKey, Outcome};
use std::sync::Once;

pub const NAMESPACE: &str = "licensing";

/// Passes allowed before a resource is considered not to converge
pub const MAX_PASSES: usize = 20;

pub type TestReconciler =
    license_service_operator::controller::reconciler::Reconciler<MemoryStore, StaticCapabilities>;

static RUSTLS_INIT: Once = Once::new();

/// Initialize rustls crypto provider for tests
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        rustls::crypto::ring::default_provider()
            .install_default()
            .expect("Failed to install rustls crypto provider");
    });
}

/// Configuration with every delay set to zero
pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        create_requeue_ms: 0,
        immutable_settle_secs: 0,
        election_cooldown_secs: 0,
        ..ControllerConfig::default()
    }
}

pub fn reconciler(store: &MemoryStore, caps: Capabilities) -> (TestReconciler, ScopeSubscriber) {
    init_rustls();
    let (publisher, subscriber) = scope_channel();
    let reconciler = TestReconciler::new(
        store.clone(),
        StaticCapabilities(caps),
        test_config(),
        publisher,
    );
    (reconciler, subscriber)
}

fn created_at(timestamp: &str) -> Time {
    Time(
        chrono::DateTime::parse_from_rfc3339(timestamp)
            .expect("timestamp")
            .with_timezone(&chrono::Utc),
    )
}

/// Seed a `LicenseService` created at `created`
pub fn seed_service(
    store: &MemoryStore,
    name: &str,
    created: &str,
    spec: LicenseServiceSpec,
) -> ObjectKey {
    let mut resource = LicenseService::new(name, spec);
    resource.metadata.namespace = Some(NAMESPACE.to_string());
    resource.metadata.creation_timestamp = Some(created_at(created));
    store.insert(resource);
    ObjectKey::new(NAMESPACE, name)
}

pub fn seed_reporter(store: &MemoryStore, name: &str, spec: LicenseReporterSpec) -> ObjectKey {
    let mut resource = LicenseReporter::new(name, spec);
    resource.metadata.namespace = Some(NAMESPACE.to_string());
    store.insert(resource);
    ObjectKey::new(NAMESPACE, name)
}

/// Spec with HTTPS off, so passes do not generate certificates
pub fn plain_spec() -> LicenseServiceSpec {
    let mut spec = LicenseServiceSpec::default();
    spec.https.enabled = Some(false);
    spec
}

/// Run `LicenseService` passes until one finishes without a requeue
///
/// Returns the number of passes it took.
pub async fn converge_service(reconciler: &TestReconciler, key: &ObjectKey) -> usize {
    for pass in 1..=MAX_PASSES {
        let outcome: Outcome = reconciler
            .reconcile_license_service(key)
            .await
            .expect("pass succeeds");
        if outcome.is_done() {
            return pass;
        }
    }
    panic!("LicenseService {key} did not converge within {MAX_PASSES} passes");
}

pub async fn converge_reporter(reconciler: &TestReconciler, key: &ObjectKey) -> usize {
    for pass in 1..=MAX_PASSES {
        let outcome = reconciler
            .reconcile_license_reporter(key)
            .await
            .expect("pass succeeds");
        if outcome.is_done() {
            return pass;
        }
    }
    panic!("LicenseReporter {key} did not converge within {MAX_PASSES} passes");
}

pub fn state_of(store: &MemoryStore, key: &ObjectKey) -> Option<String> {
    store
        .object::<LicenseService>(key)
        .and_then(|s| s.status)
        .and_then(|s| s.state)
}
