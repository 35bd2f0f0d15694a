//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `license_operator_reconciliations_total{kind}` - Reconciliation passes started
//! - `license_operator_reconciliation_errors_total{kind}` - Passes that ended in an error
//! - `license_operator_reconciliation_duration_seconds{kind}` - Duration of a pass
//! - `license_operator_object_operations_total{kind,operation}` - Writes to child objects
//! - `license_operator_certificate_actions_total{action}` - Certificates created or rotated
//! - `license_operator_elections_total{result}` - Elections run
//! - `license_operator_discovery_scans_total` - Cluster-wide discovery scans
//! - `license_operator_discovery_skips_total` - Scans skipped while namespace-scoped
//! - `license_operator_discovered_products` - Distinct products seen by the last scan
//! - `license_operator_namespace_scope_enabled` - 1 when the active instance is namespace-scoped

use anyhow::Result;
use prometheus::{HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "license_operator_reconciliations_total",
            "Total number of reconciliation passes by resource kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "license_operator_reconciliation_errors_total",
            "Total number of failed reconciliation passes by resource kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "license_operator_reconciliation_duration_seconds",
            "Duration of reconciliation passes in seconds by resource kind",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static OBJECT_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "license_operator_object_operations_total",
            "Total number of writes to managed objects by kind and operation",
        ),
        &["kind", "operation"],
    )
    .expect("Failed to create OBJECT_OPERATIONS_TOTAL metric - this should never happen")
});

static CERTIFICATE_ACTIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "license_operator_certificate_actions_total",
            "Total number of certificates created or rotated",
        ),
        &["action"],
    )
    .expect("Failed to create CERTIFICATE_ACTIONS_TOTAL metric - this should never happen")
});

static ELECTIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "license_operator_elections_total",
            "Total number of elections by result",
        ),
        &["result"],
    )
    .expect("Failed to create ELECTIONS_TOTAL metric - this should never happen")
});

static DISCOVERY_SCANS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "license_operator_discovery_scans_total",
        "Total number of cluster-wide discovery scans",
    )
    .expect("Failed to create DISCOVERY_SCANS_TOTAL metric - this should never happen")
});

static DISCOVERY_SKIPS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "license_operator_discovery_skips_total",
        "Total number of discovery scans skipped because the scope is restricted",
    )
    .expect("Failed to create DISCOVERY_SKIPS_TOTAL metric - this should never happen")
});

static DISCOVERED_PRODUCTS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "license_operator_discovered_products",
        "Distinct products found by the last discovery scan",
    )
    .expect("Failed to create DISCOVERED_PRODUCTS metric - this should never happen")
});

static NAMESPACE_SCOPE_ENABLED: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "license_operator_namespace_scope_enabled",
        "1 when the active license service restricts discovery to its namespaces",
    )
    .expect("Failed to create NAMESPACE_SCOPE_ENABLED metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(OBJECT_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CERTIFICATE_ACTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ELECTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DISCOVERY_SCANS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DISCOVERY_SKIPS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DISCOVERED_PRODUCTS.clone()))?;
    REGISTRY.register(Box::new(NAMESPACE_SCOPE_ENABLED.clone()))?;

    Ok(())
}

pub fn increment_reconciliations(kind: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_reconciliation_duration(kind: &str, duration: f64) {
    RECONCILIATION_DURATION
        .with_label_values(&[kind])
        .observe(duration);
}

pub fn increment_object_operations(kind: &str, operation: &str) {
    OBJECT_OPERATIONS_TOTAL
        .with_label_values(&[kind, operation])
        .inc();
}

pub fn increment_certificate_actions(action: &str) {
    CERTIFICATE_ACTIONS_TOTAL.with_label_values(&[action]).inc();
}

pub fn increment_elections(result: &str) {
    ELECTIONS_TOTAL.with_label_values(&[result]).inc();
}

pub fn increment_discovery_scans() {
    DISCOVERY_SCANS_TOTAL.inc();
}

pub fn increment_discovery_skips() {
    DISCOVERY_SKIPS_TOTAL.inc();
}

pub fn set_discovered_products(count: usize) {
    DISCOVERED_PRODUCTS.set(i64::try_from(count).unwrap_or(i64::MAX));
}

pub fn set_namespace_scope_enabled(enabled: bool) {
    NAMESPACE_SCOPE_ENABLED.set(i64::from(enabled));
}
