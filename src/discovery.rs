//! # Background Discovery
//!
//! A long-lived task that periodically counts the licensed products running in
//! the cluster. It follows the namespace-scope flag of the active license
//! service through the scope broadcast: while the scope is restricted the
//! cluster-wide scan is skipped.

use crate::broadcast::ScopeSubscriber;
use crate::constants::PRODUCT_ID_ANNOTATION;
use crate::engine::{list_objects, ObjectApi};
use crate::observability::metrics;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What one scan found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Workloads inspected
    pub workloads: usize,
    /// Distinct product identifiers
    pub products: BTreeSet<String>,
}

/// Cluster-wide workload scan
#[async_trait]
pub trait WorkloadScanner: Send + Sync {
    async fn scan(&self) -> Result<ScanReport, kube::Error>;
}

/// Scans pods in every namespace for the product annotation
#[derive(Debug, Clone)]
pub struct PodScanner<S> {
    store: S,
}

impl<S> PodScanner<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: ObjectApi<Pod>> WorkloadScanner for PodScanner<S> {
    async fn scan(&self) -> Result<ScanReport, kube::Error> {
        let pods = list_objects::<Pod, _>(&self.store, None, None).await?;
        let products = pods
            .iter()
            .filter_map(|pod| pod.metadata.annotations.as_ref()?.get(PRODUCT_ID_ANNOTATION))
            .cloned()
            .collect();
        Ok(ScanReport {
            workloads: pods.len(),
            products,
        })
    }
}

/// A change of discovery scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeTransition {
    ToRestricted,
    ToClusterWide,
}

/// Remembers the last scope so each transition is reported exactly once
#[derive(Debug, Default)]
pub struct ScopeTracker {
    restricted: Option<bool>,
}

impl ScopeTracker {
    /// Record the current flag; returns the transition when it changed
    pub fn observe(&mut self, restricted: bool) -> Option<ScopeTransition> {
        if self.restricted.replace(restricted) == Some(restricted) {
            return None;
        }
        Some(if restricted {
            ScopeTransition::ToRestricted
        } else {
            ScopeTransition::ToClusterWide
        })
    }

    pub fn restricted(&self) -> Option<bool> {
        self.restricted
    }
}

/// Result of one [`DiscoveryTask::tick`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    Scanned(ScanReport),
    /// Scope is restricted; nothing was scanned
    Skipped,
    /// The scan failed; retried on the next tick
    Failed,
}

/// Periodic discovery driven by the scope broadcast
#[derive(Debug)]
pub struct DiscoveryTask<W> {
    scanner: W,
    subscriber: ScopeSubscriber,
    interval: Duration,
    cancel: CancellationToken,
    tracker: ScopeTracker,
}

impl<W: WorkloadScanner> DiscoveryTask<W> {
    pub fn new(
        scanner: W,
        subscriber: ScopeSubscriber,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            scanner,
            subscriber,
            interval,
            cancel,
            tracker: ScopeTracker::default(),
        }
    }

    /// Wait for the first scope value, then tick every interval until cancelled
    pub async fn run(mut self) {
        let first = tokio::select! {
            () = self.cancel.cancelled() => return,
            value = self.subscriber.first() => value,
        };
        let Some(restricted) = first else {
            info!("Scope publisher is gone before publishing, discovery not started");
            return;
        };
        self.apply_scope(restricted);
        info!("Discovery started (interval {:?})", self.interval);

        loop {
            self.tick().await;
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("Discovery stopped");
    }

    /// Drain the broadcast and scan unless the scope is restricted
    pub async fn tick(&mut self) -> Tick {
        if let Some(restricted) = self.subscriber.latest() {
            self.apply_scope(restricted);
        }
        if self.tracker.restricted() == Some(true) {
            debug!("Namespace scope is restricted, skipping cluster-wide scan");
            metrics::increment_discovery_skips();
            return Tick::Skipped;
        }

        match self.scanner.scan().await {
            Ok(report) => {
                debug!(
                    "Discovery scanned {} workloads, {} products",
                    report.workloads,
                    report.products.len()
                );
                metrics::increment_discovery_scans();
                metrics::set_discovered_products(report.products.len());
                Tick::Scanned(report)
            }
            Err(e) => {
                warn!("Discovery scan failed: {}", e);
                Tick::Failed
            }
        }
    }

    fn apply_scope(&mut self, restricted: bool) {
        match self.tracker.observe(restricted) {
            Some(ScopeTransition::ToRestricted) => {
                info!("Namespace scope enabled, discovery restricted");
            }
            Some(ScopeTransition::ToClusterWide) => {
                info!("Namespace scope disabled, discovery is cluster-wide");
            }
            None => {}
        }
    }
}
