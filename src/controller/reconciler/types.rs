//! # Types
//!
//! Core types for the reconciler.

use crate::broadcast::ScopePublisher;
use crate::capabilities::CapabilityProbe;
use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::crd::{LicenseReporter, LicenseService, MeteringDefinition, Route, ServiceMonitor};
use crate::election::ElectionGate;
use crate::engine::ObjectApi;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Every kind the drivers read or write
pub trait Store:
    ObjectApi<LicenseService>
    + ObjectApi<LicenseReporter>
    + ObjectApi<Deployment>
    + ObjectApi<Service>
    + ObjectApi<Secret>
    + ObjectApi<ConfigMap>
    + ObjectApi<Ingress>
    + ObjectApi<NetworkPolicy>
    + ObjectApi<Route>
    + ObjectApi<ServiceMonitor>
    + ObjectApi<MeteringDefinition>
    + ObjectApi<Pod>
    + 'static
{
}

impl<T> Store for T where
    T: ObjectApi<LicenseService>
        + ObjectApi<LicenseReporter>
        + ObjectApi<Deployment>
        + ObjectApi<Service>
        + ObjectApi<Secret>
        + ObjectApi<ConfigMap>
        + ObjectApi<Ingress>
        + ObjectApi<NetworkPolicy>
        + ObjectApi<Route>
        + ObjectApi<ServiceMonitor>
        + ObjectApi<MeteringDefinition>
        + ObjectApi<Pod>
        + 'static
{
}

/// Backoff state for a specific resource
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_seconds, max_seconds),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Shared context of every reconciliation pass
pub struct Reconciler<S, P> {
    pub store: S,
    pub probe: P,
    pub config: ControllerConfig,
    pub election_gate: ElectionGate,
    pub scope: ScopePublisher,
    /// Backoff state per resource (identified by kind/namespace/name)
    pub backoff_states: Mutex<HashMap<String, BackoffState>>,
}

impl<S, P> fmt::Debug for Reconciler<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("election_gate", &self.election_gate)
            .finish_non_exhaustive()
    }
}

impl<S: Store, P: CapabilityProbe> Reconciler<S, P> {
    pub fn new(store: S, probe: P, config: ControllerConfig, scope: ScopePublisher) -> Self {
        Self {
            store,
            probe,
            election_gate: ElectionGate::new(config.election_cooldown()),
            config,
            scope,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure of `resource` and return how long to wait before retrying
    pub fn next_backoff(&self, resource: &str) -> (Duration, u32) {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let state = states.entry(resource.to_string()).or_insert_with(|| {
            BackoffState::new(self.config.backoff_min_secs, self.config.backoff_max_secs)
        });
        state.increment_error();
        (state.backoff.next_backoff(), state.error_count)
    }

    /// Forget the failures of `resource` after a successful pass
    pub fn reset_backoff(&self, resource: &str) {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = states.get_mut(resource) {
            state.reset();
        }
    }
}
