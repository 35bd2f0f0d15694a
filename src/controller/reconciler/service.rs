//! # LicenseService Driver
//!
//! Elects the active `LicenseService`, then converges its children in a fixed
//! order. The first step that fails or asks for a requeue ends the pass.

use super::status::{observe, write_status_if_changed, StatusInput};
use super::types::{Reconciler, Store};
use super::utils::{certificate_step, destination_ca};
use crate::builders::{ResolvedService, ServiceBuilder};
use crate::capabilities::{Capabilities, CapabilityProbe};
use crate::crd::{LicenseService, MeteringDefinition, Route, ServiceMonitor};
use crate::election::{needs_election, run_election, Elected, ElectionState};
use crate::engine::{fetch, list_objects, Converger, ObjectKey, Outcome, UpdateStrategy};
use crate::error::Result;
use crate::observability::metrics;
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Wait between deletion passes that asked for a requeue without a delay
const DELETION_RETRY: Duration = Duration::from_secs(1);

/// Steps of a `LicenseService` pass, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStep {
    ApiTokenSecret,
    InfoConfigMap,
    Service,
    Certificate,
    Deployment,
    Route,
    Ingress,
    NetworkPolicy,
    ServiceMonitor,
    MeteringDefinition,
}

impl ServiceStep {
    pub const ORDER: [Self; 10] = [
        Self::ApiTokenSecret,
        Self::InfoConfigMap,
        Self::Service,
        Self::Certificate,
        Self::Deployment,
        Self::Route,
        Self::Ingress,
        Self::NetworkPolicy,
        Self::ServiceMonitor,
        Self::MeteringDefinition,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApiTokenSecret => "api-token-secret",
            Self::InfoConfigMap => "info-config-map",
            Self::Service => "service",
            Self::Certificate => "certificate",
            Self::Deployment => "deployment",
            Self::Route => "route",
            Self::Ingress => "ingress",
            Self::NetworkPolicy => "network-policy",
            Self::ServiceMonitor => "service-monitor",
            Self::MeteringDefinition => "metering-definition",
        }
    }
}

/// Where the current instance stands in the election
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Standing {
    Elected(ElectionState),
    /// An election is needed but the gate is closed for this long
    Waiting(Duration),
}

/// One active pass over the children of a `LicenseService`
struct ServicePass<'a, S> {
    converger: Converger<'a, S>,
    resolved: &'a ResolvedService,
    builder: ServiceBuilder<'a>,
    caps: Capabilities,
}

impl<S: Store> ServicePass<'_, S> {
    async fn run(&self, step: ServiceStep) -> Result<Outcome> {
        let converger = &self.converger;
        let builder = &self.builder;
        let resolved = self.resolved;
        let workload = builder.deployment_key();
        match step {
            ServiceStep::ApiTokenSecret => {
                converger
                    .ensure(builder.api_token_secret(), UpdateStrategy::CreateOnly)
                    .await
            }
            ServiceStep::InfoConfigMap => {
                converger
                    .ensure(builder.info_config_map(), UpdateStrategy::InPlace)
                    .await
            }
            ServiceStep::Service => {
                converger
                    .ensure(builder.service(), UpdateStrategy::InPlace)
                    .await
            }
            ServiceStep::Certificate => {
                certificate_step(
                    converger,
                    &resolved.https,
                    builder.tls_secret_key(),
                    &resolved.hostnames,
                    builder.labels(),
                    workload,
                )
                .await
            }
            ServiceStep::Deployment => {
                converger
                    .ensure(builder.deployment(), UpdateStrategy::InPlace)
                    .await
            }
            ServiceStep::Route => {
                if !self.caps.routes {
                    return Ok(Outcome::done());
                }
                if !resolved.exposure.route {
                    return converger.ensure_absent::<Route>(&builder.route_key()).await;
                }
                let ca = destination_ca(
                    converger.store(),
                    &resolved.key.namespace,
                    &resolved.https,
                )
                .await?;
                converger
                    .ensure(builder.route(ca), UpdateStrategy::Recreate)
                    .await
            }
            ServiceStep::Ingress => match builder.ingress() {
                Some(ingress) => converger.ensure(ingress, UpdateStrategy::InPlace).await,
                None => converger.ensure_absent::<Ingress>(&workload).await,
            },
            ServiceStep::NetworkPolicy => {
                if resolved.network_policy {
                    converger
                        .ensure(builder.network_policy(), UpdateStrategy::InPlace)
                        .await
                } else {
                    converger.ensure_absent::<NetworkPolicy>(&workload).await
                }
            }
            ServiceStep::ServiceMonitor => {
                if !self.caps.service_monitors {
                    return Ok(Outcome::done());
                }
                if resolved.service_monitor {
                    converger
                        .ensure(builder.service_monitor(), UpdateStrategy::InPlace)
                        .await
                } else {
                    converger.ensure_absent::<ServiceMonitor>(&workload).await
                }
            }
            ServiceStep::MeteringDefinition => {
                if !self.caps.metering {
                    return Ok(Outcome::done());
                }
                if resolved.metering {
                    converger
                        .ensure(builder.metering_definition(), UpdateStrategy::InPlace)
                        .await
                } else {
                    converger
                        .ensure_absent::<MeteringDefinition>(&workload)
                        .await
                }
            }
        }
    }
}

impl<S: Store, P: CapabilityProbe> Reconciler<S, P> {
    /// Converge one `LicenseService` and its children
    ///
    /// # Errors
    ///
    /// Returns the first platform, certificate or election error hit by the
    /// pass; the caller retries with backoff.
    pub async fn reconcile_license_service(&self, key: &ObjectKey) -> Result<Outcome> {
        let Some(resource) = fetch::<LicenseService, _>(&self.store, key).await? else {
            info!("LicenseService {} no longer exists", key);
            return self.handle_service_deleted(key).await;
        };
        if resource.metadata.deletion_timestamp.is_some() {
            debug!("LicenseService {} is being deleted, skipping", key);
            return Ok(Outcome::done());
        }

        let caps = self.probe.detect().await?;
        let resolved = ResolvedService::resolve(&resource, &self.config.defaults, caps)?;
        let builder = ServiceBuilder::new(&resolved);

        let state = match self.standing(&resource, key).await? {
            Standing::Elected(state) => state,
            Standing::Waiting(remaining) => {
                debug!(
                    "Election for {} is cooling down, retrying in {:?}",
                    key, remaining
                );
                return Ok(Outcome::requeue_after(remaining));
            }
        };

        let status = StatusInput {
            state: Some(state),
            features: Some(resolved.features()),
            pod_selector: builder.pod_selector(),
            generation: resource.metadata.generation,
        };

        if state == ElectionState::Inactive {
            debug!("LicenseService {} is inactive, leaving children alone", key);
            self.write_service_status(&resource, key, &status).await?;
            return Ok(Outcome::requeue_after(self.config.inactive_requeue()));
        }

        self.scope.publish(resolved.namespace_scope);
        metrics::set_namespace_scope_enabled(resolved.namespace_scope);

        let pass = ServicePass {
            converger: Converger::new(&self.store, &resource, self.config.timing())?,
            resolved: &resolved,
            builder,
            caps,
        };
        for step in ServiceStep::ORDER {
            let outcome = pass.run(step).await.inspect_err(|e| {
                warn!("Step {} of LicenseService {} failed: {}", step.as_str(), key, e);
            })?;
            if !outcome.is_done() {
                debug!(
                    "Step {} of LicenseService {} requested a requeue",
                    step.as_str(),
                    key
                );
                return Ok(outcome);
            }
        }

        self.write_service_status(&resource, key, &status).await?;
        Ok(Outcome::done())
    }

    async fn write_service_status(
        &self,
        resource: &LicenseService,
        key: &ObjectKey,
        input: &StatusInput,
    ) -> Result<()> {
        let current = resource.status.as_ref();
        let desired = observe(&self.store, &key.namespace, input, current).await?;
        write_status_if_changed::<LicenseService, _>(&self.store, key, current, &desired).await?;
        Ok(())
    }

    async fn instances(&self) -> Result<Vec<LicenseService>> {
        let instances = list_objects::<LicenseService, _>(
            &self.store,
            self.config.watch_namespace.as_deref(),
            None,
        )
        .await?;
        Ok(instances
            .into_iter()
            .filter(|i| i.metadata.deletion_timestamp.is_none())
            .collect())
    }

    async fn standing(&self, current: &LicenseService, key: &ObjectKey) -> Result<Standing> {
        let mut instances = self.instances().await?;
        if !instances
            .iter()
            .any(|i| ObjectKey::of(i).as_ref() == Some(key))
        {
            instances.push(current.clone());
        }

        if !needs_election(current, &instances) {
            if let Some(state) = current.election_state() {
                return Ok(Standing::Elected(state));
            }
        }
        if let Err(remaining) = self.election_gate.try_acquire() {
            return Ok(Standing::Waiting(remaining));
        }

        let report = run_election(&self.store, &instances).await?;
        info!(
            "Election among {} LicenseService instance(s) won by {}",
            instances.len(),
            report
                .winner
                .as_ref()
                .map_or_else(|| "nobody".to_string(), ToString::to_string)
        );
        Ok(Standing::Elected(if report.winner.as_ref() == Some(key) {
            ElectionState::Active
        } else {
            ElectionState::Inactive
        }))
    }

    /// Re-elect after `key` was deleted, waiting out the cooldown if needed
    ///
    /// A deletion that lands inside the election cooldown only gets a requeue
    /// back; nothing else would ever revisit a deleted object, so the wait is
    /// taken here. Stops early when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns the first error of a deletion pass.
    pub async fn reelect_after_deletion(
        &self,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            if fetch::<LicenseService, _>(&self.store, key).await?.is_some() {
                debug!("LicenseService {} exists again, leaving it to the controller", key);
                return Ok(());
            }
            let outcome = self.handle_service_deleted(key).await?;
            if outcome.is_done() {
                return Ok(());
            }
            let delay = outcome.requeue_after.unwrap_or(DELETION_RETRY);
            debug!("Re-election after deleting {} retries in {:?}", key, delay);
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Re-elect among the remaining instances after `key` was deleted
    async fn handle_service_deleted(&self, key: &ObjectKey) -> Result<Outcome> {
        let remaining: Vec<LicenseService> = self
            .instances()
            .await?
            .into_iter()
            .filter(|i| ObjectKey::of(i).as_ref() != Some(key))
            .collect();
        let active = remaining
            .iter()
            .filter(|i| i.election_state() == Some(ElectionState::Active))
            .count();
        if remaining.is_empty() || active == 1 {
            return Ok(Outcome::done());
        }
        if let Err(cooldown) = self.election_gate.try_acquire() {
            return Ok(Outcome::requeue_after(cooldown));
        }
        let report = run_election(&self.store, &remaining).await?;
        info!(
            "Re-elected after {} was deleted: {} now active",
            key,
            report
                .winner
                .as_ref()
                .map_or_else(|| "nobody".to_string(), ToString::to_string)
        );
        Ok(Outcome::done())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_order_puts_certificate_before_deployment() {
        let position = |step| ServiceStep::ORDER.iter().position(|s| *s == step);
        assert!(position(ServiceStep::Certificate) < position(ServiceStep::Deployment));
        assert!(position(ServiceStep::Service) < position(ServiceStep::Certificate));
        assert_eq!(ServiceStep::ORDER[0], ServiceStep::ApiTokenSecret);
        assert_eq!(
            ServiceStep::ORDER.last(),
            Some(&ServiceStep::MeteringDefinition)
        );
    }

    #[test]
    fn test_step_names_are_distinct() {
        let mut names: Vec<_> = ServiceStep::ORDER.iter().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ServiceStep::ORDER.len());
    }
}
