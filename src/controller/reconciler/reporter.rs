//! # LicenseReporter Driver
//!
//! Converges the receiver and its database. Reporters take no part in the
//! election: every instance is served.

use super::status::{observe, write_status_if_changed, StatusInput};
use super::types::{Reconciler, Store};
use super::utils::{certificate_step, destination_ca};
use crate::builders::{ReporterBuilder, ResolvedReporter};
use crate::capabilities::{Capabilities, CapabilityProbe};
use crate::crd::{LicenseReporter, Route};
use crate::engine::{fetch, Converger, ObjectKey, Outcome, UpdateStrategy};
use crate::error::Result;
use k8s_openapi::api::networking::v1::Ingress;
use tracing::{debug, warn};

/// Steps of a `LicenseReporter` pass, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReporterStep {
    CredentialsSecret,
    Service,
    Certificate,
    Deployment,
    Route,
    Ingress,
}

impl ReporterStep {
    pub const ORDER: [Self; 6] = [
        Self::CredentialsSecret,
        Self::Service,
        Self::Certificate,
        Self::Deployment,
        Self::Route,
        Self::Ingress,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CredentialsSecret => "credentials-secret",
            Self::Service => "service",
            Self::Certificate => "certificate",
            Self::Deployment => "deployment",
            Self::Route => "route",
            Self::Ingress => "ingress",
        }
    }
}

struct ReporterPass<'a, S> {
    converger: Converger<'a, S>,
    resolved: &'a ResolvedReporter,
    builder: ReporterBuilder<'a>,
    caps: Capabilities,
}

impl<S: Store> ReporterPass<'_, S> {
    async fn run(&self, step: ReporterStep) -> Result<Outcome> {
        let converger = &self.converger;
        let builder = &self.builder;
        let resolved = self.resolved;
        match step {
            ReporterStep::CredentialsSecret => {
                converger
                    .ensure(builder.credentials_secret(), UpdateStrategy::CreateOnly)
                    .await
            }
            ReporterStep::Service => {
                converger
                    .ensure(builder.service(), UpdateStrategy::InPlace)
                    .await
            }
            ReporterStep::Certificate => {
                certificate_step(
                    converger,
                    &resolved.https,
                    builder.tls_secret_key(),
                    &resolved.hostnames,
                    builder.labels(),
                    builder.deployment_key(),
                )
                .await
            }
            ReporterStep::Deployment => {
                converger
                    .ensure(builder.deployment(), UpdateStrategy::InPlace)
                    .await
            }
            ReporterStep::Route => {
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
            ReporterStep::Ingress => match builder.ingress() {
                Some(ingress) => converger.ensure(ingress, UpdateStrategy::InPlace).await,
                None => {
                    converger
                        .ensure_absent::<Ingress>(&builder.deployment_key())
                        .await
                }
            },
        }
    }
}

impl<S: Store, P: CapabilityProbe> Reconciler<S, P> {
    /// Converge one `LicenseReporter` and its children
    ///
    /// # Errors
    ///
    /// Returns the first platform or certificate error hit by the pass.
    pub async fn reconcile_license_reporter(&self, key: &ObjectKey) -> Result<Outcome> {
        let Some(resource) = fetch::<LicenseReporter, _>(&self.store, key).await? else {
            debug!("LicenseReporter {} no longer exists", key);
            return Ok(Outcome::done());
        };
        if resource.metadata.deletion_timestamp.is_some() {
            debug!("LicenseReporter {} is being deleted, skipping", key);
            return Ok(Outcome::done());
        }

        let caps = self.probe.detect().await?;
        let resolved = ResolvedReporter::resolve(&resource, &self.config.defaults, caps)?;
        let pass = ReporterPass {
            converger: Converger::new(&self.store, &resource, self.config.timing())?,
            resolved: &resolved,
            builder: ReporterBuilder::new(&resolved),
            caps,
        };
        for step in ReporterStep::ORDER {
            let outcome = pass.run(step).await.inspect_err(|e| {
                warn!("Step {} of LicenseReporter {} failed: {}", step.as_str(), key, e);
            })?;
            if !outcome.is_done() {
                debug!(
                    "Step {} of LicenseReporter {} requested a requeue",
                    step.as_str(),
                    key
                );
                return Ok(outcome);
            }
        }

        let input = StatusInput {
            state: None,
            features: Some(resolved.features()),
            pod_selector: pass.builder.pod_selector(),
            generation: resource.metadata.generation,
        };
        let current = resource.status.as_ref();
        let desired = observe(&self.store, &key.namespace, &input, current).await?;
        write_status_if_changed::<LicenseReporter, _>(&self.store, key, current, &desired).await?;
        Ok(Outcome::done())
    }
}
