//! Defaults resolution
//!
//! Folds the spec, the operator's workload defaults and the platform
//! capabilities into the concrete settings one pass works with.

use crate::capabilities::Capabilities;
use crate::config::WorkloadDefaults;
use crate::crd::{
    CertSource, ContainerOptions, FeatureStatus, HttpsOptions, IngressOptions, LicenseReporter,
    LicenseService, RouteOptions,
};
use crate::engine::ObjectKey;
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::ResourceRequirements;
use kube::Resource;
use tracing::warn;

/// Effective HTTPS settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHttps {
    pub enabled: bool,
    pub source: CertSource,
    /// TLS secret mounted into the pods; `None` when HTTPS is off
    pub secret_name: Option<String>,
}

impl ResolvedHttps {
    fn resolve(options: &HttpsOptions, managed_secret: &str, caps: Capabilities) -> Self {
        let enabled = options.enabled.unwrap_or(true);
        let default_source = if caps.service_ca {
            CertSource::Ocp
        } else {
            CertSource::SelfSigned
        };
        let source = match options.certs_source {
            None => default_source,
            Some(CertSource::Ocp) if !caps.service_ca => {
                warn!("Service CA is not available, falling back to a self-signed certificate");
                CertSource::SelfSigned
            }
            Some(CertSource::Custom) if options.custom_secret_name.is_none() => {
                warn!(
                    "Custom certificate source without customSecretName, \
                     using a self-signed certificate"
                );
                CertSource::SelfSigned
            }
            Some(source) => source,
        };
        let secret_name = enabled.then(|| match source {
            CertSource::Custom => options
                .custom_secret_name
                .clone()
                .unwrap_or_else(|| managed_secret.to_string()),
            CertSource::SelfSigned | CertSource::Ocp => managed_secret.to_string(),
        });
        Self {
            enabled,
            source,
            secret_name,
        }
    }

    /// The operator generates and rotates the certificate itself
    pub fn is_self_signed(&self) -> bool {
        self.enabled && self.source == CertSource::SelfSigned
    }
}

/// How the workload is reached from outside the cluster
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Exposure {
    pub route: bool,
    pub route_host: Option<String>,
    /// Ingress settings; only set when routes are not in use
    pub ingress: Option<IngressOptions>,
}

impl Exposure {
    fn resolve(route: &RouteOptions, ingress: &IngressOptions, caps: Capabilities) -> Self {
        let route_enabled = caps.routes && route.enabled.unwrap_or(true);
        Self {
            route: route_enabled,
            route_host: route.host.clone(),
            ingress: (ingress.enabled && !route_enabled).then(|| ingress.clone()),
        }
    }
}

fn identity<K: Resource<DynamicType = ()>>(resource: &K) -> Result<ObjectKey> {
    let kind = K::kind(&());
    let meta = resource.meta();
    let name = meta
        .name
        .clone()
        .ok_or_else(|| Error::missing(kind.as_ref(), "metadata.name"))?;
    let namespace = meta
        .namespace
        .clone()
        .ok_or_else(|| Error::missing(format!("{kind} {name}"), "metadata.namespace"))?;
    Ok(ObjectKey::new(namespace, name))
}

fn hostnames(explicit: &[Option<&String>], service: &str, namespace: &str) -> Vec<String> {
    let mut names: Vec<String> = explicit.iter().flatten().map(|h| (*h).to_string()).collect();
    names.push(format!("{service}.{namespace}.svc"));
    names.push(format!("{service}.{namespace}.svc.cluster.local"));
    let mut seen = std::collections::HashSet::new();
    names.retain(|name| seen.insert(name.clone()));
    names
}

/// Image and resources of one container
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedContainer {
    pub image: String,
    pub pull_policy: String,
    pub resources: Option<ResourceRequirements>,
}

impl ResolvedContainer {
    fn resolve(options: &ContainerOptions, default_image: &str, default_policy: &str) -> Self {
        Self {
            image: options
                .image
                .clone()
                .unwrap_or_else(|| default_image.to_string()),
            pull_policy: options
                .image_pull_policy
                .clone()
                .unwrap_or_else(|| default_policy.to_string()),
            resources: super::common::resource_requirements(options.resources.as_ref()),
        }
    }
}

/// Object names owned by one `LicenseService`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceNames {
    /// Deployment, service, route, ingress, network policy, monitor and meter
    pub workload: String,
    pub api_token: String,
    pub info: String,
    pub tls: String,
}

impl ServiceNames {
    pub fn new(instance: &str) -> Self {
        let workload = format!("{instance}-license-service");
        Self {
            api_token: format!("{workload}-api-token"),
            info: format!("{workload}-info"),
            tls: format!("{workload}-tls"),
            workload,
        }
    }
}

/// A `LicenseService` with every default applied
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedService {
    pub key: ObjectKey,
    pub names: ServiceNames,
    pub container: ResolvedContainer,
    pub image_pull_secrets: Vec<String>,
    pub https: ResolvedHttps,
    /// Certificate hostnames, primary first
    pub hostnames: Vec<String>,
    pub exposure: Exposure,
    pub network_policy: bool,
    pub service_monitor: bool,
    pub metering: bool,
    pub namespace_scope: bool,
}

impl ResolvedService {
    pub fn resolve(
        resource: &LicenseService,
        defaults: &WorkloadDefaults,
        caps: Capabilities,
    ) -> Result<Self> {
        let key = identity(resource)?;
        let spec = &resource.spec;
        let names = ServiceNames::new(&key.name);
        let exposure = Exposure::resolve(&spec.route, &spec.ingress, caps);
        let hostnames = hostnames(
            &[
                spec.hostname.as_ref(),
                exposure.route_host.as_ref().filter(|_| exposure.route),
                exposure.ingress.as_ref().and_then(|i| i.host.as_ref()),
            ],
            &names.workload,
            &key.namespace,
        );
        Ok(Self {
            container: ResolvedContainer::resolve(
                &spec.container,
                &defaults.license_service_image,
                &defaults.image_pull_policy,
            ),
            image_pull_secrets: spec.image_pull_secrets.clone(),
            https: ResolvedHttps::resolve(&spec.https, &names.tls, caps),
            hostnames,
            exposure,
            network_policy: spec.network_policy_enabled,
            service_monitor: caps.service_monitors
                && spec.features.monitoring_enabled.unwrap_or(true),
            metering: caps.metering && spec.features.metering_enabled.unwrap_or(true),
            namespace_scope: spec.features.namespace_scope_enabled,
            names,
            key,
        })
    }

    /// Feature mirror written into status
    pub fn features(&self) -> FeatureStatus {
        FeatureStatus {
            https_enabled: self.https.enabled,
            cert_source: self
                .https
                .enabled
                .then(|| self.https.source.as_str().to_string()),
            route_enabled: self.exposure.route,
            ingress_enabled: self.exposure.ingress.is_some(),
            network_policy_enabled: self.network_policy,
            namespace_scope_enabled: self.namespace_scope,
            service_monitor_enabled: self.service_monitor,
            metering_enabled: self.metering,
        }
    }
}

/// Object names owned by one `LicenseReporter`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReporterNames {
    pub workload: String,
    pub credentials: String,
    pub tls: String,
}

impl ReporterNames {
    pub fn new(instance: &str) -> Self {
        let workload = format!("{instance}-reporter");
        Self {
            credentials: format!("{workload}-db-credentials"),
            tls: format!("{workload}-tls"),
            workload,
        }
    }
}

/// A `LicenseReporter` with every default applied
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedReporter {
    pub key: ObjectKey,
    pub names: ReporterNames,
    pub receiver: ResolvedContainer,
    pub database: ResolvedContainer,
    pub image_pull_secrets: Vec<String>,
    pub https: ResolvedHttps,
    pub hostnames: Vec<String>,
    pub exposure: Exposure,
}

impl ResolvedReporter {
    pub fn resolve(
        resource: &LicenseReporter,
        defaults: &WorkloadDefaults,
        caps: Capabilities,
    ) -> Result<Self> {
        let key = identity(resource)?;
        let spec = &resource.spec;
        let names = ReporterNames::new(&key.name);
        let exposure = Exposure::resolve(&spec.route, &spec.ingress, caps);
        let hostnames = hostnames(
            &[
                spec.hostname.as_ref(),
                exposure.route_host.as_ref().filter(|_| exposure.route),
                exposure.ingress.as_ref().and_then(|i| i.host.as_ref()),
            ],
            &names.workload,
            &key.namespace,
        );
        Ok(Self {
            receiver: ResolvedContainer::resolve(
                &spec.receiver,
                &defaults.reporter_receiver_image,
                &defaults.image_pull_policy,
            ),
            database: ResolvedContainer::resolve(
                &spec.database,
                &defaults.reporter_database_image,
                &defaults.image_pull_policy,
            ),
            image_pull_secrets: spec.image_pull_secrets.clone(),
            https: ResolvedHttps::resolve(&spec.https, &names.tls, caps),
            hostnames,
            exposure,
            names,
            key,
        })
    }

    pub fn features(&self) -> FeatureStatus {
        FeatureStatus {
            https_enabled: self.https.enabled,
            cert_source: self
                .https
                .enabled
                .then(|| self.https.source.as_str().to_string()),
            route_enabled: self.exposure.route,
            ingress_enabled: self.exposure.ingress.is_some(),
            ..FeatureStatus::default()
        }
    }
}
