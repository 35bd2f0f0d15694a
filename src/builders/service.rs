//! Objects owned by a `LicenseService`

use super::common::{
    container_port, env, env_from_secret, http_probe, ingress, mount_certificates, object_meta,
    port_name, pull_secrets, random_token, route, selector_labels, standard_labels,
    SERVICE_CA_SECRET_ANNOTATION, CERTS_DIR,
};
use super::resolve::ResolvedService;
use crate::constants::{API_GROUP, LICENSE_SERVICE_PORT};
use crate::crd::{
    CertSource, MeterDefinition, MeteringDefinition, MeteringDefinitionSpec, MonitorEndpoint,
    MonitorNamespaceSelector, MonitorSelector, MonitorTlsConfig, ResourceFilter, Route,
    ServiceMonitor, ServiceMonitorSpec,
};
use crate::engine::ObjectKey;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, EnvVar, EnvVarSource, ObjectFieldSelector, PodSpec, PodTemplateSpec,
    Secret, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    Ingress, NetworkPolicy, NetworkPolicyIngressRule, NetworkPolicyPort, NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;

const APP: &str = "license-service";
const COMPONENT: &str = "api";

/// Key of the API token inside its secret
pub const API_TOKEN_KEY: &str = "token";

/// Builds the desired objects of one resolved `LicenseService`
#[derive(Debug, Clone, Copy)]
pub struct ServiceBuilder<'a> {
    resolved: &'a ResolvedService,
}

impl<'a> ServiceBuilder<'a> {
    pub fn new(resolved: &'a ResolvedService) -> Self {
        Self { resolved }
    }

    fn namespace(&self) -> &str {
        &self.resolved.key.namespace
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        standard_labels(APP, &self.resolved.key.name, COMPONENT)
    }

    /// Label selector of the API pods, as used to list them
    pub fn pod_selector(&self) -> BTreeMap<String, String> {
        selector_labels(APP, &self.resolved.key.name)
    }

    fn meta(&self, name: &str) -> ObjectMeta {
        object_meta(name, self.namespace(), &self.labels())
    }

    fn workload_key(&self, name: &str) -> ObjectKey {
        ObjectKey::new(self.namespace(), name)
    }

    pub fn deployment_key(&self) -> ObjectKey {
        self.workload_key(&self.resolved.names.workload)
    }

    pub fn tls_secret_key(&self) -> ObjectKey {
        self.workload_key(&self.resolved.names.tls)
    }

    pub fn route_key(&self) -> ObjectKey {
        self.workload_key(&self.resolved.names.workload)
    }

    /// Generated bearer token clients use to call the API
    pub fn api_token_secret(&self) -> Secret {
        Secret {
            metadata: self.meta(&self.resolved.names.api_token),
            type_: Some("Opaque".to_string()),
            data: Some(BTreeMap::from([(
                API_TOKEN_KEY.to_string(),
                ByteString(random_token().into_bytes()),
            )])),
            ..Secret::default()
        }
    }

    /// Connection details for clients in the cluster
    pub fn info_config_map(&self) -> ConfigMap {
        let resolved = self.resolved;
        let scheme = if resolved.https.enabled { "https" } else { "http" };
        let data = BTreeMap::from([
            (
                "url".to_string(),
                format!(
                    "{scheme}://{}.{}.svc:{}",
                    resolved.names.workload,
                    self.namespace(),
                    LICENSE_SERVICE_PORT
                ),
            ),
            (
                "tokenSecret".to_string(),
                resolved.names.api_token.clone(),
            ),
            (
                "namespaceScope".to_string(),
                resolved.namespace_scope.to_string(),
            ),
        ]);
        ConfigMap {
            metadata: self.meta(&resolved.names.info),
            data: Some(data),
            ..ConfigMap::default()
        }
    }

    pub fn service(&self) -> Service {
        let https = &self.resolved.https;
        let mut metadata = self.meta(&self.resolved.names.workload);
        if https.enabled && https.source == CertSource::Ocp {
            metadata.annotations = Some(BTreeMap::from([(
                SERVICE_CA_SECRET_ANNOTATION.to_string(),
                self.resolved.names.tls.clone(),
            )]));
        }
        Service {
            metadata,
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                selector: Some(self.pod_selector()),
                ports: Some(vec![ServicePort {
                    name: Some(port_name(https).to_string()),
                    port: LICENSE_SERVICE_PORT,
                    target_port: Some(IntOrString::Int(LICENSE_SERVICE_PORT)),
                    protocol: Some("TCP".to_string()),
                    ..ServicePort::default()
                }]),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        }
    }

    pub fn deployment(&self) -> Deployment {
        let resolved = self.resolved;
        let https = &resolved.https;
        let mut container = Container {
            name: APP.to_string(),
            image: Some(resolved.container.image.clone()),
            image_pull_policy: Some(resolved.container.pull_policy.clone()),
            ports: Some(vec![container_port(port_name(https), LICENSE_SERVICE_PORT)]),
            env: Some(vec![
                env("HTTPS_ENABLE", https.enabled.to_string()),
                env("HTTPS_CERTS_DIR", CERTS_DIR),
                env("SERVICE_PORT", LICENSE_SERVICE_PORT.to_string()),
                env(
                    "NAMESPACE_SCOPE_ENABLED",
                    resolved.namespace_scope.to_string(),
                ),
                env_from_secret("API_TOKEN", &resolved.names.api_token, API_TOKEN_KEY),
                EnvVar {
                    name: "WATCH_NAMESPACE".to_string(),
                    value_from: Some(EnvVarSource {
                        field_ref: Some(ObjectFieldSelector {
                            field_path: "metadata.namespace".to_string(),
                            api_version: None,
                        }),
                        ..EnvVarSource::default()
                    }),
                    ..EnvVar::default()
                },
            ]),
            readiness_probe: Some(http_probe("/health", LICENSE_SERVICE_PORT, https.enabled, 5)),
            liveness_probe: Some(http_probe("/health", LICENSE_SERVICE_PORT, https.enabled, 30)),
            resources: resolved.container.resources.clone(),
            ..Container::default()
        };
        let volumes = mount_certificates(&mut container, https).map(|v| vec![v]);

        Deployment {
            metadata: self.meta(&resolved.names.workload),
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(self.pod_selector()),
                    ..LabelSelector::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(self.labels()),
                        ..ObjectMeta::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        image_pull_secrets: pull_secrets(&resolved.image_pull_secrets),
                        volumes,
                        ..PodSpec::default()
                    }),
                },
                ..DeploymentSpec::default()
            }),
            ..Deployment::default()
        }
    }

    /// Route, given the PEM of the serving certificate when it is self-signed
    pub fn route(&self, destination_ca: Option<String>) -> Route {
        route(
            self.meta(&self.resolved.names.workload),
            &self.resolved.names.workload,
            &self.resolved.https,
            &self.resolved.exposure,
            destination_ca,
        )
    }

    pub fn ingress(&self) -> Option<Ingress> {
        ingress(
            self.meta(&self.resolved.names.workload),
            &self.resolved.names.workload,
            &self.resolved.https,
            &self.resolved.exposure,
        )
    }

    /// Only the API port accepts traffic
    pub fn network_policy(&self) -> NetworkPolicy {
        NetworkPolicy {
            metadata: self.meta(&self.resolved.names.workload),
            spec: Some(NetworkPolicySpec {
                pod_selector: Some(LabelSelector {
                    match_labels: Some(self.pod_selector()),
                    ..LabelSelector::default()
                }),
                policy_types: Some(vec!["Ingress".to_string()]),
                ingress: Some(vec![NetworkPolicyIngressRule {
                    ports: Some(vec![NetworkPolicyPort {
                        port: Some(IntOrString::Int(LICENSE_SERVICE_PORT)),
                        protocol: Some("TCP".to_string()),
                        end_port: None,
                    }]),
                    from: None,
                }]),
                ..NetworkPolicySpec::default()
            }),
            ..NetworkPolicy::default()
        }
    }

    pub fn service_monitor(&self) -> ServiceMonitor {
        let https = &self.resolved.https;
        let tls_config = https.enabled.then(|| MonitorTlsConfig {
            server_name: Some(format!(
                "{}.{}.svc",
                self.resolved.names.workload,
                self.namespace()
            )),
            insecure_skip_verify: Some(https.source != CertSource::Ocp),
        });
        ServiceMonitor {
            metadata: self.meta(&self.resolved.names.workload),
            spec: ServiceMonitorSpec {
                selector: MonitorSelector {
                    match_labels: self.pod_selector(),
                },
                namespace_selector: Some(MonitorNamespaceSelector {
                    match_names: vec![self.namespace().to_string()],
                }),
                endpoints: vec![MonitorEndpoint {
                    port: Some(port_name(https).to_string()),
                    path: Some("/metrics".to_string()),
                    scheme: Some(port_name(https).to_string()),
                    interval: Some("30s".to_string()),
                    tls_config,
                }],
            },
        }
    }

    pub fn metering_definition(&self) -> MeteringDefinition {
        MeteringDefinition {
            metadata: self.meta(&self.resolved.names.workload),
            spec: MeteringDefinitionSpec {
                group: API_GROUP.to_string(),
                kind: "LicenseService".to_string(),
                resource_filters: vec![ResourceFilter {
                    workload_type: "Service".to_string(),
                    match_labels: self.pod_selector(),
                }],
                meters: vec![MeterDefinition {
                    metric_id: "license-service-products".to_string(),
                    name: "license_service_products".to_string(),
                    description: Some(
                        "Licensed products reported by the license service".to_string(),
                    ),
                    aggregation: "max".to_string(),
                    period: "1h".to_string(),
                    query: "product_license_usage".to_string(),
                    workload_type: "Service".to_string(),
                }],
            },
        }
    }
}
