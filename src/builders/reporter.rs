//! Objects owned by a `LicenseReporter`

use super::common::{
    container_port, env, env_from_secret, http_probe, ingress, mount_certificates, object_meta,
    port_name, pull_secrets, random_token, route, selector_labels, standard_labels, CERTS_DIR,
    SERVICE_CA_SECRET_ANNOTATION,
};
use super::resolve::ResolvedReporter;
use crate::constants::{REPORTER_DATABASE_PORT, REPORTER_PORT};
use crate::crd::{CertSource, Route};
use crate::engine::ObjectKey;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, PodSpec, PodTemplateSpec, Secret, Service, ServicePort,
    ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;

const APP: &str = "license-service-reporter";
const COMPONENT: &str = "reporter";
const DATABASE_NAME: &str = "licensing";
const DATABASE_USER: &str = "reporter";

/// Builds the desired objects of one resolved `LicenseReporter`
#[derive(Debug, Clone, Copy)]
pub struct ReporterBuilder<'a> {
    resolved: &'a ResolvedReporter,
}

impl<'a> ReporterBuilder<'a> {
    pub fn new(resolved: &'a ResolvedReporter) -> Self {
        Self { resolved }
    }

    fn namespace(&self) -> &str {
        &self.resolved.key.namespace
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        standard_labels(APP, &self.resolved.key.name, COMPONENT)
    }

    pub fn pod_selector(&self) -> BTreeMap<String, String> {
        selector_labels(APP, &self.resolved.key.name)
    }

    fn meta(&self, name: &str) -> ObjectMeta {
        object_meta(name, self.namespace(), &self.labels())
    }

    pub fn deployment_key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace(), &self.resolved.names.workload)
    }

    pub fn tls_secret_key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace(), &self.resolved.names.tls)
    }

    pub fn route_key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace(), &self.resolved.names.workload)
    }

    /// Database credentials, generated once
    pub fn credentials_secret(&self) -> Secret {
        let data = BTreeMap::from([
            (
                "username".to_string(),
                ByteString(DATABASE_USER.as_bytes().to_vec()),
            ),
            (
                "password".to_string(),
                ByteString(random_token().into_bytes()),
            ),
            (
                "database".to_string(),
                ByteString(DATABASE_NAME.as_bytes().to_vec()),
            ),
        ]);
        Secret {
            metadata: self.meta(&self.resolved.names.credentials),
            type_: Some("Opaque".to_string()),
            data: Some(data),
            ..Secret::default()
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
                    port: REPORTER_PORT,
                    target_port: Some(IntOrString::Int(REPORTER_PORT)),
                    protocol: Some("TCP".to_string()),
                    ..ServicePort::default()
                }]),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        }
    }

    /// Receiver and database in one pod; the database talks over localhost
    pub fn deployment(&self) -> Deployment {
        let resolved = self.resolved;
        let https = &resolved.https;
        let credentials = &resolved.names.credentials;

        let mut receiver = Container {
            name: "receiver".to_string(),
            image: Some(resolved.receiver.image.clone()),
            image_pull_policy: Some(resolved.receiver.pull_policy.clone()),
            ports: Some(vec![container_port(port_name(https), REPORTER_PORT)]),
            env: Some(vec![
                env("HTTPS_ENABLE", https.enabled.to_string()),
                env("HTTPS_CERTS_DIR", CERTS_DIR),
                env("DATABASE_HOST", "localhost"),
                env("DATABASE_PORT", REPORTER_DATABASE_PORT.to_string()),
                env_from_secret("DATABASE_NAME", credentials, "database"),
                env_from_secret("DATABASE_USER", credentials, "username"),
                env_from_secret("DATABASE_PASSWORD", credentials, "password"),
            ]),
            readiness_probe: Some(http_probe("/health", REPORTER_PORT, https.enabled, 10)),
            liveness_probe: Some(http_probe("/health", REPORTER_PORT, https.enabled, 60)),
            resources: resolved.receiver.resources.clone(),
            ..Container::default()
        };
        let mut volumes: Vec<Volume> = mount_certificates(&mut receiver, https)
            .into_iter()
            .collect();

        let database = Container {
            name: "database".to_string(),
            image: Some(resolved.database.image.clone()),
            image_pull_policy: Some(resolved.database.pull_policy.clone()),
            ports: Some(vec![container_port("postgres", REPORTER_DATABASE_PORT)]),
            env: Some(vec![
                env_from_secret("POSTGRES_DB", credentials, "database"),
                env_from_secret("POSTGRES_USER", credentials, "username"),
                env_from_secret("POSTGRES_PASSWORD", credentials, "password"),
                env("PGDATA", "/var/lib/postgresql/data/pgdata"),
            ]),
            volume_mounts: Some(vec![VolumeMount {
                name: "data".to_string(),
                mount_path: "/var/lib/postgresql/data".to_string(),
                ..VolumeMount::default()
            }]),
            resources: resolved.database.resources.clone(),
            ..Container::default()
        };
        volumes.push(Volume {
            name: "data".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Volume::default()
        });

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
                        containers: vec![receiver, database],
                        image_pull_secrets: pull_secrets(&resolved.image_pull_secrets),
                        volumes: Some(volumes),
                        ..PodSpec::default()
                    }),
                },
                ..DeploymentSpec::default()
            }),
            ..Deployment::default()
        }
    }

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
}
