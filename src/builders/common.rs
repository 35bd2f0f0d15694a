//! Shared pieces of the desired objects

use super::resolve::{Exposure, ResolvedHttps};
use crate::crd::{CertSource, Route, RoutePort, RouteSpec, RouteTargetReference, RouteTls};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction, LocalObjectReference, Probe,
    ResourceRequirements, SecretKeySelector, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

/// Value of `app.kubernetes.io/managed-by` on every object the operator writes
pub const MANAGED_BY: &str = "license-service-operator";

/// Service annotation that asks the OpenShift service CA for a serving certificate
pub const SERVICE_CA_SECRET_ANNOTATION: &str =
    "service.beta.openshift.io/serving-cert-secret-name";

/// Where certificates are mounted in the containers
pub(crate) const CERTS_DIR: &str = "/opt/licensing/certs";

/// Labels selecting the pods of one workload
pub fn selector_labels(app: &str, instance: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/name".to_string(), app.to_string()),
        ("app.kubernetes.io/instance".to_string(), instance.to_string()),
    ])
}

/// Selector labels plus component and manager
pub fn standard_labels(app: &str, instance: &str, component: &str) -> BTreeMap<String, String> {
    let mut labels = selector_labels(app, instance);
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        component.to_string(),
    );
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        MANAGED_BY.to_string(),
    );
    labels
}

pub(crate) fn object_meta(
    name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels.clone()),
        ..ObjectMeta::default()
    }
}

pub(crate) fn resource_requirements(
    options: Option<&crate::crd::ResourceOptions>,
) -> Option<ResourceRequirements> {
    let options = options?;
    let quantities = |values: &BTreeMap<String, String>| {
        (!values.is_empty()).then(|| {
            values
                .iter()
                .map(|(k, v)| (k.clone(), Quantity(v.clone())))
                .collect()
        })
    };
    Some(ResourceRequirements {
        requests: quantities(&options.requests),
        limits: quantities(&options.limits),
        ..ResourceRequirements::default()
    })
}

pub(crate) fn pull_secrets(names: &[String]) -> Option<Vec<LocalObjectReference>> {
    (!names.is_empty()).then(|| {
        names
            .iter()
            .map(|name| LocalObjectReference { name: name.clone() })
            .collect()
    })
}

pub(crate) fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..EnvVar::default()
    }
}

pub(crate) fn env_from_secret(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                optional: None,
            }),
            ..EnvVarSource::default()
        }),
        ..EnvVar::default()
    }
}

pub(crate) fn http_probe(path: &str, port: i32, https: bool, initial_delay: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(port),
            scheme: Some(if https { "HTTPS" } else { "HTTP" }.to_string()),
            ..HTTPGetAction::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        ..Probe::default()
    }
}

pub(crate) fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..ContainerPort::default()
    }
}

/// Mount the TLS secret into `container` and return the volume to add
pub(crate) fn mount_certificates(
    container: &mut Container,
    https: &ResolvedHttps,
) -> Option<Volume> {
    let secret_name = https.secret_name.as_ref().filter(|_| https.enabled)?;
    container
        .volume_mounts
        .get_or_insert_with(Vec::new)
        .push(VolumeMount {
            name: "certs".to_string(),
            mount_path: CERTS_DIR.to_string(),
            read_only: Some(true),
            ..VolumeMount::default()
        });
    Some(Volume {
        name: "certs".to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.clone()),
            ..SecretVolumeSource::default()
        }),
        ..Volume::default()
    })
}

pub(crate) fn port_name(https: &ResolvedHttps) -> &'static str {
    if https.enabled {
        "https"
    } else {
        "http"
    }
}

/// Route towards `service`
///
/// HTTPS workloads are re-encrypted at the router. A self-signed certificate
/// is not trusted by the router, so its PEM is passed as destination CA.
pub(crate) fn route(
    meta: ObjectMeta,
    service: &str,
    https: &ResolvedHttps,
    exposure: &Exposure,
    destination_ca: Option<String>,
) -> Route {
    let tls = if https.enabled {
        RouteTls {
            termination: "reencrypt".to_string(),
            insecure_edge_termination_policy: Some("Redirect".to_string()),
            destination_ca_certificate: destination_ca
                .filter(|_| https.source != CertSource::Ocp),
            ..RouteTls::default()
        }
    } else {
        RouteTls {
            termination: "edge".to_string(),
            insecure_edge_termination_policy: Some("Redirect".to_string()),
            ..RouteTls::default()
        }
    };
    Route {
        metadata: meta,
        spec: RouteSpec {
            host: exposure.route_host.clone(),
            path: None,
            to: RouteTargetReference {
                kind: "Service".to_string(),
                name: service.to_string(),
                weight: Some(100),
            },
            port: Some(RoutePort {
                target_port: port_name(https).to_string(),
            }),
            tls: Some(tls),
        },
    }
}

/// Ingress towards `service`; `None` when ingress is not in use
pub(crate) fn ingress(
    mut meta: ObjectMeta,
    service: &str,
    https: &ResolvedHttps,
    exposure: &Exposure,
) -> Option<Ingress> {
    let options = exposure.ingress.as_ref()?;
    let mut annotations = options.annotations.clone();
    if https.enabled {
        annotations
            .entry("nginx.ingress.kubernetes.io/backend-protocol".to_string())
            .or_insert_with(|| "HTTPS".to_string());
    }
    if !annotations.is_empty() {
        meta.annotations = Some(annotations);
    }
    let backend = IngressBackend {
        service: Some(IngressServiceBackend {
            name: service.to_string(),
            port: Some(ServiceBackendPort {
                name: Some(port_name(https).to_string()),
                number: None,
            }),
        }),
        ..IngressBackend::default()
    };
    let rule = IngressRule {
        host: options.host.clone(),
        http: Some(HTTPIngressRuleValue {
            paths: vec![HTTPIngressPath {
                path: Some(options.path.clone().unwrap_or_else(|| "/".to_string())),
                path_type: "Prefix".to_string(),
                backend,
            }],
        }),
    };
    let tls = options.tls_secret_name.as_ref().map(|secret| {
        vec![IngressTLS {
            hosts: options.host.clone().map(|h| vec![h]),
            secret_name: Some(secret.clone()),
        }]
    });
    Some(Ingress {
        metadata: meta,
        spec: Some(IngressSpec {
            ingress_class_name: options.class_name.clone(),
            rules: Some(vec![rule]),
            tls,
            ..IngressSpec::default()
        }),
        ..Ingress::default()
    })
}

/// A random URL-safe token
pub(crate) fn random_token() -> String {
    use base64::Engine as _;
    let bytes: [u8; 32] = rand::random();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_labels_contain_selector() {
        let labels = standard_labels("license-service", "instance", "api");
        for (key, value) in selector_labels("license-service", "instance") {
            assert_eq!(labels.get(&key), Some(&value));
        }
        assert_eq!(
            labels.get("app.kubernetes.io/managed-by").map(String::as_str),
            Some(MANAGED_BY)
        );
    }

    #[test]
    fn test_tokens_are_unique() {
        let a = random_token();
        assert_eq!(a.len(), 43);
        assert_ne!(a, random_token());
    }
}
