//! # Per-Kind Convergence Rules
//!
//! Each managed kind says what "drifted" means for it and which server-owned
//! state must survive a full replace.

use super::api::ManagedObject;
use super::diff::{labels_subset, normalized, pod_spec_drift, same_multiset, semantically_equal};
use crate::crd::{MeteringDefinition, Route, ServiceMonitor};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServicePort};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

/// How drift on a found object is corrected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// Replace in place; fall back to delete and recreate when the API server
    /// rejects the update as incompatible
    InPlace,
    /// The kind's spec is immutable: delete, wait, create
    Recreate,
    /// Create when missing, never touch afterwards (generated secrets)
    CreateOnly,
}

/// Drift detection for one kind
///
/// Label and annotation subsets are checked by the engine for every kind;
/// implementations only compare what is specific to the kind.
pub trait Converge: ManagedObject {
    /// Why `found` no longer matches `self`, `None` when it still does
    fn drift(&self, found: &Self) -> Option<String>;

    /// Copy state owned by the server or by other writers from `found` into
    /// `self` before `self` replaces it
    fn carry_forward(&mut self, _found: &Self) {}
}

impl Converge for Deployment {
    fn drift(&self, found: &Self) -> Option<String> {
        let expected = self.spec.as_ref()?;
        let Some(current) = found.spec.as_ref() else {
            return Some("spec missing".to_string());
        };
        if expected.replicas.is_some() && expected.replicas != current.replicas {
            return Some("replica count differs".to_string());
        }
        if !semantically_equal(&expected.selector, &current.selector) {
            return Some("selector differs".to_string());
        }
        let labels = |d: &k8s_openapi::api::apps::v1::DeploymentSpec| {
            d.template.metadata.as_ref().and_then(|m| m.labels.clone())
        };
        if !labels_subset(labels(expected).as_ref(), labels(current).as_ref()) {
            return Some("pod template labels differ".to_string());
        }
        match (&expected.template.spec, &current.template.spec) {
            (Some(e), Some(c)) => pod_spec_drift(e, c),
            (Some(_), None) => Some("pod spec missing".to_string()),
            _ => None,
        }
    }

    fn carry_forward(&mut self, found: &Self) {
        let Some(found_annotations) = found
            .spec
            .as_ref()
            .and_then(|s| s.template.metadata.as_ref())
            .and_then(|m| m.annotations.as_ref())
        else {
            return;
        };
        let Some(spec) = self.spec.as_mut() else {
            return;
        };
        // restart stamps live here; dropping them would roll the pods again
        let annotations = spec
            .template
            .metadata
            .get_or_insert_with(Default::default)
            .annotations
            .get_or_insert_with(Default::default);
        for (key, value) in found_annotations {
            annotations
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

fn service_port_fingerprint(port: &ServicePort) -> ServicePort {
    let mut port = port.clone();
    port.protocol.get_or_insert_with(|| "TCP".to_string());
    let number = port.port;
    port.target_port.get_or_insert(IntOrString::Int(number));
    port.node_port = None;
    port
}

impl Converge for Service {
    fn drift(&self, found: &Self) -> Option<String> {
        let expected = self.spec.as_ref()?;
        let Some(current) = found.spec.as_ref() else {
            return Some("spec missing".to_string());
        };
        if expected.type_.is_some() && expected.type_ != current.type_ {
            return Some("service type differs".to_string());
        }
        let ports = |s: &k8s_openapi::api::core::v1::ServiceSpec| -> Vec<ServicePort> {
            s.ports
                .iter()
                .flatten()
                .map(service_port_fingerprint)
                .collect()
        };
        if !same_multiset(&ports(expected), &ports(current)) {
            return Some("ports differ".to_string());
        }
        if !semantically_equal(&expected.selector, &current.selector) {
            return Some("selector differs".to_string());
        }
        None
    }

    fn carry_forward(&mut self, found: &Self) {
        let (Some(spec), Some(current)) = (self.spec.as_mut(), found.spec.as_ref()) else {
            return;
        };
        // allocated by the API server and immutable afterwards
        if spec.cluster_ip.is_none() {
            spec.cluster_ip.clone_from(&current.cluster_ip);
        }
        if spec.cluster_ips.is_none() {
            spec.cluster_ips.clone_from(&current.cluster_ips);
        }
        if spec.ip_families.is_none() {
            spec.ip_families.clone_from(&current.ip_families);
        }
        if spec.ip_family_policy.is_none() {
            spec.ip_family_policy.clone_from(&current.ip_family_policy);
        }
    }
}

impl Converge for ConfigMap {
    fn drift(&self, found: &Self) -> Option<String> {
        (!semantically_equal(&self.data, &found.data)
            || !semantically_equal(&self.binary_data, &found.binary_data))
        .then(|| "data differs".to_string())
    }
}

impl Converge for Secret {
    fn drift(&self, found: &Self) -> Option<String> {
        if self.type_.is_some() && self.type_ != found.type_ {
            return Some("secret type differs".to_string());
        }
        (normalized(&self.data) != normalized(&found.data)).then(|| "data differs".to_string())
    }
}

impl Converge for Ingress {
    fn drift(&self, found: &Self) -> Option<String> {
        (!semantically_equal(&self.spec, &found.spec)).then(|| "ingress spec differs".to_string())
    }
}

impl Converge for NetworkPolicy {
    fn drift(&self, found: &Self) -> Option<String> {
        (!semantically_equal(&self.spec, &found.spec)).then(|| "policy differs".to_string())
    }
}

impl Converge for Route {
    fn drift(&self, found: &Self) -> Option<String> {
        let (expected, current) = (&self.spec, &found.spec);
        // the router assigns a host when none is requested
        if expected.host.is_some() && expected.host != current.host {
            return Some("host differs".to_string());
        }
        if expected.path != current.path {
            return Some("path differs".to_string());
        }
        if expected.to.kind != current.to.kind || expected.to.name != current.to.name {
            return Some("target differs".to_string());
        }
        if expected.port != current.port {
            return Some("port differs".to_string());
        }
        (!semantically_equal(&expected.tls, &current.tls)).then(|| "tls differs".to_string())
    }
}

impl Converge for ServiceMonitor {
    fn drift(&self, found: &Self) -> Option<String> {
        (!semantically_equal(&self.spec, &found.spec)).then(|| "endpoints differ".to_string())
    }
}

impl Converge for MeteringDefinition {
    fn drift(&self, found: &Self) -> Option<String> {
        (!semantically_equal(&self.spec, &found.spec)).then(|| "meters differ".to_string())
    }
}
