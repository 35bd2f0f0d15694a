//! # Diff Predicates
//!
//! Comparison helpers that decide whether a found object has drifted from the
//! expected one. Collections whose order carries no meaning (env vars, pull
//! secrets, tolerations, volumes, ports) are compared as multisets, values the
//! API server fills in on its own are normalized before comparing, and
//! resource quantities are compared numerically.

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, Probe, ResourceRequirements, Volume,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// JSON form of `value` with nulls, empty arrays and empty objects removed
pub fn normalized<T: Serialize>(value: &T) -> Value {
    let mut value = serde_json::to_value(value).unwrap_or(Value::Null);
    prune(&mut value);
    value
}

/// Drops empty members in place; returns whether `value` itself ended up empty
fn prune(value: &mut Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => {
            items.iter_mut().for_each(|item| {
                prune(item);
            });
            items.is_empty()
        }
        Value::Object(map) => {
            map.retain(|_, member| !prune(member));
            map.is_empty()
        }
        _ => false,
    }
}

/// Key-sorted rendering, stable regardless of how maps are ordered in memory
fn canonical(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let body: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| format!("{k:?}:{}", canonical(v)))
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical).collect();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}

/// Equal after normalization
pub fn semantically_equal<T: Serialize>(expected: &T, found: &T) -> bool {
    normalized(expected) == normalized(found)
}

/// Equal as multisets of normalized elements
pub fn same_multiset<T: Serialize>(expected: &[T], found: &[T]) -> bool {
    if expected.len() != found.len() {
        return false;
    }
    let render = |items: &[T]| {
        let mut rendered: Vec<String> = items.iter().map(|i| canonical(&normalized(i))).collect();
        rendered.sort();
        rendered
    };
    render(expected) == render(found)
}

fn as_slice<T>(items: Option<&Vec<T>>) -> &[T] {
    items.map_or(&[], Vec::as_slice)
}

/// Numeric value of a Kubernetes quantity such as `500m`, `1.5Gi` or `2e3`
pub fn parse_quantity(quantity: &str) -> Option<f64> {
    let quantity = quantity.trim();
    let split = quantity
        .find(|c: char| c.is_ascii_alphabetic() && c != 'e' && c != 'E')
        .unwrap_or(quantity.len());
    let (number, suffix) = quantity.split_at(split);
    let base: f64 = number.parse().ok()?;
    let multiplier = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024.0_f64.powi(2),
        "Gi" => 1024.0_f64.powi(3),
        "Ti" => 1024.0_f64.powi(4),
        "Pi" => 1024.0_f64.powi(5),
        "Ei" => 1024.0_f64.powi(6),
        _ => return None,
    };
    Some(base * multiplier)
}

/// `500m == 0.5`, `1Gi == 1024Mi`; unparseable quantities compare as text
pub fn quantities_equal(expected: &Quantity, found: &Quantity) -> bool {
    match (parse_quantity(&expected.0), parse_quantity(&found.0)) {
        (Some(a), Some(b)) => (a - b).abs() <= f64::EPSILON * a.abs().max(b.abs()).max(1.0),
        _ => expected.0.trim() == found.0.trim(),
    }
}

fn quantity_maps_equal(
    expected: Option<&BTreeMap<String, Quantity>>,
    found: Option<&BTreeMap<String, Quantity>>,
) -> bool {
    let empty = BTreeMap::new();
    let expected = expected.unwrap_or(&empty);
    let found = found.unwrap_or(&empty);
    expected.len() == found.len()
        && expected
            .iter()
            .all(|(name, q)| found.get(name).is_some_and(|f| quantities_equal(q, f)))
}

pub fn resources_equal(
    expected: Option<&ResourceRequirements>,
    found: Option<&ResourceRequirements>,
) -> bool {
    quantity_maps_equal(
        expected.and_then(|r| r.requests.as_ref()),
        found.and_then(|r| r.requests.as_ref()),
    ) && quantity_maps_equal(
        expected.and_then(|r| r.limits.as_ref()),
        found.and_then(|r| r.limits.as_ref()),
    )
}

fn missing_entry(
    expected: Option<&BTreeMap<String, String>>,
    found: Option<&BTreeMap<String, String>>,
) -> Option<String> {
    expected?.iter().find_map(|(key, value)| {
        (found.and_then(|f| f.get(key)) != Some(value)).then(|| key.clone())
    })
}

/// Expected labels and annotations must be present on the found object;
/// extra entries added by others are fine
pub fn metadata_drift(expected: &ObjectMeta, found: &ObjectMeta) -> Option<String> {
    if let Some(key) = missing_entry(expected.labels.as_ref(), found.labels.as_ref()) {
        return Some(format!("label {key} differs"));
    }
    missing_entry(expected.annotations.as_ref(), found.annotations.as_ref())
        .map(|key| format!("annotation {key} differs"))
}

/// Template labels are a subset check like object labels
pub fn labels_subset(
    expected: Option<&BTreeMap<String, String>>,
    found: Option<&BTreeMap<String, String>>,
) -> bool {
    missing_entry(expected, found).is_none()
}

fn env_fingerprint(env: &EnvVar) -> EnvVar {
    let mut env = env.clone();
    if let Some(field) = env.value_from.as_mut().and_then(|v| v.field_ref.as_mut()) {
        field.api_version.get_or_insert_with(|| "v1".to_string());
    }
    env
}

fn port_fingerprint(port: &ContainerPort) -> ContainerPort {
    let mut port = port.clone();
    port.protocol.get_or_insert_with(|| "TCP".to_string());
    port
}

fn probe_fingerprint(probe: Option<&Probe>) -> Value {
    let Some(probe) = probe else {
        return Value::Null;
    };
    let mut probe = probe.clone();
    probe.timeout_seconds.get_or_insert(1);
    probe.period_seconds.get_or_insert(10);
    probe.success_threshold.get_or_insert(1);
    probe.failure_threshold.get_or_insert(3);
    if let Some(http) = probe.http_get.as_mut() {
        http.scheme.get_or_insert_with(|| "HTTP".to_string());
    }
    normalized(&probe)
}

fn volume_fingerprint(volume: &Volume) -> Volume {
    let mut volume = volume.clone();
    if let Some(secret) = volume.secret.as_mut() {
        secret.default_mode.get_or_insert(0o644);
    }
    if let Some(config_map) = volume.config_map.as_mut() {
        config_map.default_mode.get_or_insert(0o644);
    }
    volume
}

/// First difference between two containers of the same name
pub fn container_drift(expected: &Container, found: &Container) -> Option<String> {
    let name = &expected.name;
    if expected.image != found.image {
        return Some(format!("container {name}: image differs"));
    }
    if expected.image_pull_policy.is_some() && expected.image_pull_policy != found.image_pull_policy
    {
        return Some(format!("container {name}: image pull policy differs"));
    }
    if !semantically_equal(&expected.command, &found.command)
        || !semantically_equal(&expected.args, &found.args)
    {
        return Some(format!("container {name}: command differs"));
    }
    let expected_env: Vec<_> = as_slice(expected.env.as_ref())
        .iter()
        .map(env_fingerprint)
        .collect();
    let found_env: Vec<_> = as_slice(found.env.as_ref())
        .iter()
        .map(env_fingerprint)
        .collect();
    if !same_multiset(&expected_env, &found_env) {
        return Some(format!("container {name}: environment differs"));
    }
    let expected_ports: Vec<_> = as_slice(expected.ports.as_ref())
        .iter()
        .map(port_fingerprint)
        .collect();
    let found_ports: Vec<_> = as_slice(found.ports.as_ref())
        .iter()
        .map(port_fingerprint)
        .collect();
    if !same_multiset(&expected_ports, &found_ports) {
        return Some(format!("container {name}: ports differ"));
    }
    if !resources_equal(expected.resources.as_ref(), found.resources.as_ref()) {
        return Some(format!("container {name}: resources differ"));
    }
    if probe_fingerprint(expected.readiness_probe.as_ref())
        != probe_fingerprint(found.readiness_probe.as_ref())
        || probe_fingerprint(expected.liveness_probe.as_ref())
            != probe_fingerprint(found.liveness_probe.as_ref())
    {
        return Some(format!("container {name}: probes differ"));
    }
    if !same_multiset(
        as_slice(expected.volume_mounts.as_ref()),
        as_slice(found.volume_mounts.as_ref()),
    ) {
        return Some(format!("container {name}: volume mounts differ"));
    }
    if expected.security_context.is_some()
        && !semantically_equal(&expected.security_context, &found.security_context)
    {
        return Some(format!("container {name}: security context differs"));
    }
    None
}

/// First difference between two pod specs
pub fn pod_spec_drift(expected: &PodSpec, found: &PodSpec) -> Option<String> {
    if expected.containers.len() != found.containers.len() {
        return Some("container count differs".to_string());
    }
    for container in &expected.containers {
        let Some(current) = found.containers.iter().find(|c| c.name == container.name) else {
            return Some(format!("container {} missing", container.name));
        };
        if let Some(reason) = container_drift(container, current) {
            return Some(reason);
        }
    }
    if expected.service_account_name.is_some()
        && expected.service_account_name != found.service_account_name
    {
        return Some("service account differs".to_string());
    }
    if !same_multiset(
        as_slice(expected.image_pull_secrets.as_ref()),
        as_slice(found.image_pull_secrets.as_ref()),
    ) {
        return Some("image pull secrets differ".to_string());
    }
    let expected_volumes: Vec<_> = as_slice(expected.volumes.as_ref())
        .iter()
        .map(volume_fingerprint)
        .collect();
    let found_volumes: Vec<_> = as_slice(found.volumes.as_ref())
        .iter()
        .map(volume_fingerprint)
        .collect();
    if !same_multiset(&expected_volumes, &found_volumes) {
        return Some("volumes differ".to_string());
    }
    if !same_multiset(
        as_slice(expected.tolerations.as_ref()),
        as_slice(found.tolerations.as_ref()),
    ) {
        return Some("tolerations differ".to_string());
    }
    if !semantically_equal(&expected.affinity, &found.affinity) {
        return Some("affinity differs".to_string());
    }
    if !semantically_equal(&expected.node_selector, &found.node_selector) {
        return Some("node selector differs".to_string());
    }
    if expected.security_context.is_some()
        && !semantically_equal(&expected.security_context, &found.security_context)
    {
        return Some("pod security context differs".to_string());
    }
    None
}
