//! # Platform Kinds
//!
//! Typed views of the third-party resources the operator manages. Only the
//! fields the operator writes are modelled; these CRDs are installed by the
//! platform, never by this operator, so they are excluded from `crdgen`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// OpenShift Route (`route.openshift.io/v1`)
#[derive(
    kube::CustomResource,
    Debug,
    Clone,
    Default,
    PartialEq,
    Deserialize,
    Serialize,
    schemars::JsonSchema,
)]
#[kube(kind = "Route", group = "route.openshift.io", version = "v1", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub to: RouteTargetReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<RoutePort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<RouteTls>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteTargetReference {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoutePort {
    /// Service port name or number
    pub target_port: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteTls {
    /// edge, passthrough or reencrypt
    pub termination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_edge_termination_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_certificate: Option<String>,
    /// CA the router trusts when re-encrypting towards the pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_ca_certificate: Option<String>,
}

/// Prometheus Operator ServiceMonitor (`monitoring.coreos.com/v1`)
#[derive(
    kube::CustomResource,
    Debug,
    Clone,
    Default,
    PartialEq,
    Deserialize,
    Serialize,
    schemars::JsonSchema,
)]
#[kube(
    kind = "ServiceMonitor",
    group = "monitoring.coreos.com",
    version = "v1",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMonitorSpec {
    pub selector: MonitorSelector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<MonitorNamespaceSelector>,
    #[serde(default)]
    pub endpoints: Vec<MonitorEndpoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonitorNamespaceSelector {
    #[serde(default)]
    pub match_names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonitorEndpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<MonitorTlsConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonitorTlsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_skip_verify: Option<bool>,
}

/// Marketplace MeterDefinition (`marketplace.redhat.com/v1beta1`)
///
/// Tells the metering stack which workloads to count and how.
#[derive(
    kube::CustomResource,
    Debug,
    Clone,
    Default,
    PartialEq,
    Deserialize,
    Serialize,
    schemars::JsonSchema,
)]
#[kube(
    kind = "MeteringDefinition",
    group = "marketplace.redhat.com",
    version = "v1beta1",
    plural = "meterdefinitions",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MeteringDefinitionSpec {
    /// API group of the metered resource
    pub group: String,
    /// Kind of the metered resource
    pub kind: String,
    #[serde(default)]
    pub resource_filters: Vec<ResourceFilter>,
    #[serde(default)]
    pub meters: Vec<MeterDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFilter {
    /// Pod, Service or PersistentVolumeClaim
    pub workload_type: String,
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MeterDefinition {
    pub metric_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// sum, min, max or avg
    pub aggregation: String,
    /// Reporting period, e.g. `1h`
    pub period: String,
    /// PromQL query producing the meter value
    pub query: String,
    pub workload_type: String,
}
