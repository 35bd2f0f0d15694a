//! # Instance Status
//!
//! Observed state written by the operator. Never read back as input, except
//! for the election state.

use serde::{Deserialize, Serialize};

/// Status of a LicenseService or LicenseReporter
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    /// Election state: ACTIVE or INACTIVE (LicenseService only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Pods of the managed workload
    #[serde(default)]
    pub pods: Vec<PodSummary>,
    /// Features in effect after defaults and platform capabilities were applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureStatus>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// One pod of the managed workload
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodSummary {
    pub name: String,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub restarts: i32,
}

/// Resolved feature set
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeatureStatus {
    pub https_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_source: Option<String>,
    pub route_enabled: bool,
    pub ingress_enabled: bool,
    #[serde(default)]
    pub network_policy_enabled: bool,
    #[serde(default)]
    pub namespace_scope_enabled: bool,
    #[serde(default)]
    pub service_monitor_enabled: bool,
    #[serde(default)]
    pub metering_enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    pub status: String,
    #[serde(default)]
    pub last_transition_time: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
