//! # LicenseReporter Spec

use crate::crd::{ContainerOptions, HttpsOptions, IngressOptions, RouteOptions};
use serde::{Deserialize, Serialize};

/// LicenseReporter Custom Resource Definition
///
/// Declares the reporting deployment that aggregates usage data: a receiver
/// container and a database container in one pod, with their service,
/// credentials secret, certificate and route or ingress.
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
    kind = "LicenseReporter",
    group = "licensing.octopilot.io",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::InstanceStatus",
    shortname = "lrep",
    printcolumn = r#"{"name":"Ready", "type":"string",
        "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LicenseReporterSpec {
    /// Receiver container settings
    #[serde(default)]
    pub receiver: ContainerOptions,
    /// Database container settings
    #[serde(default)]
    pub database: ContainerOptions,
    #[serde(default)]
    pub image_pull_secrets: Vec<String>,
    #[serde(default)]
    pub https: HttpsOptions,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub route: RouteOptions,
    #[serde(default)]
    pub ingress: IngressOptions,
}
