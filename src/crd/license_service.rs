//! # LicenseService Spec

use crate::crd::{ContainerOptions, Features, HttpsOptions, IngressOptions, RouteOptions};
use serde::{Deserialize, Serialize};

/// LicenseService Custom Resource Definition
///
/// Declares the license service API deployment and everything it needs to be
/// reachable: service, API token, TLS certificate, route or ingress, network
/// policy and monitoring objects. Only one LicenseService is served at a time;
/// when several exist the oldest one is elected `ACTIVE` and the rest stay
/// `INACTIVE`.
///
/// # Example
///
/// ```yaml
/// apiVersion: licensing.octopilot.io/v1alpha1
/// kind: LicenseService
/// metadata:
///   name: instance
///   namespace: licensing
/// spec:
///   imagePullSecrets: ["registry-credentials"]
///   https:
///     enabled: true
///     certsSource: self-signed
///   route:
///     enabled: true
///   features:
///     namespaceScopeEnabled: true
/// ```
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
    kind = "LicenseService",
    group = "licensing.octopilot.io",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::InstanceStatus",
    shortname = "lsvc",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string",
        "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LicenseServiceSpec {
    /// Image, pull policy and resources of the API container
    #[serde(default)]
    pub container: ContainerOptions,
    /// Names of image pull secrets attached to the pods
    #[serde(default)]
    pub image_pull_secrets: Vec<String>,
    /// Serving over HTTPS and where the certificate comes from
    #[serde(default)]
    pub https: HttpsOptions,
    /// Externally visible hostname; first entry of the certificate's SANs
    #[serde(default)]
    pub hostname: Option<String>,
    /// OpenShift route exposure
    #[serde(default)]
    pub route: RouteOptions,
    /// Ingress exposure, used where routes are unavailable or disabled
    #[serde(default)]
    pub ingress: IngressOptions,
    /// Restrict ingress traffic to the API port with a network policy
    #[serde(default)]
    pub network_policy_enabled: bool,
    /// Feature toggles
    #[serde(default)]
    pub features: Features,
}
