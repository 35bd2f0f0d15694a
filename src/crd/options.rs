//! # Spec Options
//!
//! Building blocks shared by the LicenseService and LicenseReporter specs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Container image and resource settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerOptions {
    /// Full image reference; the operator default is used when unset
    #[serde(default)]
    pub image: Option<String>,
    /// Always, IfNotPresent or Never
    #[serde(default)]
    pub image_pull_policy: Option<String>,
    #[serde(default)]
    pub resources: Option<ResourceOptions>,
}

/// Compute resource requests and limits, as Kubernetes quantities
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceOptions {
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
}

/// Where the serving certificate comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum CertSource {
    /// Generated and rotated by the operator
    SelfSigned,
    /// Issued by the OpenShift service CA
    Ocp,
    /// Provided by the user in `customSecretName`
    Custom,
}

impl CertSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SelfSigned => "self-signed",
            Self::Ocp => "ocp",
            Self::Custom => "custom",
        }
    }
}

/// HTTPS serving options
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpsOptions {
    /// Serve over HTTPS (default: true)
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Certificate source; defaults to `ocp` when the service CA is available,
    /// `self-signed` otherwise
    #[serde(default)]
    pub certs_source: Option<CertSource>,
    /// TLS secret to mount when `certsSource` is `custom`
    #[serde(default)]
    pub custom_secret_name: Option<String>,
}

/// Route exposure options
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteOptions {
    /// Expose through a route when the platform supports routes (default: true)
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Requested host; the router assigns one when unset
    #[serde(default)]
    pub host: Option<String>,
}

/// Ingress exposure options
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressOptions {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub host: Option<String>,
    /// Path prefix (default: `/`)
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub class_name: Option<String>,
    /// Extra annotations for the ingress controller
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// TLS secret for the ingress host
    #[serde(default)]
    pub tls_secret_name: Option<String>,
}

/// Feature toggles
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Features {
    /// Only look at namespaces explicitly in scope instead of the whole cluster
    #[serde(default)]
    pub namespace_scope_enabled: bool,
    /// Create a ServiceMonitor when the monitoring stack is installed (default: true)
    #[serde(default)]
    pub monitoring_enabled: Option<bool>,
    /// Create a MeteringDefinition when the marketplace metering stack is installed (default: true)
    #[serde(default)]
    pub metering_enabled: Option<bool>,
}
