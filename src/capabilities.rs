//! # Platform Capabilities
//!
//! Which optional APIs the cluster serves. Detected once per reconciliation
//! pass and handed explicitly to the driver and the builders.

use async_trait::async_trait;
use kube::Client;
use std::fmt;
use tracing::debug;

/// API group of OpenShift routes
pub const ROUTE_API_GROUP: &str = "route.openshift.io";
/// API group of the OpenShift operators, including the service CA operator
pub const SERVICE_CA_API_GROUP: &str = "operator.openshift.io";
/// API group of the Prometheus Operator
pub const MONITORING_API_GROUP: &str = "monitoring.coreos.com";
/// API group of the marketplace metering stack
pub const METERING_API_GROUP: &str = "marketplace.redhat.com";

/// Optional platform features available in this cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// OpenShift routes can be created
    pub routes: bool,
    /// The service CA issues serving certificates from a service annotation
    pub service_ca: bool,
    /// ServiceMonitors are understood by a Prometheus Operator
    pub service_monitors: bool,
    /// MeterDefinitions are understood by the metering stack
    pub metering: bool,
}

impl Capabilities {
    /// Derive capabilities from the API group names the cluster serves
    pub fn from_api_groups<'a>(groups: impl IntoIterator<Item = &'a str>) -> Self {
        groups
            .into_iter()
            .fold(Self::default(), |mut caps, group| {
                match group {
                    ROUTE_API_GROUP => caps.routes = true,
                    SERVICE_CA_API_GROUP => caps.service_ca = true,
                    MONITORING_API_GROUP => caps.service_monitors = true,
                    METERING_API_GROUP => caps.metering = true,
                    _ => {}
                }
                caps
            })
    }

    /// Everything an OpenShift cluster with monitoring and metering offers
    pub fn openshift() -> Self {
        Self {
            routes: true,
            service_ca: true,
            service_monitors: true,
            metering: true,
        }
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "routes={} service_ca={} service_monitors={} metering={}",
            self.routes, self.service_ca, self.service_monitors, self.metering
        )
    }
}

/// Source of [`Capabilities`]
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    async fn detect(&self) -> Result<Capabilities, kube::Error>;
}

/// Detects capabilities through API group discovery
#[derive(Clone)]
pub struct KubeCapabilityProbe {
    client: Client,
}

impl fmt::Debug for KubeCapabilityProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeCapabilityProbe").finish_non_exhaustive()
    }
}

impl KubeCapabilityProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CapabilityProbe for KubeCapabilityProbe {
    async fn detect(&self) -> Result<Capabilities, kube::Error> {
        let groups = self.client.list_api_groups().await?;
        let caps = Capabilities::from_api_groups(groups.groups.iter().map(|g| g.name.as_str()));
        debug!("Detected platform capabilities: {}", caps);
        Ok(caps)
    }
}

/// Fixed capabilities, for tests and for clusters where discovery is not wanted
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticCapabilities(pub Capabilities);

#[async_trait]
impl CapabilityProbe for StaticCapabilities {
    async fn detect(&self) -> Result<Capabilities, kube::Error> {
        Ok(self.0)
    }
}
