//! # Custom Resource Definitions
//!
//! CRD types for the License Service Operator.
//!
//! ## Module Structure
//!
//! - `license_service.rs` - the `LicenseService` resource (API-serving workload)
//! - `reporter.rs` - the `LicenseReporter` resource (reporting workload)
//! - `options.rs` - spec building blocks shared by both resources
//! - `status.rs` - observed status shared by both resources
//! - `platform.rs` - third-party kinds the operator writes (routes, monitors, meters)

mod license_service;
mod options;
mod platform;
mod reporter;
mod status;

pub use license_service::{LicenseService, LicenseServiceSpec};
pub use options::{
    CertSource, ContainerOptions, Features, HttpsOptions, IngressOptions, ResourceOptions,
    RouteOptions,
};
pub use platform::{
    MeterDefinition, MeteringDefinition, MeteringDefinitionSpec, MonitorEndpoint,
    MonitorNamespaceSelector, MonitorSelector, MonitorTlsConfig, ResourceFilter, Route,
    RoutePort, RouteSpec, RouteTargetReference, RouteTls, ServiceMonitor, ServiceMonitorSpec,
};
pub use reporter::{LicenseReporter, LicenseReporterSpec};
pub use status::{Condition, FeatureStatus, InstanceStatus, PodSummary};
