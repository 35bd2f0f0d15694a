//! # Desired State
//!
//! Pure functions from a resolved custom resource to the objects it should
//! own. The convergence engine treats their output as opaque desired state.
//!
//! - `resolve`: defaults, operator configuration and platform capabilities
//!   folded into one value per resource (`ResolvedService`, `ResolvedReporter`)
//! - `common`: labels, metadata and the exposure objects both workloads share
//! - `service`: objects owned by a `LicenseService`
//! - `reporter`: objects owned by a `LicenseReporter`

mod common;
mod reporter;
mod resolve;
mod service;

pub use common::{
    selector_labels, standard_labels, MANAGED_BY, SERVICE_CA_SECRET_ANNOTATION,
};
pub use reporter::ReporterBuilder;
pub use resolve::{
    Exposure, ReporterNames, ResolvedHttps, ResolvedReporter, ResolvedService, ServiceNames,
};
pub use service::ServiceBuilder;
