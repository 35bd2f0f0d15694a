//! # License Service Operator
//!
//! A Kubernetes operator that runs the license service API and the license
//! reporter for `LicenseService` and `LicenseReporter` custom resources.
//!
//! ## Overview
//!
//! 1. **Singleton election** - only the oldest `LicenseService` is served
//! 2. **Child convergence** - deployments, services, secrets, config maps,
//!    routes, ingresses, network policies, service monitors and metering
//!    definitions are created and kept in line with the resource spec
//! 3. **Self-signed certificates** - generated, inspected and rotated 90 days
//!    before they expire
//! 4. **Discovery** - licensed products running in the cluster are counted
//!    unless the active instance restricts the operator to its namespace

use anyhow::Result;
use license_service_operator::runtime::{initialize, run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;
    run_watch_loop(init).await
}
