//! License Service Operator Library
//!
//! Converges `LicenseService` and `LicenseReporter` custom resources into the
//! workloads, services, certificates and exposure objects that serve them.
//!
//! ## Quick Start
//!
//! ```rust
//! use license_service_operator::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific
//! imports, use the individual modules.

pub mod broadcast;
pub mod builders;
pub mod capabilities;
pub mod certificates;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod discovery;
pub mod election;
pub mod engine;
pub mod error;
pub mod observability;
pub mod prelude;
pub mod runtime;
