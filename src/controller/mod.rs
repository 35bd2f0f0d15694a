//! # Controller
//!
//! Core controller modules for the License Service Operator.
//!
//! - `backoff`: Fibonacci backoff for retries after failed passes
//! - `reconciler`: the `LicenseService` and `LicenseReporter` drivers
//! - `server`: HTTP server for metrics and health checks

pub mod backoff;
pub mod reconciler;
pub mod server;
