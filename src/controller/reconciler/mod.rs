//! # Reconciler
//!
//! Drivers for `LicenseService` and `LicenseReporter` resources.
//!
//! Each pass fetches the resource by key, resolves its defaults against the
//! detected platform capabilities and runs an ordered list of steps, each
//! converging one child object through the engine. Status is written last.
//!
//! - `types`: the shared `Reconciler` context and the `Store` bound
//! - `service`: the `LicenseService` driver, including the election
//! - `reporter`: the `LicenseReporter` driver
//! - `status`: pod summaries, the `Ready` condition and change-only writes
//! - `utils`: step helpers shared by both drivers

pub mod reporter;
pub mod service;
pub mod status;
pub mod types;
mod utils;

pub use reporter::ReporterStep;
pub use service::ServiceStep;
pub use types::{BackoffState, Reconciler, Store};
