//! # Runtime
//!
//! Process-level wiring of the operator.
//!
//! - `initialization`: crypto provider, tracing, metrics, HTTP server, client
//!   and reconciler setup
//! - `watch_loop`: the two controllers and the background discovery task
//! - `error_policy`: per-resource Fibonacci backoff after failed passes

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

pub use initialization::{initialize, InitializationResult, OperatorReconciler};
pub use watch_loop::run_watch_loop;
