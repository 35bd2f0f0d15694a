//! # Convergence Engine
//!
//! Generic create / compare / update-or-recreate logic applied to every object
//! the operator owns.
//!
//! - `api`: the `ObjectApi` seam over the Kubernetes API and the live `KubeStore`
//! - `memory`: an in-process API server used by tests (`testing` feature)
//! - `apply`: the existence, update, recreate and removal algorithm (`Converger`)
//! - `converge`: per-kind drift predicates and carry-forward rules
//! - `diff`: order-insensitive comparison helpers
//! - `outcome`: the requeue decision a step hands back to the driver

pub mod api;
pub mod apply;
pub mod converge;
pub mod diff;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod outcome;

pub use api::{fetch, list_objects, KubeStore, ManagedObject, ObjectApi, ObjectKey};
pub use apply::{Converger, Presence, Timing};
pub use converge::{Converge, UpdateStrategy};
#[cfg(any(test, feature = "testing"))]
pub use memory::{MemoryStore, WriteCounts};
pub use outcome::Outcome;
