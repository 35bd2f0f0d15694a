//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use license_service_operator::prelude::*;
//! ```

// CRD types - most commonly used
pub use crate::crd::*;

// Engine - object access and convergence
pub use crate::engine::{
    fetch, list_objects, Converger, KubeStore, ObjectApi, ObjectKey, Outcome, UpdateStrategy,
};
#[cfg(any(test, feature = "testing"))]
pub use crate::engine::MemoryStore;

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::{Reconciler, ReporterStep, ServiceStep, Store};

pub use crate::broadcast::{scope_channel, ScopePublisher, ScopeSubscriber};
pub use crate::capabilities::{Capabilities, CapabilityProbe, StaticCapabilities};
pub use crate::config::ControllerConfig;
pub use crate::election::ElectionState;
pub use crate::error::{Error, Result};
