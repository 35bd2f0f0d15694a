//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loop.
//! Failed passes are retried with a per-resource Fibonacci backoff; errors
//! surfaced by the controller stream itself are only classified and logged.

use crate::capabilities::CapabilityProbe;
use crate::controller::reconciler::{Reconciler, Store};
use crate::error::Error;
use crate::observability::metrics;
use kube::Resource;
use kube_runtime::controller::{self, Action};
use kube_runtime::watcher;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Key of a resource in the backoff map
pub fn backoff_key(kind: &str, namespace: &str, name: &str) -> String {
    format!("{kind}/{namespace}/{name}")
}

/// Handle reconciliation errors with Fibonacci backoff
///
/// Backoff state is tracked per resource so one failing resource does not
/// slow down the others.
pub fn handle_reconciliation_error<K, S, P>(
    obj: Arc<K>,
    error: &Error,
    ctx: Arc<Reconciler<S, P>>,
) -> Action
where
    K: Resource<DynamicType = ()>,
    S: Store,
    P: CapabilityProbe,
{
    let kind = K::kind(&());
    let name = obj.meta().name.as_deref().unwrap_or("unknown");
    let namespace = obj.meta().namespace.as_deref().unwrap_or("default");

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.kind = kind.as_ref(),
        resource.name = name,
        resource.namespace = namespace,
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {} {}/{}: {}", kind, namespace, name, error);
    metrics::increment_reconciliation_errors(&kind);

    let (delay, error_count) = ctx.next_backoff(&backoff_key(&kind, namespace, name));
    info!(
        "🔄 Retrying with Fibonacci backoff: {}s (error count: {})",
        delay.as_secs(),
        error_count
    );
    Action::requeue(delay)
}

/// Log an error surfaced by a controller stream
///
/// Reconciler failures were already handled by [`handle_reconciliation_error`];
/// watch failures are retried by the watcher's own backoff.
pub fn handle_controller_error(kind: &str, error: &controller::Error<Error, watcher::Error>) {
    match error {
        controller::Error::ReconcilerFailed(e, obj) => {
            debug!("{} {} failed and was requeued: {}", kind, obj, e);
        }
        controller::Error::ObjectNotFound(obj) => {
            debug!("{} {} disappeared before it was reconciled", kind, obj);
        }
        controller::Error::QueueError(e) => {
            warn!(error_type = "watch", "{} watch failed, retrying: {}", kind, e);
        }
        controller::Error::RunnerError(e) => {
            error!("{} controller runner failed: {}", kind, e);
        }
    }
}
