//! # Watch Loop
//!
//! Runs one controller per custom resource kind, the deletion watch that
//! triggers re-election and the background discovery task, until a shutdown
//! signal arrives.

use crate::crd::{LicenseReporter, LicenseService, Route};
use crate::discovery::{DiscoveryTask, PodScanner};
use crate::engine::{KubeStore, ObjectKey, Outcome};
use crate::error::{Error, Result};
use crate::observability::metrics;
use crate::runtime::error_policy::{
    backoff_key, handle_controller_error, handle_reconciliation_error,
};
use crate::runtime::initialization::{InitializationResult, OperatorReconciler};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::NamespaceResourceScope;
use kube::api::Api;
use kube::{Client, Resource};
use kube_runtime::controller::{self, Action};
use kube_runtime::{watcher, Controller, WatchStreamExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Api scoped to the watched namespace, or cluster-wide
fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    match namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

/// Add watches on every child kind the drivers create
fn owning_children<K>(
    controller: Controller<K>,
    client: &Client,
    namespace: Option<&str>,
    routes: bool,
) -> Controller<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let children = watcher::Config::default();
    let controller = controller
        .owns(scoped_api::<Deployment>(client, namespace), children.clone())
        .owns(scoped_api::<Service>(client, namespace), children.clone())
        .owns(scoped_api::<Secret>(client, namespace), children.clone())
        .owns(scoped_api::<ConfigMap>(client, namespace), children.clone())
        .owns(scoped_api::<Ingress>(client, namespace), children.clone())
        .owns(scoped_api::<NetworkPolicy>(client, namespace), children.clone());
    if routes {
        controller.owns(scoped_api::<Route>(client, namespace), children)
    } else {
        controller
    }
}

fn object_key<K: Resource<DynamicType = ()>>(obj: &K) -> Result<ObjectKey> {
    ObjectKey::of(obj).ok_or_else(|| Error::missing(K::kind(&()).to_string(), "name or namespace"))
}

fn reconcile_span(kind: &str, key: &ObjectKey, obj: &impl Resource) -> tracing::Span {
    tracing::span!(
        tracing::Level::INFO,
        "controller.watch.reconcile",
        resource.kind = kind,
        resource.name = key.name.as_str(),
        resource.namespace = key.namespace.as_str(),
        resource.generation = obj.meta().generation.unwrap_or(0),
    )
}

/// Record the pass and turn its outcome into a controller action
fn finish(
    ctx: &OperatorReconciler,
    kind: &str,
    key: &ObjectKey,
    started: Instant,
    result: Result<Outcome>,
) -> Result<Action> {
    metrics::observe_reconciliation_duration(kind, started.elapsed().as_secs_f64());
    let outcome = result?;
    ctx.reset_backoff(&backoff_key(kind, &key.namespace, &key.name));
    debug!(outcome = ?outcome, "reconciliation.success");
    Ok(outcome.into_action(ctx.config.resync_interval()))
}

async fn reconcile_service(
    obj: Arc<LicenseService>,
    ctx: Arc<OperatorReconciler>,
) -> Result<Action> {
    let kind = "LicenseService";
    let key = object_key(obj.as_ref())?;
    let span = reconcile_span(kind, &key, obj.as_ref());
    metrics::increment_reconciliations(kind);
    let started = Instant::now();
    let result = ctx.reconcile_license_service(&key).instrument(span).await;
    finish(&ctx, kind, &key, started, result)
}

async fn reconcile_reporter(
    obj: Arc<LicenseReporter>,
    ctx: Arc<OperatorReconciler>,
) -> Result<Action> {
    let kind = "LicenseReporter";
    let key = object_key(obj.as_ref())?;
    let span = reconcile_span(kind, &key, obj.as_ref());
    metrics::increment_reconciliations(kind);
    let started = Instant::now();
    let result = ctx.reconcile_license_reporter(&key).instrument(span).await;
    finish(&ctx, kind, &key, started, result)
}

/// Re-run the election whenever a `LicenseService` is deleted
///
/// The controller never sees deleted objects, so the driver's deletion path
/// is fed from a separate watch.
async fn watch_service_deletions(
    api: Api<LicenseService>,
    reconciler: Arc<OperatorReconciler>,
    cancel: CancellationToken,
) {
    let mut events = std::pin::pin!(watcher(api, watcher::Config::default()).default_backoff());
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = events.next() => event,
        };
        match event {
            Some(Ok(watcher::Event::Delete(obj))) => {
                let Some(key) = ObjectKey::of(&obj) else {
                    continue;
                };
                info!("LicenseService {} deleted", key);
                if let Err(e) = reconciler.reelect_after_deletion(&key, &cancel).await {
                    warn!("Re-election after deleting {} failed: {}", key, e);
                }
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => warn!("LicenseService deletion watch failed, retrying: {}", e),
            None => break,
        }
    }
    debug!("Deletion watch stopped");
}

/// Run the controllers until a shutdown signal arrives
pub async fn run_watch_loop(init: InitializationResult) -> anyhow::Result<()> {
    let InitializationResult {
        client,
        config,
        reconciler,
        server_state,
        capabilities,
        scope,
    } = init;
    let namespace = config.watch_namespace.as_deref();
    let cancel = CancellationToken::new();

    // mark not ready on SIGTERM/SIGINT so no new traffic arrives while draining
    let shutdown_state = server_state.clone();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        shutdown_state.set_ready(false);
        shutdown_cancel.cancel();
    });

    if config.discovery_enabled {
        let task = DiscoveryTask::new(
            PodScanner::new(KubeStore::new(client.clone())),
            scope,
            config.discovery_interval(),
            cancel.clone(),
        );
        tokio::spawn(task.run());
    } else {
        info!("Discovery disabled");
    }

    tokio::spawn(watch_service_deletions(
        scoped_api::<LicenseService>(&client, namespace),
        reconciler.clone(),
        cancel.clone(),
    ));

    let controller_config =
        controller::Config::default().concurrency(config.max_concurrent_reconciliations);

    let services = owning_children(
        Controller::new(
            scoped_api::<LicenseService>(&client, namespace),
            watcher::Config::default().any_semantic(),
        ),
        &client,
        namespace,
        capabilities.routes,
    )
    .with_config(controller_config.clone())
    .shutdown_on_signal()
    .run(
        reconcile_service,
        |obj, error, ctx| handle_reconciliation_error(obj, error, ctx),
        reconciler.clone(),
    )
    .for_each(|result| async move {
        if let Err(e) = result {
            handle_controller_error("LicenseService", &e);
        }
    });

    let reporters = owning_children(
        Controller::new(
            scoped_api::<LicenseReporter>(&client, namespace),
            watcher::Config::default().any_semantic(),
        ),
        &client,
        namespace,
        capabilities.routes,
    )
    .with_config(controller_config)
    .shutdown_on_signal()
    .run(
        reconcile_reporter,
        |obj, error, ctx| handle_reconciliation_error(obj, error, ctx),
        reconciler,
    )
    .for_each(|result| async move {
        if let Err(e) = result {
            handle_controller_error("LicenseReporter", &e);
        }
    });

    info!("Starting controller watch loop...");
    tokio::join!(services, reporters);

    cancel.cancel();
    server_state.set_ready(false);
    info!("Controller stopped gracefully");
    Ok(())
}
