//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing, metrics,
//! server startup, capability detection and Kubernetes client setup.

use crate::broadcast::{scope_channel, ScopeSubscriber};
use crate::capabilities::{Capabilities, CapabilityProbe, KubeCapabilityProbe};
use crate::config::ControllerConfig;
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::engine::KubeStore;
use crate::observability;
use anyhow::{anyhow, Context, Result};
use kube::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Reconciler wired to the live cluster
pub type OperatorReconciler = Reconciler<KubeStore, KubeCapabilityProbe>;

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    pub client: Client,
    pub config: ControllerConfig,
    pub reconciler: Arc<OperatorReconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    /// Capabilities seen at startup; decide which child kinds are watched
    pub capabilities: Capabilities,
    /// Receiving end of the namespace-scope broadcast, for discovery
    pub scope: ScopeSubscriber,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.ready())
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation and capability detection
/// - Reconciler setup
pub async fn initialize() -> Result<InitializationResult> {
    // must run before any client is built
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let config = ControllerConfig::from_env();
    observability::logging::init_tracing(config.log_format)?;

    info!("Starting License Service Operator");
    info!(
        "Build info: datetime={}, git_hash={}",
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let server_port = config.metrics_port;
    let server_state_clone = server_state.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle, &config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let probe = KubeCapabilityProbe::new(client.clone());
    let capabilities = match probe.detect().await {
        Ok(caps) => caps,
        Err(e) => {
            warn!(
                "Capability detection failed at startup, watching core kinds only: {}",
                e
            );
            Capabilities::default()
        }
    };
    info!("Platform capabilities: {}", capabilities);
    match config.watch_namespace.as_deref() {
        Some(namespace) => info!("Watching namespace {}", namespace),
        None => info!("Watching all namespaces"),
    }

    let (publisher, subscriber) = scope_channel();
    let reconciler = Arc::new(Reconciler::new(
        KubeStore::new(client.clone()),
        probe,
        config.clone(),
        publisher,
    ));

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        config,
        reconciler,
        server_state,
        capabilities,
        scope: subscriber,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    config: &ControllerConfig,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(config.server_startup_timeout_secs);
    let poll_interval = Duration::from_millis(config.server_poll_interval_ms);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow!("HTTP server failed to start"));
        }
        if server_state.ready() {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > startup_timeout {
            return Err(anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}
