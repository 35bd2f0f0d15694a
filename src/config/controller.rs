//! # Controller Configuration
//!
//! Operator-level settings loaded from environment variables.

use crate::engine::Timing;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("text") {
            Self::Text
        } else {
            Self::Json
        }
    }
}

/// Images and pull policy applied when a resource leaves them unset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadDefaults {
    pub license_service_image: String,
    pub reporter_receiver_image: String,
    pub reporter_database_image: String,
    pub image_pull_policy: String,
}

impl Default for WorkloadDefaults {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            license_service_image: DEFAULT_LICENSE_SERVICE_IMAGE.to_string(),
            reporter_receiver_image: DEFAULT_REPORTER_RECEIVER_IMAGE.to_string(),
            reporter_database_image: DEFAULT_REPORTER_DATABASE_IMAGE.to_string(),
            image_pull_policy: DEFAULT_IMAGE_PULL_POLICY.to_string(),
        }
    }
}

/// Operator configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace the operator itself runs in
    pub operator_namespace: String,
    /// Restrict watches to one namespace; `None` watches the whole cluster
    pub watch_namespace: Option<String>,
    /// Port of the metrics and probe server
    pub metrics_port: u16,
    /// Log format (json, text)
    pub log_format: LogFormat,
    /// Requeue delay after an object was created (milliseconds)
    pub create_requeue_ms: u64,
    /// Settle delay between delete and recreate of immutable objects (seconds)
    pub immutable_settle_secs: u64,
    /// Periodic resync of converged resources (seconds)
    pub resync_interval_secs: u64,
    /// Requeue interval of instances that lost the election (seconds)
    pub inactive_requeue_secs: u64,
    /// Minimum time between two elections (seconds)
    pub election_cooldown_secs: u64,
    /// Run the background discovery task
    pub discovery_enabled: bool,
    /// Poll interval of the discovery task (seconds)
    pub discovery_interval_secs: u64,
    /// Backoff floor for failed passes (seconds)
    pub backoff_min_secs: u64,
    /// Backoff ceiling for failed passes (seconds)
    pub backoff_max_secs: u64,
    /// Maximum concurrent reconciliations per resource kind
    pub max_concurrent_reconciliations: u16,
    /// HTTP server startup timeout (seconds)
    pub server_startup_timeout_secs: u64,
    /// HTTP server readiness poll interval (milliseconds)
    pub server_poll_interval_ms: u64,
    /// Defaults for unset container settings
    pub defaults: WorkloadDefaults,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            operator_namespace: "octopilot-system".to_string(),
            watch_namespace: None,
            metrics_port: DEFAULT_METRICS_PORT,
            log_format: LogFormat::Json,
            create_requeue_ms: DEFAULT_CREATE_REQUEUE_MS,
            immutable_settle_secs: DEFAULT_IMMUTABLE_SETTLE_SECS,
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            inactive_requeue_secs: DEFAULT_INACTIVE_REQUEUE_SECS,
            election_cooldown_secs: DEFAULT_ELECTION_COOLDOWN_SECS,
            discovery_enabled: true,
            discovery_interval_secs: DEFAULT_DISCOVERY_INTERVAL_SECS,
            backoff_min_secs: DEFAULT_BACKOFF_MIN_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            server_startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            server_poll_interval_ms: DEFAULT_SERVER_POLL_INTERVAL_MS,
            defaults: WorkloadDefaults::default(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        let fallback = WorkloadDefaults::default();
        Self {
            operator_namespace: env_var_or_default_str("POD_NAMESPACE", "octopilot-system"),
            watch_namespace: std::env::var("WATCH_NAMESPACE")
                .ok()
                .filter(|ns| !ns.trim().is_empty()),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            log_format: LogFormat::parse(&env_var_or_default_str("LOG_FORMAT", "json")),
            create_requeue_ms: env_var_or_default("CREATE_REQUEUE_MS", DEFAULT_CREATE_REQUEUE_MS),
            immutable_settle_secs: env_var_or_default(
                "IMMUTABLE_SETTLE_SECS",
                DEFAULT_IMMUTABLE_SETTLE_SECS,
            ),
            resync_interval_secs: env_var_or_default(
                "RESYNC_INTERVAL_SECS",
                DEFAULT_RESYNC_INTERVAL_SECS,
            ),
            inactive_requeue_secs: env_var_or_default(
                "INACTIVE_REQUEUE_SECS",
                DEFAULT_INACTIVE_REQUEUE_SECS,
            ),
            election_cooldown_secs: env_var_or_default(
                "ELECTION_COOLDOWN_SECS",
                DEFAULT_ELECTION_COOLDOWN_SECS,
            ),
            discovery_enabled: env_var_or_default_bool("DISCOVERY_ENABLED", true),
            discovery_interval_secs: env_var_or_default(
                "DISCOVERY_INTERVAL_SECS",
                DEFAULT_DISCOVERY_INTERVAL_SECS,
            ),
            backoff_min_secs: env_var_or_default("BACKOFF_MIN_SECS", DEFAULT_BACKOFF_MIN_SECS),
            backoff_max_secs: env_var_or_default("BACKOFF_MAX_SECS", DEFAULT_BACKOFF_MAX_SECS),
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            ),
            server_startup_timeout_secs: env_var_or_default(
                "SERVER_STARTUP_TIMEOUT_SECS",
                DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            ),
            server_poll_interval_ms: env_var_or_default(
                "SERVER_POLL_INTERVAL_MS",
                DEFAULT_SERVER_POLL_INTERVAL_MS,
            ),
            defaults: WorkloadDefaults {
                license_service_image: env_var_or_default_str(
                    "LICENSE_SERVICE_IMAGE",
                    &fallback.license_service_image,
                ),
                reporter_receiver_image: env_var_or_default_str(
                    "REPORTER_RECEIVER_IMAGE",
                    &fallback.reporter_receiver_image,
                ),
                reporter_database_image: env_var_or_default_str(
                    "REPORTER_DATABASE_IMAGE",
                    &fallback.reporter_database_image,
                ),
                image_pull_policy: env_var_or_default_str(
                    "IMAGE_PULL_POLICY",
                    &fallback.image_pull_policy,
                ),
            },
        }
    }

    /// Timing knobs handed to the convergence engine
    pub fn timing(&self) -> Timing {
        Timing {
            create_requeue: Duration::from_millis(self.create_requeue_ms),
            settle_delay: Duration::from_secs(self.immutable_settle_secs),
        }
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn inactive_requeue(&self) -> Duration {
        Duration::from_secs(self.inactive_requeue_secs)
    }

    pub fn election_cooldown(&self) -> Duration {
        Duration::from_secs(self.election_cooldown_secs)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map_or(default, |v| parse_bool(&v))
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_accepts_common_spellings() {
        for value in ["true", "TRUE", "1", "yes", " on "] {
            assert!(parse_bool(value), "{value} should be true");
        }
        for value in ["false", "0", "no", "off", ""] {
            assert!(!parse_bool(value), "{value} should be false");
        }
    }

    #[test]
    fn test_log_format_defaults_to_json() {
        assert_eq!(LogFormat::parse("text"), LogFormat::Text);
        assert_eq!(LogFormat::parse("TEXT"), LogFormat::Text);
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("yaml"), LogFormat::Json);
    }

    #[test]
    fn test_timing_uses_configured_delays() {
        let config = ControllerConfig {
            create_requeue_ms: 250,
            immutable_settle_secs: 2,
            ..ControllerConfig::default()
        };
        let timing = config.timing();
        assert_eq!(timing.create_requeue, Duration::from_millis(250));
        assert_eq!(timing.settle_delay, Duration::from_secs(2));
    }
}
