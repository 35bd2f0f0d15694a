//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// API group of the operator's custom resources
pub const API_GROUP: &str = "licensing.octopilot.io";

/// Field manager recorded on every write the operator makes
pub const FIELD_MANAGER: &str = "license-service-operator";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Delay before re-running a pass after an object was created (milliseconds)
///
/// Later steps observe the newly created object on the next pass instead of
/// racing the API server's caches.
pub const DEFAULT_CREATE_REQUEUE_MS: u64 = 1000;

/// Wait between deleting and recreating an object whose spec is immutable (seconds)
pub const DEFAULT_IMMUTABLE_SETTLE_SECS: u64 = 5;

/// Periodic resync of a converged resource (seconds)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 300;

/// Requeue interval for instances that lost the election (seconds)
pub const DEFAULT_INACTIVE_REQUEUE_SECS: u64 = 60;

/// Minimum time between two elections (seconds)
pub const DEFAULT_ELECTION_COOLDOWN_SECS: u64 = 10;

/// Poll interval of the background discovery task (seconds)
pub const DEFAULT_DISCOVERY_INTERVAL_SECS: u64 = 30;

/// Fibonacci backoff floor for failed passes (seconds)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 5;

/// Fibonacci backoff ceiling for failed passes (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Default maximum number of resources reconciled at the same time
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 4;

/// Default image of the license service API
pub const DEFAULT_LICENSE_SERVICE_IMAGE: &str = "ghcr.io/octopilot/license-service:1.0.0";

/// Default image of the reporter's receiver container
pub const DEFAULT_REPORTER_RECEIVER_IMAGE: &str =
    "ghcr.io/octopilot/license-service-reporter:1.0.0";

/// Default image of the reporter's database container
pub const DEFAULT_REPORTER_DATABASE_IMAGE: &str = "docker.io/library/postgres:16-alpine";

/// Default image pull policy for managed containers
pub const DEFAULT_IMAGE_PULL_POLICY: &str = "IfNotPresent";

/// Validity of generated self-signed certificates (days)
pub const CERTIFICATE_VALIDITY_DAYS: i64 = 365;

/// Certificates expiring sooner than this are regenerated (days)
pub const CERTIFICATE_ROTATION_THRESHOLD_DAYS: i64 = 90;

/// Pod template annotation bumped to roll a deployment after a certificate change
pub const RESTARTED_AT_ANNOTATION: &str = "licensing.octopilot.io/restartedAt";

/// Workload annotation the discovery task counts products by
pub const PRODUCT_ID_ANNOTATION: &str = "productID";

/// Container port of the license service API
pub const LICENSE_SERVICE_PORT: i32 = 8080;

/// Container port of the reporter receiver
pub const REPORTER_PORT: i32 = 8080;

/// Container port of the reporter database
pub const REPORTER_DATABASE_PORT: i32 = 5432;
