//! # Certificate Lifecycle
//!
//! Self-signed serving certificates for the managed workloads.
//!
//! - `material`: key and certificate generation, parsing and inspection
//! - `manager`: creates, rotates and repairs the TLS secret, then restarts the
//!   workload that mounts it

mod manager;
mod material;

pub use manager::{
    ensure_certificate, restart_workload, CertificateAction, CertificateRequest, TLS_CERT_KEY,
    TLS_KEY_KEY,
};
pub use material::{
    generate_self_signed, generate_with_validity, hostname_matches, inspect, CertificateInfo,
    CertificateMaterial, Verdict,
};

use thiserror::Error;

/// Certificate generation and parsing errors
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("At least one hostname is required")]
    NoHostnames,

    #[error("Invalid hostname {hostname:?}: {reason}")]
    InvalidHostname { hostname: String, reason: String },

    #[error("Key generation failed: {0}")]
    KeyGeneration(#[source] rcgen::Error),

    #[error("Certificate generation failed: {0}")]
    Generation(#[source] rcgen::Error),

    #[error("Certificate parsing failed: {0}")]
    Parse(String),
}
