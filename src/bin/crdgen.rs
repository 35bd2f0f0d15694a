//! # CRD Generator
//!
//! Prints the CustomResourceDefinitions of the operator as YAML.
//!
//! ## Usage
//!
//! ```bash
//! # Generate both CRDs
//! cargo run --bin crdgen > config/crd/crds.yaml
//!
//! # Generate one kind and apply it directly
//! cargo run --bin crdgen -- --kind license-service | kubectl apply -f -
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use kube::core::CustomResourceExt;
use license_service_operator::crd::{LicenseReporter, LicenseService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Kind {
    LicenseService,
    LicenseReporter,
}

#[derive(Debug, Parser)]
#[command(name = "crdgen", about = "Print the operator's CRDs as YAML")]
struct Args {
    /// Only print the CRD of this kind
    #[arg(long, value_enum)]
    kind: Option<Kind>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let crds = match args.kind {
        Some(Kind::LicenseService) => vec![LicenseService::crd()],
        Some(Kind::LicenseReporter) => vec![LicenseReporter::crd()],
        None => vec![LicenseService::crd(), LicenseReporter::crd()],
    };
    let documents = crds
        .iter()
        .map(|crd| serde_yaml::to_string(crd).context("Failed to serialize CRD"))
        .collect::<Result<Vec<_>>>()?;
    print!("{}", documents.join("---\n"));
    Ok(())
}
