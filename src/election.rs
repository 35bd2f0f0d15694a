//! # Singleton Election
//!
//! Only one `LicenseService` is served at a time. When several exist, the
//! oldest by creation timestamp wins (ties broken by namespace, then name) and
//! is marked `ACTIVE`; every other instance is marked `INACTIVE` and skips all
//! child-mutating work.
//!
//! Elections are rate limited by [`ElectionGate`] so a burst of passes over
//! many instances does not rewrite their status back and forth.

use crate::crd::LicenseService;
use crate::engine::{ManagedObject, ObjectApi, ObjectKey};
use crate::error::{Error, Result};
use crate::observability::metrics;
use kube::Resource;
use serde_json::json;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Election state recorded in `status.state`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    Active,
    Inactive,
}

impl ElectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ACTIVE" => Some(Self::Active),
            "INACTIVE" => Some(Self::Inactive),
            _ => None,
        }
    }
}

impl fmt::Display for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A kind that takes part in the election
pub trait Elected: ManagedObject {
    fn election_state(&self) -> Option<ElectionState>;
}

impl Elected for LicenseService {
    fn election_state(&self) -> Option<ElectionState> {
        self.status
            .as_ref()
            .and_then(|s| s.state.as_deref())
            .and_then(ElectionState::parse)
    }
}

/// Pick the winner among `instances`, independent of their order
///
/// Instances without a creation timestamp sort after all others.
pub fn elect<K: Resource>(instances: &[K]) -> Option<&K> {
    instances.iter().min_by(|a, b| {
        let (a, b) = (a.meta(), b.meta());
        (
            a.creation_timestamp.is_none(),
            &a.creation_timestamp,
            &a.namespace,
            &a.name,
        )
            .cmp(&(
                b.creation_timestamp.is_none(),
                &b.creation_timestamp,
                &b.namespace,
                &b.name,
            ))
    })
}

/// Whether the instances need a new election before `current` can proceed
///
/// True when `current` has no state yet or the instances do not have exactly
/// one `ACTIVE` member.
pub fn needs_election<K: Elected>(current: &K, instances: &[K]) -> bool {
    let active = instances
        .iter()
        .filter(|i| i.election_state() == Some(ElectionState::Active))
        .count();
    current.election_state().is_none() || active != 1
}

/// Outcome of a successful [`run_election`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElectionReport {
    pub winner: Option<ObjectKey>,
    /// Instances whose state was written
    pub updated: usize,
    /// Instances that already had the right state
    pub unchanged: usize,
}

/// Write the election result into every instance's status
///
/// Each write is independent: a failed write does not stop the others, and
/// all failures are reported together once every write was attempted.
pub async fn run_election<K, S>(store: &S, instances: &[K]) -> Result<ElectionReport>
where
    K: Elected,
    S: ObjectApi<K> + ?Sized,
{
    let winner = elect(instances).and_then(ObjectKey::of);
    let mut report = ElectionReport {
        winner: winner.clone(),
        ..ElectionReport::default()
    };
    let mut failures = Vec::new();
    let mut attempted = 0;

    for instance in instances {
        let Some(key) = ObjectKey::of(instance) else {
            continue;
        };
        let desired = if winner.as_ref() == Some(&key) {
            ElectionState::Active
        } else {
            ElectionState::Inactive
        };
        if instance.election_state() == Some(desired) {
            report.unchanged += 1;
            continue;
        }

        attempted += 1;
        let patch = json!({ "status": { "state": desired.as_str() } });
        match store.merge_patch_status(&key, patch).await {
            Ok(_) => {
                info!("Marked {} {} {}", K::kind(&()), key, desired);
                report.updated += 1;
            }
            Err(e) => {
                warn!("Failed to mark {} {} {}: {}", K::kind(&()), key, desired, e);
                failures.push(format!("{key}: {e}"));
            }
        }
    }

    if failures.is_empty() {
        metrics::increment_elections("success");
        Ok(report)
    } else {
        metrics::increment_elections("partial_failure");
        Err(Error::Election {
            failed: failures.len(),
            attempted,
            details: failures.join("; "),
        })
    }
}

/// Minimum spacing between two elections
#[derive(Debug)]
pub struct ElectionGate {
    cooldown: Duration,
    last_run: Mutex<Option<Instant>>,
}

impl ElectionGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_run: Mutex::new(None),
        }
    }

    /// Claim the right to run an election now
    ///
    /// Returns the remaining cooldown when an election ran too recently.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut last_run = self.last_run.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = *last_run {
            let elapsed = previous.elapsed();
            if elapsed < self.cooldown {
                return Err(self.cooldown - elapsed);
            }
        }
        *last_run = Some(Instant::now());
        Ok(())
    }
}
