//! # Status
//!
//! Status is recomputed on every pass from the live pods of the workload and
//! written back only when it changed.

use crate::crd::{Condition, FeatureStatus, InstanceStatus, PodSummary};
use crate::election::ElectionState;
use crate::engine::{list_objects, ManagedObject, ObjectApi, ObjectKey};
use crate::error::Result;
use crate::observability::metrics;
use k8s_openapi::api::core::v1::Pod;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

pub const READY_CONDITION: &str = "Ready";

/// `k=v,k=v` form of a label map, as accepted by list calls
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn summarize_pod(pod: &Pod) -> PodSummary {
    let status = pod.status.as_ref();
    let ready = status
        .and_then(|s| s.conditions.as_ref())
        .into_iter()
        .flatten()
        .any(|c| c.type_ == READY_CONDITION && c.status == "True");
    let restarts = status
        .and_then(|s| s.container_statuses.as_ref())
        .into_iter()
        .flatten()
        .map(|c| c.restart_count)
        .sum();
    PodSummary {
        name: pod.metadata.name.clone().unwrap_or_default(),
        phase: status.and_then(|s| s.phase.clone()),
        ready,
        restarts,
    }
}

/// Summaries of `pods`, sorted by name
pub fn summarize_pods(pods: &[Pod]) -> Vec<PodSummary> {
    let mut summaries: Vec<PodSummary> = pods.iter().map(summarize_pod).collect();
    summaries.sort_by(|a, b| a.name.cmp(&b.name));
    summaries
}

/// Readiness of the instance
///
/// An inactive instance is never ready. Otherwise it is ready when at least
/// one pod exists and every pod is ready.
pub fn ready_condition(state: Option<ElectionState>, pods: &[PodSummary]) -> Condition {
    let (status, reason, message) = if state == Some(ElectionState::Inactive) {
        (
            "False",
            "NotElected",
            "Another instance is active; this one is standing by".to_string(),
        )
    } else if pods.is_empty() {
        ("False", "NoPods", "No pods are running yet".to_string())
    } else if pods.iter().all(|p| p.ready) {
        ("True", "AllPodsReady", format!("{} pod(s) ready", pods.len()))
    } else {
        let ready = pods.iter().filter(|p| p.ready).count();
        (
            "False",
            "PodsNotReady",
            format!("{ready} of {} pod(s) ready", pods.len()),
        )
    };
    Condition {
        r#type: READY_CONDITION.to_string(),
        status: status.to_string(),
        last_transition_time: None,
        reason: Some(reason.to_string()),
        message: Some(message),
    }
}

/// Carry the transition time over from `previous` when the condition status
/// did not change, stamp `now` otherwise
pub fn stamp_transitions(conditions: &mut [Condition], previous: &[Condition], now: &str) {
    for condition in conditions {
        let unchanged = previous
            .iter()
            .find(|p| p.r#type == condition.r#type)
            .filter(|p| p.status == condition.status);
        condition.last_transition_time = match unchanged {
            Some(p) if p.last_transition_time.is_some() => p.last_transition_time.clone(),
            _ => Some(now.to_string()),
        };
    }
}

/// Everything a driver knows about an instance at the end of a pass
#[derive(Debug, Clone)]
pub struct StatusInput {
    pub state: Option<ElectionState>,
    pub features: Option<FeatureStatus>,
    pub pod_selector: BTreeMap<String, String>,
    pub generation: Option<i64>,
}

/// Build the status of an instance from its live pods
pub async fn observe<S>(
    store: &S,
    namespace: &str,
    input: &StatusInput,
    previous: Option<&InstanceStatus>,
) -> Result<InstanceStatus>
where
    S: ObjectApi<Pod> + ?Sized,
{
    let selector = selector_string(&input.pod_selector);
    let pods = list_objects::<Pod, _>(store, Some(namespace), Some(&selector)).await?;
    let pods = summarize_pods(&pods);
    let mut conditions = vec![ready_condition(input.state, &pods)];
    stamp_transitions(
        &mut conditions,
        previous.map(|p| p.conditions.as_slice()).unwrap_or_default(),
        &chrono::Utc::now().to_rfc3339(),
    );
    Ok(InstanceStatus {
        state: input.state.map(|s| s.as_str().to_string()),
        pods,
        features: input.features.clone(),
        conditions,
        observed_generation: input.generation,
    })
}

fn without_times(status: &InstanceStatus) -> InstanceStatus {
    let mut status = status.clone();
    for condition in &mut status.conditions {
        condition.last_transition_time = None;
    }
    status
}

/// Whether `desired` differs from `current`, ignoring transition times
pub fn status_changed(current: Option<&InstanceStatus>, desired: &InstanceStatus) -> bool {
    current.is_none_or(|current| without_times(current) != without_times(desired))
}

/// Merge-patch the status subresource of `key` when it changed
///
/// Returns whether a write happened.
pub async fn write_status_if_changed<K, S>(
    store: &S,
    key: &ObjectKey,
    current: Option<&InstanceStatus>,
    desired: &InstanceStatus,
) -> Result<bool>
where
    K: ManagedObject,
    S: ObjectApi<K> + ?Sized,
{
    if !status_changed(current, desired) {
        debug!("Status of {} {} is up to date", K::kind(&()), key);
        return Ok(false);
    }
    let patch = json!({ "status": serde_json::to_value(desired)? });
    store.merge_patch_status(key, patch).await?;
    metrics::increment_object_operations(&K::kind(&()), "status");
    debug!("Updated status of {} {}", K::kind(&()), key);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ContainerStatus, PodCondition, PodStatus};

    fn pod(name: &str, ready: bool, restarts: i32) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.status = Some(PodStatus {
            phase: Some("Running".to_string()),
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..PodCondition::default()
            }]),
            container_statuses: Some(vec![ContainerStatus {
                name: "main".to_string(),
                restart_count: restarts,
                ..ContainerStatus::default()
            }]),
            ..PodStatus::default()
        });
        pod
    }

    #[test]
    fn test_pods_sorted_by_name() {
        let summaries = summarize_pods(&[pod("b", true, 0), pod("a", false, 3)]);
        let names: Vec<_> = summaries.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(summaries[0].restarts, 3);
        assert!(!summaries[0].ready);
    }

    #[test]
    fn test_ready_requires_pods_and_all_ready() {
        assert_eq!(ready_condition(None, &[]).status, "False");
        let mixed = summarize_pods(&[pod("a", true, 0), pod("b", false, 0)]);
        let condition = ready_condition(Some(ElectionState::Active), &mixed);
        assert_eq!(condition.reason.as_deref(), Some("PodsNotReady"));
        let all = summarize_pods(&[pod("a", true, 0)]);
        assert_eq!(ready_condition(None, &all).status, "True");
    }

    #[test]
    fn test_inactive_is_never_ready() {
        let all = summarize_pods(&[pod("a", true, 0)]);
        let condition = ready_condition(Some(ElectionState::Inactive), &all);
        assert_eq!(condition.status, "False");
        assert_eq!(condition.reason.as_deref(), Some("NotElected"));
    }

    #[test]
    fn test_transition_time_kept_while_status_unchanged() {
        let previous = vec![Condition {
            r#type: "Ready".to_string(),
            status: "True".to_string(),
            last_transition_time: Some("earlier".to_string()),
            ..Condition::default()
        }];
        let mut same = vec![ready_condition(None, &summarize_pods(&[pod("a", true, 0)]))];
        stamp_transitions(&mut same, &previous, "now");
        assert_eq!(same[0].last_transition_time.as_deref(), Some("earlier"));

        let mut flipped = vec![ready_condition(None, &[])];
        stamp_transitions(&mut flipped, &previous, "now");
        assert_eq!(flipped[0].last_transition_time.as_deref(), Some("now"));
    }

    #[test]
    fn test_status_comparison_ignores_transition_times() {
        let mut a = InstanceStatus {
            conditions: vec![ready_condition(None, &[])],
            ..InstanceStatus::default()
        };
        let mut b = a.clone();
        a.conditions[0].last_transition_time = Some("t1".to_string());
        b.conditions[0].last_transition_time = Some("t2".to_string());
        assert!(!status_changed(Some(&a), &b));
        b.state = Some("ACTIVE".to_string());
        assert!(status_changed(Some(&a), &b));
        assert!(status_changed(None, &b));
    }

    #[test]
    fn test_selector_string_joins_pairs() {
        let labels = BTreeMap::from([
            ("app".to_string(), "x".to_string()),
            ("instance".to_string(), "y".to_string()),
        ]);
        assert_eq!(selector_string(&labels), "app=x,instance=y");
    }
}
