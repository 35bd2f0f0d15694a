//! # In-Memory Store
//!
//! A small in-process stand-in for the Kubernetes API server implementing
//! [`ObjectApi`] for every kind. Objects are kept as JSON and keyed by kind,
//! namespace and name.
//!
//! The store mimics the API server behaviour the engine depends on:
//! - `uid`, `resourceVersion`, `generation` and `creationTimestamp` bookkeeping
//! - 404 on missing objects, 409 `AlreadyExists` on duplicate creates
//! - 409 `Conflict` on replaces carrying a stale `resourceVersion`
//! - status is only written through the status subresource
//!
//! Failure injection (`reject_replace_for`, `conflict_replace_for`,
//! `fail_status_writes_for`) lets tests
//! drive the recovery paths, and [`WriteCounts`] makes idempotence observable.

use super::api::{ManagedObject, ObjectApi, ObjectKey};
use crate::error::api_error;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Mutating calls observed by a [`MemoryStore`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteCounts {
    pub creates: usize,
    pub replaces: usize,
    pub patches: usize,
    pub status_patches: usize,
    pub deletes: usize,
}

impl WriteCounts {
    pub fn total(&self) -> usize {
        self.creates + self.replaces + self.patches + self.status_patches + self.deletes
    }
}

type StoredKey = (String, String, String);

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<StoredKey, Value>,
    next_version: u64,
    writes: WriteCounts,
    rejected_replace_kinds: HashSet<String>,
    conflicting_replace_kinds: HashSet<String>,
    failing_status_names: HashSet<String>,
}

impl State {
    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

/// In-process [`ObjectApi`] implementation; clones share the same objects
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

fn stored_key<K: ManagedObject>(key: &ObjectKey) -> StoredKey {
    (
        K::kind(&()).into_owned(),
        key.namespace.clone(),
        key.name.clone(),
    )
}

fn not_found<K: ManagedObject>(key: &ObjectKey) -> kube::Error {
    api_error(
        404,
        "NotFound",
        format!("{} \"{}\" not found", K::plural(&()), key.name),
    )
}

fn decode<K: ManagedObject>(value: &Value) -> Result<K, kube::Error> {
    serde_json::from_value(value.clone()).map_err(kube::Error::SerdeError)
}

fn encode<K: ManagedObject>(object: &K) -> Result<(ObjectKey, Value), kube::Error> {
    let key = ObjectKey::of(object).ok_or_else(|| {
        api_error(
            400,
            "BadRequest",
            format!("{} requires metadata.name and metadata.namespace", K::kind(&())),
        )
    })?;
    let mut value = serde_json::to_value(object).map_err(kube::Error::SerdeError)?;
    if let Value::Object(map) = &mut value {
        map.insert("apiVersion".into(), Value::String(K::api_version(&()).into_owned()));
        map.insert("kind".into(), Value::String(K::kind(&()).into_owned()));
    }
    Ok((key, value))
}

fn metadata_mut(value: &mut Value) -> Option<&mut Map<String, Value>> {
    let meta = value
        .as_object_mut()?
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    meta.as_object_mut()
}

fn metadata_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get("metadata")?.get(field)?.as_str()
}

/// RFC 7386 JSON merge patch
fn merge_json(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_json(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn matches_selector(value: &Value, selector: Option<&str>) -> bool {
    let Some(selector) = selector else {
        return true;
    };
    let labels = value.get("metadata").and_then(|m| m.get("labels"));
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, expected)) => labels
                .and_then(|l| l.get(key.trim()))
                .and_then(Value::as_str)
                == Some(expected.trim()),
            None => labels.and_then(|l| l.get(term)).is_some(),
        })
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an object directly, bypassing write accounting
    ///
    /// Missing `uid`, `resourceVersion` and `creationTimestamp` are filled in
    /// the same way `create` fills them; values already set are kept so tests
    /// can pin creation order.
    ///
    /// # Panics
    ///
    /// Panics when the object has no name or namespace.
    pub fn insert<K: ManagedObject>(&self, object: K) -> K {
        let (key, mut value) = match encode(&object) {
            Ok(encoded) => encoded,
            Err(e) => panic!("cannot seed {}: {e}", K::kind(&())),
        };
        let mut state = self.lock();
        let version = state.bump_version();
        Self::stamp(&mut value, &version, true);
        state.objects.insert(stored_key::<K>(&key), value.clone());
        decode(&value).unwrap_or(object)
    }

    /// Current copy of an object, without going through the async API
    pub fn object<K: ManagedObject>(&self, key: &ObjectKey) -> Option<K> {
        let state = self.lock();
        state
            .objects
            .get(&stored_key::<K>(key))
            .and_then(|value| decode(value).ok())
    }

    /// All objects of kind `K`, in key order
    pub fn objects<K: ManagedObject>(&self) -> Vec<K> {
        let kind = K::kind(&());
        let state = self.lock();
        state
            .objects
            .iter()
            .filter(|((k, _, _), _)| k.as_str() == kind.as_ref())
            .filter_map(|(_, value)| decode(value).ok())
            .collect()
    }

    /// Remove an object without accounting, as if someone else deleted it
    pub fn remove<K: ManagedObject>(&self, key: &ObjectKey) -> bool {
        self.lock().objects.remove(&stored_key::<K>(key)).is_some()
    }

    pub fn writes(&self) -> WriteCounts {
        self.lock().writes
    }

    pub fn reset_writes(&self) {
        self.lock().writes = WriteCounts::default();
    }

    /// Make every replace of kind `K` fail with 422 `Invalid`
    pub fn reject_replace_for<K: ManagedObject>(&self) {
        self.lock()
            .rejected_replace_kinds
            .insert(K::kind(&()).into_owned());
    }

    /// Make every replace of kind `K` lose a write race with 409 `Conflict`
    pub fn conflict_replace_for<K: ManagedObject>(&self) {
        self.lock()
            .conflicting_replace_kinds
            .insert(K::kind(&()).into_owned());
    }

    /// Make status writes to objects named `name` fail with 500
    pub fn fail_status_writes_for(&self, name: &str) {
        self.lock().failing_status_names.insert(name.to_string());
    }

    fn stamp(value: &mut Value, version: &str, fill_identity: bool) {
        let Some(meta) = metadata_mut(value) else {
            return;
        };
        meta.insert("resourceVersion".into(), Value::String(version.to_string()));
        if fill_identity {
            meta.entry("uid")
                .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
            meta.entry("creationTimestamp").or_insert_with(|| {
                Value::String(
                    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                )
            });
            meta.entry("generation").or_insert(Value::from(1));
        }
    }
}

#[async_trait]
impl<K: ManagedObject> ObjectApi<K> for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, kube::Error> {
        let state = self.lock();
        state
            .objects
            .get(&stored_key::<K>(key))
            .map(decode)
            .transpose()
    }

    async fn list(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>, kube::Error> {
        let kind = K::kind(&());
        let state = self.lock();
        state
            .objects
            .iter()
            .filter(|((k, ns, _), _)| {
                k.as_str() == kind.as_ref() && namespace.is_none_or(|wanted| wanted == ns.as_str())
            })
            .filter(|(_, value)| matches_selector(value, label_selector))
            .map(|(_, value)| decode(value))
            .collect()
    }

    async fn create(&self, object: &K) -> Result<K, kube::Error> {
        let (key, mut value) = encode(object)?;
        let mut state = self.lock();
        let stored = stored_key::<K>(&key);
        if state.objects.contains_key(&stored) {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("{} \"{}\" already exists", K::plural(&()), key.name),
            ));
        }
        if let Some(meta) = metadata_mut(&mut value) {
            meta.remove("uid");
            meta.remove("resourceVersion");
            meta.remove("creationTimestamp");
        }
        let version = state.bump_version();
        Self::stamp(&mut value, &version, true);
        state.writes.creates += 1;
        state.objects.insert(stored, value.clone());
        decode(&value)
    }

    async fn replace(&self, object: &K) -> Result<K, kube::Error> {
        let (key, mut value) = encode(object)?;
        let mut state = self.lock();
        let stored = stored_key::<K>(&key);
        let Some(existing) = state.objects.get(&stored).cloned() else {
            return Err(not_found::<K>(&key));
        };
        if state.rejected_replace_kinds.contains(stored.0.as_str()) {
            return Err(api_error(
                422,
                "Invalid",
                format!(
                    "{} \"{}\" is invalid: spec: field is immutable",
                    K::kind(&()),
                    key.name
                ),
            ));
        }
        let current_version = metadata_str(&existing, "resourceVersion");
        let stale = matches!(
            metadata_str(&value, "resourceVersion"),
            Some(sent) if Some(sent) != current_version
        );
        if stale || state.conflicting_replace_kinds.contains(stored.0.as_str()) {
            return Err(api_error(
                409,
                "Conflict",
                format!(
                    "Operation cannot be fulfilled on {} \"{}\": the object has been modified",
                    K::plural(&()),
                    key.name
                ),
            ));
        }

        // identity and status are owned by the server
        if let Some(meta) = metadata_mut(&mut value) {
            for field in ["uid", "creationTimestamp", "generation"] {
                match existing.get("metadata").and_then(|m| m.get(field)) {
                    Some(v) => {
                        meta.insert(field.into(), v.clone());
                    }
                    None => {
                        meta.remove(field);
                    }
                }
            }
        }
        match existing.get("status") {
            Some(status) => value["status"] = status.clone(),
            None => {
                if let Value::Object(map) = &mut value {
                    map.remove("status");
                }
            }
        }

        let version = state.bump_version();
        Self::stamp(&mut value, &version, false);
        state.writes.replaces += 1;
        state.objects.insert(stored, value.clone());
        decode(&value)
    }

    async fn merge_patch(
        &self,
        key: &ObjectKey,
        patch: serde_json::Value,
    ) -> Result<K, kube::Error> {
        let mut state = self.lock();
        let stored = stored_key::<K>(key);
        let Some(mut value) = state.objects.get(&stored).cloned() else {
            return Err(not_found::<K>(key));
        };
        let mut patch = patch;
        if let Value::Object(map) = &mut patch {
            map.remove("status");
        }
        merge_json(&mut value, &patch);
        let version = state.bump_version();
        Self::stamp(&mut value, &version, false);
        state.writes.patches += 1;
        state.objects.insert(stored, value.clone());
        decode(&value)
    }

    async fn merge_patch_status(
        &self,
        key: &ObjectKey,
        patch: serde_json::Value,
    ) -> Result<K, kube::Error> {
        let mut state = self.lock();
        if state.failing_status_names.contains(&key.name) {
            return Err(api_error(
                500,
                "InternalError",
                format!("status write to {key} failed"),
            ));
        }
        let stored = stored_key::<K>(key);
        let Some(mut value) = state.objects.get(&stored).cloned() else {
            return Err(not_found::<K>(key));
        };
        if let Some(status) = patch.get("status") {
            merge_json(&mut value["status"], status);
        }
        let version = state.bump_version();
        Self::stamp(&mut value, &version, false);
        state.writes.status_patches += 1;
        state.objects.insert(stored, value.clone());
        decode(&value)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), kube::Error> {
        let mut state = self.lock();
        if state.objects.remove(&stored_key::<K>(key)).is_none() {
            return Err(not_found::<K>(key));
        }
        state.writes.deletes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{is_already_exists, is_conflict, is_not_found};
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;
    use serde_json::json;

    fn config_map(name: &str, labels: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("licensing".into()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                ..ObjectMeta::default()
            },
            ..ConfigMap::default()
        }
    }

    #[tokio::test]
    async fn test_create_assigns_identity_and_rejects_duplicates() {
        let store = MemoryStore::new();
        let created: ConfigMap = store.create(&config_map("info", &[])).await.unwrap();

        assert!(created.metadata.uid.is_some());
        assert!(created.metadata.resource_version.is_some());
        assert!(created.metadata.creation_timestamp.is_some());

        let err = ObjectApi::<ConfigMap>::create(&store, &config_map("info", &[]))
            .await
            .unwrap_err();
        assert!(is_already_exists(&err));
    }

    #[tokio::test]
    async fn test_replace_with_stale_version_conflicts() {
        let store = MemoryStore::new();
        let created: ConfigMap = store.create(&config_map("info", &[])).await.unwrap();
        let key = ObjectKey::new("licensing", "info");
        let _: ConfigMap = store
            .merge_patch(&key, json!({"data": {"a": "1"}}))
            .await
            .unwrap();

        let err = ObjectApi::<ConfigMap>::replace(&store, &created)
            .await
            .unwrap_err();
        assert!(is_conflict(&err));
    }

    #[tokio::test]
    async fn test_injected_conflict_rejects_a_current_replace() {
        let store = MemoryStore::new();
        let created: ConfigMap = store.create(&config_map("info", &[])).await.unwrap();
        store.conflict_replace_for::<ConfigMap>();

        let err = ObjectApi::<ConfigMap>::replace(&store, &created)
            .await
            .unwrap_err();
        assert!(is_conflict(&err));
        assert_eq!(store.writes().replaces, 0);
    }

    #[tokio::test]
    async fn test_list_filters_by_namespace_and_selector() {
        let store = MemoryStore::new();
        store.insert(config_map("a", &[("app", "one")]));
        store.insert(config_map("b", &[("app", "two")]));

        let all: Vec<ConfigMap> = store.list(None, None).await.unwrap();
        assert_eq!(all.len(), 2);

        let selected: Vec<ConfigMap> = store
            .list(Some("licensing"), Some("app=two"))
            .await
            .unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].metadata.name.as_deref(), Some("b"));

        let elsewhere: Vec<ConfigMap> = store.list(Some("other"), None).await.unwrap();
        assert!(elsewhere.is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_object_is_not_found() {
        let store = MemoryStore::new();
        let err = ObjectApi::<ConfigMap>::delete(&store, &ObjectKey::new("licensing", "nope"))
            .await
            .unwrap_err();
        assert!(is_not_found(&err));
        assert_eq!(store.writes().total(), 0);
    }

    #[test]
    fn test_merge_json_removes_null_keys() {
        let mut target = json!({"a": {"b": 1, "c": 2}, "d": [1, 2]});
        merge_json(&mut target, &json!({"a": {"b": null, "e": 3}, "d": [3]}));
        assert_eq!(target, json!({"a": {"c": 2, "e": 3}, "d": [3]}));
    }
}
