//! # Object API
//!
//! Narrow, kind-generic access to the platform API. The engine and the drivers
//! only ever talk to the cluster through [`ObjectApi`], which lets the whole
//! reconciliation run against the in-memory `MemoryStore` (`testing` feature)
//! in tests.

use crate::constants::FIELD_MANAGER;
use crate::error::api_error;
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

/// Namespaced identity of an object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Identity of an existing object, `None` when name or namespace are unset
    pub fn of<K: Resource>(object: &K) -> Option<Self> {
        let meta = object.meta();
        Some(Self::new(meta.namespace.clone()?, meta.name.clone()?))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Everything the engine needs from a namespaced Kubernetes kind
pub trait ManagedObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> ManagedObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// CRUD operations on one kind, addressed by [`ObjectKey`]
///
/// Errors are the platform's own, unmodified, so callers can classify them
/// with the helpers in [`crate::error`].
#[async_trait]
pub trait ObjectApi<K: ManagedObject>: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, kube::Error>;

    /// List objects, across all namespaces when `namespace` is `None`
    async fn list(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>, kube::Error>;

    async fn create(&self, object: &K) -> Result<K, kube::Error>;

    /// Full replace; the object must carry the `resourceVersion` it was read at
    async fn replace(&self, object: &K) -> Result<K, kube::Error>;

    /// JSON merge patch of the main resource
    async fn merge_patch(&self, key: &ObjectKey, patch: serde_json::Value)
        -> Result<K, kube::Error>;

    /// JSON merge patch of the status subresource
    async fn merge_patch_status(
        &self,
        key: &ObjectKey,
        patch: serde_json::Value,
    ) -> Result<K, kube::Error>;

    async fn delete(&self, key: &ObjectKey) -> Result<(), kube::Error>;
}

/// Fetch one object of kind `K`
///
/// Stores usually implement [`ObjectApi`] for many kinds, so call sites name
/// the kind here instead of relying on method resolution.
pub async fn fetch<K, S>(store: &S, key: &ObjectKey) -> Result<Option<K>, kube::Error>
where
    K: ManagedObject,
    S: ObjectApi<K> + ?Sized,
{
    store.get(key).await
}

/// List objects of kind `K`, see [`ObjectApi::list`]
pub async fn list_objects<K, S>(
    store: &S,
    namespace: Option<&str>,
    label_selector: Option<&str>,
) -> Result<Vec<K>, kube::Error>
where
    K: ManagedObject,
    S: ObjectApi<K> + ?Sized,
{
    store.list(namespace, label_selector).await
}

/// [`ObjectApi`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn namespaced<K: ManagedObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..PostParams::default()
        }
    }

    fn patch_params() -> PatchParams {
        PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..PatchParams::default()
        }
    }
}

fn namespace_of<K: ManagedObject>(object: &K) -> Result<(&str, &str), kube::Error> {
    let meta = object.meta();
    match (meta.namespace.as_deref(), meta.name.as_deref()) {
        (Some(namespace), Some(name)) => Ok((namespace, name)),
        _ => Err(api_error(
            400,
            "BadRequest",
            format!("{} requires metadata.name and metadata.namespace", K::kind(&())),
        )),
    }
}

#[async_trait]
impl<K: ManagedObject> ObjectApi<K> for KubeStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, kube::Error> {
        self.namespaced::<K>(&key.namespace).get_opt(&key.name).await
    }

    async fn list(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>, kube::Error> {
        let api: Api<K> = match namespace {
            Some(namespace) => self.namespaced(namespace),
            None => Api::all(self.client.clone()),
        };
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        Ok(api.list(&params).await?.items)
    }

    async fn create(&self, object: &K) -> Result<K, kube::Error> {
        let (namespace, _) = namespace_of(object)?;
        self.namespaced::<K>(namespace)
            .create(&Self::post_params(), object)
            .await
    }

    async fn replace(&self, object: &K) -> Result<K, kube::Error> {
        let (namespace, name) = namespace_of(object)?;
        self.namespaced::<K>(namespace)
            .replace(name, &Self::post_params(), object)
            .await
    }

    async fn merge_patch(
        &self,
        key: &ObjectKey,
        patch: serde_json::Value,
    ) -> Result<K, kube::Error> {
        self.namespaced::<K>(&key.namespace)
            .patch(&key.name, &Self::patch_params(), &Patch::Merge(&patch))
            .await
    }

    async fn merge_patch_status(
        &self,
        key: &ObjectKey,
        patch: serde_json::Value,
    ) -> Result<K, kube::Error> {
        self.namespaced::<K>(&key.namespace)
            .patch_status(&key.name, &Self::patch_params(), &Patch::Merge(&patch))
            .await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), kube::Error> {
        self.namespaced::<K>(&key.namespace)
            .delete(&key.name, &DeleteParams::background())
            .await
            .map(|_| ())
    }
}
