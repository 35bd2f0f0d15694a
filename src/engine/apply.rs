//! # Existence and Update Algorithm
//!
//! [`Converger`] applies one desired object at a time on behalf of one owning
//! custom resource:
//!
//! 1. `adopt` stamps the owner reference before anything is written
//! 2. `create_if_missing` creates absent objects and reports what it found
//! 3. `ensure` compares found against expected and picks the update strategy
//! 4. `update_or_recreate` replaces in place, recovering from 422 by recreating
//! 5. `recreate` handles kinds whose spec is immutable
//! 6. `ensure_absent` removes objects a disabled feature no longer wants
//!
//! Objects owned by anything other than the current resource are never
//! mutated or deleted.

use super::api::{ManagedObject, ObjectApi, ObjectKey};
use super::converge::{Converge, UpdateStrategy};
use super::diff::metadata_drift;
use super::outcome::Outcome;
use crate::error::{is_already_exists, is_conflict, is_invalid, is_not_found, Error, Result};
use crate::observability::metrics;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delays the engine applies after writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Requeue delay after an object was created
    pub create_requeue: Duration,
    /// Wait between delete and create of an immutable object
    pub settle_delay: Duration,
}

/// Result of [`Converger::create_if_missing`]
#[derive(Debug)]
pub enum Presence<K> {
    /// The object did not exist and was created
    Created,
    /// Another writer created it between our read and our create
    AlreadyExists,
    /// The object exists; nothing was written
    Found(K),
}

/// Applies desired objects on behalf of one owning resource
pub struct Converger<'a, S: ?Sized> {
    store: &'a S,
    owner: OwnerReference,
    owner_namespace: String,
    owner_uid: String,
    timing: Timing,
}

impl<S: ?Sized> fmt::Debug for Converger<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converger")
            .field("owner", &format!("{}/{}", self.owner.kind, self.owner.name))
            .field("owner_namespace", &self.owner_namespace)
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}

fn describe<K: ManagedObject>(object: &K) -> String {
    let meta = object.meta();
    format!(
        "{} {}/{}",
        K::kind(&()),
        meta.namespace.as_deref().unwrap_or("<none>"),
        meta.name.as_deref().unwrap_or("<unnamed>")
    )
}

fn key_of<K: ManagedObject>(object: &K) -> Result<ObjectKey> {
    ObjectKey::of(object).ok_or_else(|| Error::missing(describe(object), "name or namespace"))
}

fn clear_server_identity<K: ManagedObject>(object: &mut K) {
    let meta = object.meta_mut();
    meta.resource_version = None;
    meta.uid = None;
    meta.creation_timestamp = None;
}

impl<'a, S: ?Sized> Converger<'a, S> {
    /// Bind the engine to `owner`, the custom resource every applied object
    /// will belong to
    pub fn new<O>(store: &'a S, owner: &O, timing: Timing) -> Result<Self>
    where
        O: Resource<DynamicType = ()>,
    {
        let label = format!(
            "{} {}",
            O::kind(&()),
            owner.meta().name.as_deref().unwrap_or("<unnamed>")
        );
        let owner_ref = owner
            .controller_owner_ref(&())
            .ok_or_else(|| Error::ownership(&label, "owner has no name or uid"))?;
        let owner_namespace = owner
            .meta()
            .namespace
            .clone()
            .ok_or_else(|| Error::ownership(&label, "owner is not namespaced"))?;
        Ok(Self {
            store,
            owner_uid: owner_ref.uid.clone(),
            owner: owner_ref,
            owner_namespace,
            timing,
        })
    }

    pub fn store(&self) -> &'a S {
        self.store
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn owner_namespace(&self) -> &str {
        &self.owner_namespace
    }

    /// Whether `object` carries an owner reference to the bound resource
    pub fn owns<K: Resource>(&self, object: &K) -> bool {
        object
            .meta()
            .owner_references
            .iter()
            .flatten()
            .any(|r| r.uid == self.owner_uid)
    }

    /// Set the controller owner reference on `object`
    ///
    /// Idempotent. Fails when the object would own itself, lives in another
    /// namespace than the owner, or is already controlled by someone else.
    pub fn adopt<K: ManagedObject>(&self, object: &mut K) -> Result<()> {
        let label = describe(object);
        let meta = object.meta();
        if self.owner_uid.is_empty() {
            return Err(Error::ownership(label, "owner has no uid"));
        }
        let self_reference = meta.uid.as_deref() == Some(self.owner_uid.as_str())
            || (K::kind(&()) == self.owner.kind.as_str()
                && K::api_version(&()) == self.owner.api_version.as_str()
                && meta.name.as_deref() == Some(self.owner.name.as_str()));
        if self_reference {
            return Err(Error::ownership(label, "an object cannot own itself"));
        }
        if meta.namespace.as_deref() != Some(self.owner_namespace.as_str()) {
            return Err(Error::ownership(
                label,
                format!(
                    "owner lives in namespace {}; cross-namespace ownership is not allowed",
                    self.owner_namespace
                ),
            ));
        }

        let references = object
            .meta_mut()
            .owner_references
            .get_or_insert_with(Vec::new);
        if let Some(existing) = references.iter_mut().find(|r| r.uid == self.owner_uid) {
            *existing = self.owner.clone();
            return Ok(());
        }
        if let Some(other) = references.iter().find(|r| r.controller == Some(true)) {
            return Err(Error::ownership(
                label,
                format!("already controlled by {} {}", other.kind, other.name),
            ));
        }
        references.push(self.owner.clone());
        Ok(())
    }

    /// Create `expected` unless an object with its name already exists
    ///
    /// Fetch errors other than not-found are returned unchanged.
    pub async fn create_if_missing<K>(&self, mut expected: K) -> Result<Presence<K>>
    where
        K: ManagedObject,
        S: ObjectApi<K>,
    {
        self.adopt(&mut expected)?;
        let key = key_of(&expected)?;
        if let Some(found) = self.store.get(&key).await? {
            return Ok(Presence::Found(found));
        }

        info!("Creating {}", describe(&expected));
        match self.store.create(&expected).await {
            Ok(_) => {
                metrics::increment_object_operations(&K::kind(&()), "create");
                Ok(Presence::Created)
            }
            Err(e) if is_already_exists(&e) => {
                debug!("{} was created concurrently", describe(&expected));
                Ok(Presence::AlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Make the platform hold `expected`
    pub async fn ensure<K>(&self, mut expected: K, strategy: UpdateStrategy) -> Result<Outcome>
    where
        K: Converge,
        S: ObjectApi<K>,
    {
        self.adopt(&mut expected)?;
        let found = match self.create_if_missing(expected.clone()).await? {
            Presence::Created => return Ok(Outcome::requeue_after(self.timing.create_requeue)),
            Presence::AlreadyExists => return Ok(Outcome::done()),
            Presence::Found(found) => found,
        };
        if strategy == UpdateStrategy::CreateOnly {
            return Ok(Outcome::done());
        }
        if !self.owns(&found) {
            warn!(
                "{} exists but is not owned by {} {}, leaving it untouched",
                describe(&found),
                self.owner.kind,
                self.owner.name
            );
            return Ok(Outcome::done());
        }

        let Some(reason) =
            metadata_drift(expected.meta(), found.meta()).or_else(|| expected.drift(&found))
        else {
            debug!("{} is up to date", describe(&found));
            return Ok(Outcome::done());
        };
        info!("{} drifted: {}", describe(&found), reason);

        match strategy {
            UpdateStrategy::Recreate => self.recreate(expected, &found).await,
            _ => self.update_or_recreate(expected, &found).await,
        }
    }

    /// Replace `found` with `expected`, keeping labels and annotations others
    /// added to `found`
    ///
    /// A 422 rejection means the change cannot be applied in place; the object
    /// is deleted and created again. A 409 means `found` is stale; the pass is
    /// requeued instead of failing.
    pub async fn update_or_recreate<K>(&self, mut expected: K, found: &K) -> Result<Outcome>
    where
        K: Converge,
        S: ObjectApi<K>,
    {
        self.adopt(&mut expected)?;
        prepare_update(&mut expected, found);
        let key = key_of(&expected)?;
        let kind = K::kind(&());

        match self.store.replace(&expected).await {
            Ok(_) => {
                info!("Updated {}", describe(&expected));
                metrics::increment_object_operations(&kind, "update");
                Ok(Outcome::done())
            }
            Err(e) if is_invalid(&e) => {
                info!(
                    "In-place update of {} rejected ({}), recovering by recreating it",
                    describe(&expected),
                    e
                );
                self.delete_quietly::<K>(&key).await?;
                clear_server_identity(&mut expected);
                self.create_replacement(expected).await
            }
            Err(e) if is_conflict(&e) => {
                debug!("{} changed while updating, retrying shortly", key);
                Ok(Outcome::requeue_after(self.timing.create_requeue))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete `found`, wait for the settle delay, create `expected`
    pub async fn recreate<K>(&self, mut expected: K, found: &K) -> Result<Outcome>
    where
        K: Converge,
        S: ObjectApi<K>,
    {
        self.adopt(&mut expected)?;
        prepare_update(&mut expected, found);
        clear_server_identity(&mut expected);
        let key = key_of(&expected)?;

        info!("Recreating {} (spec is immutable)", describe(&expected));
        self.delete_quietly::<K>(&key).await?;
        tokio::time::sleep(self.timing.settle_delay).await;
        self.create_replacement(expected).await
    }

    /// Delete the object at `key` if this resource owns it
    pub async fn ensure_absent<K>(&self, key: &ObjectKey) -> Result<Outcome>
    where
        K: ManagedObject,
        S: ObjectApi<K>,
    {
        let Some(found) = self.store.get(key).await? else {
            return Ok(Outcome::done());
        };
        if !self.owns(&found) {
            warn!(
                "{} is no longer wanted but is not owned by {} {}, leaving it in place",
                describe(&found),
                self.owner.kind,
                self.owner.name
            );
            return Ok(Outcome::done());
        }

        info!("Deleting {}", describe(&found));
        self.delete_quietly::<K>(key).await?;
        Ok(Outcome::requeue_after(self.timing.create_requeue))
    }

    async fn delete_quietly<K>(&self, key: &ObjectKey) -> Result<()>
    where
        K: ManagedObject,
        S: ObjectApi<K>,
    {
        match self.store.delete(key).await {
            Ok(()) => {
                metrics::increment_object_operations(&K::kind(&()), "delete");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_replacement<K>(&self, expected: K) -> Result<Outcome>
    where
        K: ManagedObject,
        S: ObjectApi<K>,
    {
        match self.store.create(&expected).await {
            Ok(_) => {
                metrics::increment_object_operations(&K::kind(&()), "recreate");
                Ok(Outcome::requeue_after(self.timing.create_requeue))
            }
            // the old object is still finalizing
            Err(e) if is_already_exists(&e) => {
                Ok(Outcome::requeue_after(self.timing.settle_delay))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Carry the found object's version, foreign metadata and server-owned state
/// into `expected`
fn prepare_update<K: Converge>(expected: &mut K, found: &K) {
    let found_meta = found.meta();
    let meta = expected.meta_mut();
    meta.resource_version.clone_from(&found_meta.resource_version);
    for (target, source) in [
        (&mut meta.labels, &found_meta.labels),
        (&mut meta.annotations, &found_meta.annotations),
    ] {
        let Some(source) = source else {
            continue;
        };
        let target = target.get_or_insert_with(Default::default);
        for (key, value) in source {
            target.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    expected.carry_forward(found);
}
