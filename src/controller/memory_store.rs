//! In-process [`Store`] implementation
//!
//! Behaves like the API server for the parts the reconciler depends on:
//! resourceVersion stamping with conflict detection, status as a separate
//! subresource, and finalizer-deferred deletion. Used by the test suites and
//! by the operator's dry-run mode.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::{DynamicObject, TypeMeta};
use tokio::sync::Mutex;
use tracing::debug;

use super::store::{ListSelector, ObjectKey, ResourceKind, Store};
use crate::error::{Error, Result};

type StoreKey = (String, Option<String>, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<StoreKey, DynamicObject>,
    next_version: u64,
    writes: u64,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

/// Object store held in memory
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

fn store_key(key: &ObjectKey) -> StoreKey {
    (
        format!("{}/{}", key.kind.api_version(), key.kind.kind),
        key.namespace.clone(),
        key.name.clone(),
    )
}

fn object_key(kind: &ResourceKind, obj: &DynamicObject) -> Result<ObjectKey> {
    if obj.metadata.name.as_deref().unwrap_or_default().is_empty() {
        return Err(Error::StoreError(format!("{} object has no name", kind.kind)));
    }
    Ok(ObjectKey::for_object(kind, obj))
}

fn check_version(key: &ObjectKey, stored: &DynamicObject, obj: &DynamicObject) -> Result<()> {
    match &obj.metadata.resource_version {
        Some(rv) if stored.metadata.resource_version.as_ref() != Some(rv) => {
            Err(Error::conflict(key.kind.kind.clone(), key.name.clone()))
        }
        _ => Ok(()),
    }
}

fn status_of(obj: &DynamicObject) -> Option<serde_json::Value> {
    obj.data.get("status").cloned()
}

fn set_status(obj: &mut DynamicObject, status: Option<serde_json::Value>) {
    if !obj.data.is_object() {
        obj.data = serde_json::Value::Object(Default::default());
    }
    if let Some(map) = obj.data.as_object_mut() {
        match status {
            Some(status) => {
                map.insert("status".to_string(), status);
            }
            None => {
                map.remove("status");
            }
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of create/update/delete calls that changed the store
    pub async fn writes(&self) -> u64 {
        self.state.lock().await.writes
    }

    /// Number of stored objects of a kind
    pub async fn count(&self, kind: &ResourceKind) -> usize {
        let prefix = format!("{}/{}", kind.api_version(), kind.kind);
        self.state
            .lock()
            .await
            .objects
            .keys()
            .filter(|(k, _, _)| *k == prefix)
            .count()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject> {
        let state = self.state.lock().await;
        state
            .objects
            .get(&store_key(key))
            .cloned()
            .ok_or_else(|| Error::not_found(key.kind.kind.clone(), key.name.clone()))
    }

    async fn create(&self, kind: &ResourceKind, obj: &DynamicObject) -> Result<DynamicObject> {
        let key = object_key(kind, obj)?;
        let mut state = self.state.lock().await;
        let skey = store_key(&key);
        if state.objects.contains_key(&skey) {
            return Err(Error::AlreadyExists {
                kind: kind.kind.clone(),
                name: key.name,
            });
        }

        let mut stored = obj.clone();
        stored.types = Some(TypeMeta {
            api_version: kind.api_version(),
            kind: kind.kind.clone(),
        });
        stored.metadata.namespace = key.namespace.clone();
        stored.metadata.resource_version = Some(state.bump());
        stored.metadata.deletion_timestamp = None;
        stored.metadata.creation_timestamp = Some(Time(Utc::now()));
        if stored.metadata.uid.is_none() {
            stored.metadata.uid = Some(format!("uid-{}", state.next_version));
        }

        debug!("store: created {}", key);
        state.objects.insert(skey, stored.clone());
        state.writes += 1;
        Ok(stored)
    }

    async fn update(&self, kind: &ResourceKind, obj: &DynamicObject) -> Result<DynamicObject> {
        let key = object_key(kind, obj)?;
        let mut state = self.state.lock().await;
        let skey = store_key(&key);
        let existing = state
            .objects
            .get(&skey)
            .cloned()
            .ok_or_else(|| Error::not_found(kind.kind.clone(), key.name.clone()))?;
        check_version(&key, &existing, obj)?;

        let mut stored = obj.clone();
        stored.types = existing.types.clone();
        stored.metadata.namespace = existing.metadata.namespace.clone();
        stored.metadata.uid = existing.metadata.uid.clone();
        stored.metadata.creation_timestamp = existing.metadata.creation_timestamp.clone();
        stored.metadata.deletion_timestamp = existing.metadata.deletion_timestamp.clone();
        set_status(&mut stored, status_of(&existing));
        stored.metadata.resource_version = Some(state.bump());
        state.writes += 1;

        let finalized = stored.metadata.deletion_timestamp.is_some()
            && stored
                .metadata
                .finalizers
                .as_ref()
                .map_or(true, |f| f.is_empty());
        if finalized {
            debug!("store: last finalizer removed, dropping {}", key);
            state.objects.remove(&skey);
        } else {
            debug!("store: updated {}", key);
            state.objects.insert(skey, stored.clone());
        }
        Ok(stored)
    }

    async fn update_status(
        &self,
        kind: &ResourceKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject> {
        let key = object_key(kind, obj)?;
        let mut state = self.state.lock().await;
        let skey = store_key(&key);
        let mut stored = state
            .objects
            .get(&skey)
            .cloned()
            .ok_or_else(|| Error::not_found(kind.kind.clone(), key.name.clone()))?;
        check_version(&key, &stored, obj)?;

        set_status(&mut stored, status_of(obj));
        stored.metadata.resource_version = Some(state.bump());
        state.writes += 1;

        debug!("store: updated status of {}", key);
        state.objects.insert(skey, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let mut state = self.state.lock().await;
        let skey = store_key(key);
        let mut stored = state
            .objects
            .get(&skey)
            .cloned()
            .ok_or_else(|| Error::not_found(key.kind.kind.clone(), key.name.clone()))?;

        let has_finalizers = stored
            .metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| !f.is_empty());
        if has_finalizers {
            if stored.metadata.deletion_timestamp.is_none() {
                stored.metadata.deletion_timestamp = Some(Time(Utc::now()));
                stored.metadata.resource_version = Some(state.bump());
                state.objects.insert(skey, stored);
                state.writes += 1;
            }
            debug!("store: deletion of {} deferred by finalizers", key);
        } else {
            state.objects.remove(&skey);
            state.writes += 1;
            debug!("store: deleted {}", key);
        }
        Ok(())
    }

    async fn list(&self, kind: &ResourceKind, selector: &ListSelector) -> Result<Vec<DynamicObject>> {
        let prefix = format!("{}/{}", kind.api_version(), kind.kind);
        let state = self.state.lock().await;
        Ok(state
            .objects
            .iter()
            .filter(|((k, _, _), obj)| *k == prefix && selector.matches(&obj.metadata))
            .map(|(_, obj)| obj.clone())
            .collect())
    }
}
