//! [`Store`] backed by a live Kubernetes API server

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::core::DynamicObject;
use kube::Client;
use tracing::{debug, instrument};

use super::store::{ListSelector, ObjectKey, ResourceKind, Store};
use crate::error::{Error, Result};

/// Store that reads and writes through the cluster API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: &ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = kind.api_resource();
        match namespace {
            Some(ns) if kind.namespaced => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }

    fn api_for(&self, kind: &ResourceKind, obj: &DynamicObject) -> Api<DynamicObject> {
        self.api(kind, obj.metadata.namespace.as_deref())
    }
}

fn object_name(kind: &ResourceKind, obj: &DynamicObject) -> Result<String> {
    obj.metadata
        .name
        .clone()
        .ok_or_else(|| Error::StoreError(format!("{} object has no name", kind.kind)))
}

/// Translate API status codes into the error kinds the reconciler branches on
fn map_error(err: kube::Error, kind: &ResourceKind, name: &str, on_conflict: Conflict) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => Error::not_found(kind.kind.clone(), name),
        kube::Error::Api(ae) if ae.code == 409 => match on_conflict {
            Conflict::Exists => Error::AlreadyExists {
                kind: kind.kind.clone(),
                name: name.to_string(),
            },
            Conflict::Stale => Error::conflict(kind.kind.clone(), name),
        },
        other => Error::KubeError(other),
    }
}

#[derive(Clone, Copy)]
enum Conflict {
    Exists,
    Stale,
}

#[async_trait]
impl Store for KubeStore {
    #[instrument(skip(self, key), fields(object = %key))]
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject> {
        self.api(&key.kind, key.namespace.as_deref())
            .get(&key.name)
            .await
            .map_err(|e| map_error(e, &key.kind, &key.name, Conflict::Stale))
    }

    async fn create(&self, kind: &ResourceKind, obj: &DynamicObject) -> Result<DynamicObject> {
        let name = object_name(kind, obj)?;
        debug!("Creating {} {}", kind.kind, name);
        self.api_for(kind, obj)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| map_error(e, kind, &name, Conflict::Exists))
    }

    async fn update(&self, kind: &ResourceKind, obj: &DynamicObject) -> Result<DynamicObject> {
        let name = object_name(kind, obj)?;
        debug!("Replacing {} {}", kind.kind, name);
        self.api_for(kind, obj)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| map_error(e, kind, &name, Conflict::Stale))
    }

    async fn update_status(
        &self,
        kind: &ResourceKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject> {
        let name = object_name(kind, obj)?;
        debug!("Replacing status of {} {}", kind.kind, name);
        let body = serde_json::to_vec(obj)?;
        self.api_for(kind, obj)
            .replace_status(&name, &PostParams::default(), body)
            .await
            .map_err(|e| map_error(e, kind, &name, Conflict::Stale))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        debug!("Deleting {}", key);
        self.api(&key.kind, key.namespace.as_deref())
            .delete(&key.name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| map_error(e, &key.kind, &key.name, Conflict::Stale))
    }

    async fn list(&self, kind: &ResourceKind, selector: &ListSelector) -> Result<Vec<DynamicObject>> {
        let mut params = ListParams::default();
        if let Some(labels) = selector.label_selector() {
            params = params.labels(&labels);
        }
        let list = self
            .api(kind, selector.namespace.as_deref())
            .list(&params)
            .await
            .map_err(Error::KubeError)?;
        Ok(list.items)
    }
}
