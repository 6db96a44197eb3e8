//! Trigger layer: a kube-rs controller driving the [`Reconciler`]
//!
//! Watches the managed kind and every dependent kind, and hands each event to
//! [`Reconciler::reconcile_in`]. Requeue timing and retries live here only.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use kube::core::DynamicObject;
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    ResourceExt,
};
use tracing::{error, info};

use super::callbacks::{CallbackDispatcher, CallbackRegistry};
use super::manager::CrManager;
use super::reconciler::Reconciler;
use super::store::{ListSelector, ObjectKey, ResourceKind, Store};
use crate::error::{Error, Result};

/// Shared state for the controller
pub struct ControllerState<M, D = CallbackRegistry<<M as CrManager>::Resource>>
where
    M: CrManager,
    D: CallbackDispatcher<M::Resource>,
{
    pub client: Client,
    pub reconciler: Arc<Reconciler<M, D>>,
    /// Version of the running operator, the target for every pass
    pub operator_version: String,
}

/// Main entry point to start the controller
pub async fn run_controller<M, D>(state: Arc<ControllerState<M, D>>) -> Result<()>
where
    M: CrManager,
    D: CallbackDispatcher<M::Resource> + 'static,
{
    let client = state.client.clone();
    let manager = state.reconciler.manager();
    let kind = manager.resource_kind();
    let managed: Api<M::Resource> = Api::all(client.clone());

    info!("Starting {} controller at version {}", kind.kind, state.operator_version);

    // Verify CRD exists
    match managed.list(&Default::default()).await {
        Ok(_) => info!("{} CRD is available", kind.kind),
        Err(e) => {
            error!(
                "{} CRD not found. Please install the CRD first: {:?}",
                kind.kind, e
            );
            return Err(Error::ConfigError(format!("{} CRD not installed", kind.kind)));
        }
    }

    let mut controller = Controller::new(managed, Config::default());
    for dependent in manager.dependent_resource_kinds() {
        let ar = dependent.api_resource();
        controller = controller.owns_with(
            Api::<DynamicObject>::all_with(client.clone(), &ar),
            ar,
            Config::default(),
        );
    }

    controller
        .shutdown_on_signal()
        .run(reconcile::<M, D>, error_policy::<M, D>, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => info!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

async fn reconcile<M, D>(
    obj: Arc<M::Resource>,
    ctx: Arc<ControllerState<M, D>>,
) -> Result<Action>
where
    M: CrManager,
    D: CallbackDispatcher<M::Resource>,
{
    let namespace = obj.namespace();
    let result = ctx
        .reconciler
        .reconcile_in(namespace.as_deref(), &obj.name_any(), &ctx.operator_version)
        .await?;
    Ok(result.into())
}

/// Error policy determines how to handle reconciliation errors
fn error_policy<M, D>(obj: Arc<M::Resource>, error: &Error, _ctx: Arc<ControllerState<M, D>>) -> Action
where
    M: CrManager,
    D: CallbackDispatcher<M::Resource>,
{
    error!("Reconciliation error for {}: {:?}", obj.name_any(), error);
    Action::requeue(retry_delay(error))
}

/// Shorter retry for retriable errors
pub fn retry_delay(error: &Error) -> Duration {
    if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    }
}

/// Store for `--dry-run`: the managed kind is read and written on the cluster,
/// every other kind only in `owned`
pub struct DryRunStore {
    managed: ResourceKind,
    cluster: Arc<dyn Store>,
    owned: Arc<dyn Store>,
}

impl DryRunStore {
    pub fn new(managed: ResourceKind, cluster: Arc<dyn Store>, owned: Arc<dyn Store>) -> Self {
        Self {
            managed,
            cluster,
            owned,
        }
    }

    fn route(&self, kind: &ResourceKind) -> &dyn Store {
        if *kind == self.managed {
            &*self.cluster
        } else {
            &*self.owned
        }
    }
}

#[async_trait]
impl Store for DryRunStore {
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject> {
        self.route(&key.kind).get(key).await
    }

    async fn create(&self, kind: &ResourceKind, obj: &DynamicObject) -> Result<DynamicObject> {
        self.route(kind).create(kind, obj).await
    }

    async fn update(&self, kind: &ResourceKind, obj: &DynamicObject) -> Result<DynamicObject> {
        self.route(kind).update(kind, obj).await
    }

    async fn update_status(
        &self,
        kind: &ResourceKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject> {
        self.route(kind).update_status(kind, obj).await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        self.route(&key.kind).delete(key).await
    }

    async fn list(&self, kind: &ResourceKind, selector: &ListSelector) -> Result<Vec<DynamicObject>> {
        self.route(kind).list(kind, selector).await
    }
}
