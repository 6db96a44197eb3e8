//! Phase state machine driving a managed resource through its lifecycle
//!
//! Each call to [`Reconciler::reconcile`] re-reads the managed resource, works
//! out where it stands from its persisted status plus the live owned resources,
//! converges the owned resources and writes back whatever changed. Nothing is
//! carried over between calls, so a pass can be abandoned at any point and the
//! next one picks up from the store.
//!
//! Phases:
//! - `Deploying`: initial rollout; becomes `Deployed` once every workload is ready
//! - `Deployed`: steady state; orphans of earlier versions are swept here
//! - `Upgrading`: the operator version moved forward; becomes `Deployed` when ready
//! - `Error`: set explicitly, left alone until an upgrade or a deletion
//! - `Deleted`: deletion requested; owned resources are torn down first

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use super::callbacks::{CallbackDispatcher, CallbackRegistry, ReconcileCallback};
use super::conditions::{set_conditions, DEPLOYING, NOT_READY, READY, UPGRADING};
use super::converge::Converger;
use super::finalizers::{
    add_finalizer, has_finalizer, is_being_deleted, remove_finalizer, DEFAULT_FINALIZER,
};
use super::labels::VersionLabels;
use super::manager::CrManager;
use super::owned::{OwnedResource, Readiness};
use super::resources::validate_kinds;
use super::store::{from_dynamic, get_opt, to_dynamic, ObjectKey, ResourceKind, Store};
use super::version::should_take_update_path;
use crate::crd::{Phase, Status};
use crate::error::Result;

/// Settings shared by every pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Finalizer placed on managed resources
    pub finalizer: String,
    /// Version labels and last-applied annotation stamped on owned resources
    pub labels: VersionLabels,
    /// Delay suggested to the caller while owned resources are still being deleted
    pub requeue_after: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            finalizer: DEFAULT_FINALIZER.to_string(),
            labels: VersionLabels::default(),
            requeue_after: Duration::from_secs(10),
        }
    }
}

/// Outcome of one pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    pub requeue: bool,
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn requeue_after(after: Duration) -> Self {
        Self {
            requeue: true,
            requeue_after: Some(after),
        }
    }
}

impl From<ReconcileResult> for Action {
    fn from(result: ReconcileResult) -> Self {
        match (result.requeue, result.requeue_after) {
            (true, Some(after)) => Action::requeue(after),
            (true, None) => Action::requeue(Duration::from_secs(1)),
            (false, _) => Action::await_change(),
        }
    }
}

/// Lifecycle reconciler for one managed kind
pub struct Reconciler<M, D = CallbackRegistry<<M as CrManager>::Resource>>
where
    M: CrManager,
    D: CallbackDispatcher<M::Resource>,
{
    manager: M,
    dispatcher: D,
    store: Arc<dyn Store>,
    config: ReconcilerConfig,
}

impl<M> Reconciler<M>
where
    M: CrManager,
{
    /// Reconciler with an empty callback registry
    pub fn with_registry(manager: M, store: Arc<dyn Store>, config: ReconcilerConfig) -> Self {
        Self::new(manager, store, CallbackRegistry::new(), config)
    }
}

impl<M, D> Reconciler<M, D>
where
    M: CrManager,
    D: CallbackDispatcher<M::Resource>,
{
    pub fn new(manager: M, store: Arc<dyn Store>, dispatcher: D, config: ReconcilerConfig) -> Self {
        Self {
            manager,
            dispatcher,
            store,
            config,
        }
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Register a callback for mutations of owned resources of `kind`
    pub fn add_callback(
        &mut self,
        kind: ResourceKind,
        callback: Arc<dyn ReconcileCallback<M::Resource>>,
    ) {
        self.dispatcher.register(kind, callback);
    }

    /// Put an uninitialized resource into `Deploying` at `version` and attach
    /// the finalizer. Only the in-memory copy changes.
    pub fn initialize(&self, resource: &mut M::Resource, version: &str) -> Result<()> {
        let status = self.manager.status_mut(resource);
        status.phase = Some(Phase::Deploying);
        status.target_version = version.to_string();
        status.operator_version = version.to_string();
        status.observed_version = String::new();
        add_finalizer(resource, &self.config.finalizer);
        Ok(())
    }

    /// Flag the resource as failed; version fields are left as they are
    pub fn set_error(&self, resource: &mut M::Resource) -> Result<()> {
        self.manager.status_mut(resource).phase = Some(Phase::Error);
        Ok(())
    }

    /// Force the resource to `Deployed` at `version`
    pub fn set_version(&self, resource: &mut M::Resource, version: &str) -> Result<()> {
        let status = self.manager.status_mut(resource);
        status.observed_version = version.to_string();
        status.target_version = version.to_string();
        status.operator_version = version.to_string();
        status.phase = Some(Phase::Deployed);
        Ok(())
    }

    /// Persist the difference between `before` and `after`
    ///
    /// Status goes first through the status subresource, then metadata. When
    /// the metadata write drops the last finalizer of a resource being deleted,
    /// the store is free to remove it right away.
    pub async fn save(
        &self,
        before: &M::Resource,
        after: &M::Resource,
    ) -> Result<M::Resource> {
        let kind = self.manager.resource_kind();
        let mut current = after.clone();

        if self.manager.status(before) != self.manager.status(after) {
            let written = self.store.update_status(&kind, &to_dynamic(after)?).await?;
            current.meta_mut().resource_version = written.metadata.resource_version;
        }
        if before.meta() != after.meta() {
            let written = self.store.update(&kind, &to_dynamic(&current)?).await?;
            current.meta_mut().resource_version = written.metadata.resource_version;
        }
        Ok(current)
    }

    /// Reconcile the cluster-scoped managed resource `name`
    pub async fn reconcile(&self, name: &str, operator_version: &str) -> Result<ReconcileResult> {
        self.reconcile_in(None, name, operator_version).await
    }

    /// Reconcile one managed resource; `namespace` is ignored for cluster-scoped kinds
    #[instrument(skip(self), fields(kind = %self.manager.resource_kind().kind))]
    pub async fn reconcile_in(
        &self,
        namespace: Option<&str>,
        name: &str,
        operator_version: &str,
    ) -> Result<ReconcileResult> {
        let started = Instant::now();
        let key = ObjectKey::new(
            self.manager.resource_kind(),
            namespace.map(str::to_string),
            name,
        );
        let result = self.reconcile_key(&key, operator_version).await;

        #[cfg(feature = "metrics")]
        {
            let controller = key.kind.kind.as_str();
            super::metrics::observe_reconcile_duration_seconds(
                controller,
                started.elapsed().as_secs_f64(),
            );
            if let Err(e) = &result {
                super::metrics::inc_reconcile_error(controller, e.metric_label());
            }
        }
        debug!("Reconcile of {} took {:?}", key, started.elapsed());
        result
    }

    async fn reconcile_key(&self, key: &ObjectKey, version: &str) -> Result<ReconcileResult> {
        let Some(live) = get_opt(&*self.store, key).await? else {
            debug!("{} no longer exists", key);
            return Ok(ReconcileResult::done());
        };
        let mut resource: M::Resource = from_dynamic(&live)?;

        if is_being_deleted(&resource) {
            if !has_finalizer(&resource, &self.config.finalizer) {
                debug!("{} is being deleted and holds no finalizer of ours", key);
                return Ok(ReconcileResult::done());
            }
            return self.finalize(resource).await;
        }

        if self
            .manager
            .status(&resource)
            .map_or(true, Status::is_uninitialized)
        {
            info!("Initializing {} at version {}", key, version);
            let before = resource.clone();
            self.initialize(&mut resource, version)?;
            resource = self.save(&before, &resource).await?;
            self.record_transition(Some(Phase::Deploying));
        }

        self.run_phase(resource, version).await
    }

    async fn run_phase(&self, mut resource: M::Resource, version: &str) -> Result<ReconcileResult> {
        let before = resource.clone();
        let name = resource.name_any();
        let status = self.manager.status(&resource).cloned().unwrap_or_default();
        let phase = status.phase;

        let deploying = phase == Some(Phase::Deploying) || self.manager.is_creating(&resource)?;
        // a downgrade error leaves the status untouched
        let upgrade = should_take_update_path(version, &status.observed_version, deploying)?;

        if !upgrade && matches!(phase, Some(Phase::Error) | Some(Phase::Deleted)) {
            debug!("{} is in phase {:?}, nothing to do", name, phase);
            return Ok(ReconcileResult::done());
        }

        {
            let status = self.manager.status_mut(&mut resource);
            if upgrade {
                if phase != Some(Phase::Upgrading) {
                    info!(
                        "Upgrading {} from {:?} to {}",
                        name, status.observed_version, version
                    );
                }
                status.phase = Some(Phase::Upgrading);
                status.target_version = version.to_string();
                status.operator_version = version.to_string();
            } else if phase == Some(Phase::Deploying) {
                status.target_version = version.to_string();
                status.operator_version = version.to_string();
            }
        }

        let target = self
            .manager
            .status(&resource)
            .map(|s| s.target_version.clone())
            .unwrap_or_default();
        let desired = self.manager.all_resources(&resource)?;
        validate_kinds(&desired)?;

        let report = Converger::new(
            &*self.store,
            &self.dispatcher,
            &self.config.labels,
            &resource,
        )?
        .converge(&desired, &target)
        .await?;
        debug!(
            "Converged {}: {} created, {} updated, {} unchanged",
            name, report.created, report.updated, report.unchanged
        );

        let readiness = self.readiness(&desired).await?;
        self.advance(&mut resource, readiness.as_ref());

        let settled = self.manager.status(&resource).and_then(|s| s.phase);
        if settled == Some(Phase::Deployed) {
            let removed = Converger::new(
                &*self.store,
                &self.dispatcher,
                &self.config.labels,
                &resource,
            )?
            .sweep(&desired, &self.manager.dependent_resource_kinds(), &target)
            .await?;
            if removed > 0 {
                info!("Removed {} orphaned resources of {}", removed, name);
            }
        }

        if settled != phase {
            info!("{} moved from {:?} to {:?}", name, phase, settled);
            self.record_transition(settled);
        }
        self.save(&before, &resource).await?;
        Ok(ReconcileResult::done())
    }

    /// Phase and condition changes that follow from owned-resource readiness
    fn advance(&self, resource: &mut M::Resource, readiness: Option<&Readiness>) {
        let ready = readiness.map_or(true, Readiness::is_ready);
        let message = match readiness {
            Some(Readiness::NotReady(reason)) => reason.clone(),
            _ => "All components are ready".to_string(),
        };

        let status = self.manager.status_mut(resource);
        let set = match (status.phase, ready) {
            (Some(Phase::Deploying), true) | (Some(Phase::Upgrading), true) => {
                status.phase = Some(Phase::Deployed);
                status.observed_version = status.target_version.clone();
                status.operator_version = status.target_version.clone();
                READY
            }
            (Some(Phase::Deploying), false) => DEPLOYING,
            (Some(Phase::Upgrading), false) => UPGRADING,
            (Some(Phase::Deployed), true) => READY,
            (Some(Phase::Deployed), false) => NOT_READY,
            _ => return,
        };
        if readiness.is_some() {
            set_conditions(&mut status.conditions, set, &message);
        }
    }

    /// Combined readiness of the readiness-bearing desired resources; `None`
    /// when there are none
    async fn readiness(&self, desired: &[OwnedResource]) -> Result<Option<Readiness>> {
        let mut seen = false;
        for resource in desired.iter().filter(|r| r.is_readiness_bearing()) {
            seen = true;
            let key = resource.key();
            let state = match get_opt(&*self.store, &key).await? {
                Some(live) => resource.readiness(&live)?,
                None => Some(Readiness::NotReady(format!("{} does not exist yet", key))),
            };
            if let Some(not_ready @ Readiness::NotReady(_)) = state {
                return Ok(Some(not_ready));
            }
        }
        Ok(seen.then_some(Readiness::Ready))
    }

    /// Deletion path: tear down owned resources, then release the finalizer
    async fn finalize(&self, mut resource: M::Resource) -> Result<ReconcileResult> {
        let before = resource.clone();
        let name = resource.name_any();
        let previous = self.manager.status(&resource).and_then(|s| s.phase);

        let desired = self.manager.all_resources(&resource)?;
        let teardown = Converger::new(
            &*self.store,
            &self.dispatcher,
            &self.config.labels,
            &resource,
        )?
        .teardown(&desired, &self.manager.dependent_resource_kinds())
        .await?;

        self.manager.status_mut(&mut resource).phase = Some(Phase::Deleted);
        if previous != Some(Phase::Deleted) {
            self.record_transition(Some(Phase::Deleted));
        }

        if !teardown.is_complete() {
            warn!(
                "{} owned resources of {} are still being deleted",
                teardown.remaining, name
            );
            self.save(&before, &resource).await?;
            return Ok(ReconcileResult::requeue_after(self.config.requeue_after));
        }

        remove_finalizer(&mut resource, &self.config.finalizer);
        self.save(&before, &resource).await?;
        info!("Owned resources of {} removed, finalizer released", name);
        Ok(ReconcileResult::done())
    }

    #[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
    fn record_transition(&self, phase: Option<Phase>) {
        #[cfg(feature = "metrics")]
        if let Some(phase) = phase {
            super::metrics::inc_phase_transition(
                &self.manager.resource_kind().kind,
                &phase.to_string(),
            );
        }
    }
}
