//! Resource convergence engine
//!
//! Brings the owned resources of one managed resource in line with its
//! desired set: creates what is missing, restores what drifted, sweeps what
//! an earlier version left behind, and tears everything down on deletion.
//! Every mutation is wrapped in the dispatcher's pre/post callbacks. The first
//! failing store call aborts the pass; a later pass picks up from wherever this
//! one stopped.

use std::collections::BTreeSet;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::DynamicObject;
use tracing::{debug, info};

use super::callbacks::{CallbackArgs, CallbackDispatcher, ReconcileState};
use super::labels::{
    is_controlled_by, owner_reference, set_controller_reference, OwnedRecord, VersionLabels,
    OWNER_UID_LABEL,
};
use super::manager::ManagedResource;
use super::owned::OwnedResource;
use super::store::{get_opt, ListSelector, ObjectKey, ResourceKind, Store};
use crate::error::Result;

/// What a convergence pass did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConvergeReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl ConvergeReport {
    pub fn writes(&self) -> usize {
        self.created + self.updated
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Created,
    Updated,
    Unchanged,
}

/// Result of tearing down the owned resources
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Teardown {
    /// Objects a delete was issued for in this pass
    pub deleted: usize,
    /// Objects still present after the deletes
    pub remaining: usize,
}

impl Teardown {
    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}

/// Convergence of the owned resources of a single managed resource
pub struct Converger<'a, K, D>
where
    K: ManagedResource,
    D: CallbackDispatcher<K> + ?Sized,
{
    store: &'a dyn Store,
    dispatcher: &'a D,
    labels: &'a VersionLabels,
    owner: &'a K,
    owner_ref: OwnerReference,
}

impl<'a, K, D> Converger<'a, K, D>
where
    K: ManagedResource,
    D: CallbackDispatcher<K> + ?Sized,
{
    /// Fails when `owner` has not been persisted yet and so has no UID
    pub fn new(
        store: &'a dyn Store,
        dispatcher: &'a D,
        labels: &'a VersionLabels,
        owner: &'a K,
    ) -> Result<Self> {
        Ok(Self {
            store,
            dispatcher,
            labels,
            owner,
            owner_ref: owner_reference(owner)?,
        })
    }

    async fn notify(
        &self,
        state: ReconcileState,
        kind: &ResourceKind,
        desired: Option<&DynamicObject>,
        current: Option<&DynamicObject>,
    ) -> Result<()> {
        let args = CallbackArgs {
            state,
            kind,
            resource: self.owner,
            desired,
            current,
            store: self.store,
        };
        self.dispatcher.invoke(&args).await
    }

    /// Create or restore every desired resource, stamping new ones with `version`
    pub async fn converge(&self, desired: &[OwnedResource], version: &str) -> Result<ConvergeReport> {
        let mut report = ConvergeReport::default();
        for resource in desired {
            match self.apply(resource, version).await? {
                Outcome::Created => report.created += 1,
                Outcome::Updated => report.updated += 1,
                Outcome::Unchanged => report.unchanged += 1,
            }
        }
        Ok(report)
    }

    async fn apply(&self, resource: &OwnedResource, version: &str) -> Result<Outcome> {
        let kind = resource.kind();
        let key = resource.key();
        let desired = resource.to_dynamic()?;
        let applied = serde_json::to_string(&desired)?;

        let Some(live) = get_opt(self.store, &key).await? else {
            let mut obj = desired.clone();
            self.labels.stamp_created(&mut obj.metadata, version);
            self.labels.set_last_applied(&mut obj.metadata, applied);
            set_controller_reference(&mut obj.metadata, self.owner_ref.clone());

            self.notify(ReconcileState::PreCreate, &kind, Some(&obj), None)
                .await?;
            let created = self.store.create(&kind, &obj).await?;
            info!("Created {} at version {}", key, version);
            #[cfg(feature = "metrics")]
            super::metrics::inc_owned_write("create", &kind.kind);
            self.notify(ReconcileState::PostCreate, &kind, Some(&obj), Some(&created))
                .await?;
            return Ok(Outcome::Created);
        };

        let previous = self.labels.last_applied(&live.metadata);
        let applied_changed = previous != Some(applied.as_str());
        let previous: Option<DynamicObject> =
            previous.and_then(|text| serde_json::from_str(text).ok());

        let merged = resource.merge_onto(&live, previous.as_ref(), &self.owner_ref)?;
        if merged.is_none() && !applied_changed {
            debug!("{} unchanged", key);
            return Ok(Outcome::Unchanged);
        }

        let mut obj = merged.unwrap_or_else(|| live.clone());
        self.labels.stamp_updated(&mut obj.metadata, version);
        self.labels.set_last_applied(&mut obj.metadata, applied);

        self.notify(ReconcileState::PreUpdate, &kind, Some(&desired), Some(&live))
            .await?;
        let updated = self.store.update(&kind, &obj).await?;
        info!("Updated {} at version {}", key, version);
        #[cfg(feature = "metrics")]
        super::metrics::inc_owned_write("update", &kind.kind);
        self.notify(ReconcileState::PostUpdate, &kind, Some(&desired), Some(&updated))
            .await?;
        Ok(Outcome::Updated)
    }

    /// Stored objects of `kinds` carrying a controller reference to the owner
    pub async fn owned_records(&self, kinds: &[ResourceKind]) -> Result<Vec<OwnedRecord>> {
        let owner_uid = self.owner_ref.uid.as_str();
        let selector = ListSelector::all().with_label(OWNER_UID_LABEL, owner_uid);
        let mut records = Vec::new();
        for kind in kinds {
            let objects = self.store.list(kind, &selector).await?;
            records.extend(
                objects
                    .into_iter()
                    .filter(|obj| is_controlled_by(&obj.metadata, owner_uid))
                    .map(|obj| OwnedRecord::new(ObjectKey::for_object(kind, &obj), obj, self.labels)),
            );
        }
        Ok(records)
    }

    /// Delete owned objects that are no longer desired and were created at a
    /// version other than `target`
    pub async fn sweep(
        &self,
        desired: &[OwnedResource],
        kinds: &[ResourceKind],
        target: &str,
    ) -> Result<usize> {
        let wanted: BTreeSet<ObjectKey> = desired.iter().map(OwnedResource::key).collect();
        let mut removed = 0;

        for record in self.owned_records(kinds).await? {
            if wanted.contains(&record.key) || record.object.metadata.deletion_timestamp.is_some() {
                continue;
            }
            if !record.is_stale(target) {
                debug!("Keeping undesired {} created at the current version", record.key);
                continue;
            }
            info!(
                "Removing orphaned {} created at {}",
                record.key,
                record
                    .creation_version
                    .as_ref()
                    .map(|v| v.as_str())
                    .unwrap_or("unknown version")
            );
            self.delete_object(&record.key, &record.object).await?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Delete every desired and every owned object, then count what is left
    pub async fn teardown(
        &self,
        desired: &[OwnedResource],
        kinds: &[ResourceKind],
    ) -> Result<Teardown> {
        let mut keys: BTreeSet<ObjectKey> = desired.iter().map(OwnedResource::key).collect();
        keys.extend(self.owned_records(kinds).await?.into_iter().map(|r| r.key));

        let mut teardown = Teardown::default();
        for key in &keys {
            let Some(current) = get_opt(self.store, key).await? else {
                continue;
            };
            if current.metadata.deletion_timestamp.is_none() {
                self.delete_object(key, &current).await?;
                teardown.deleted += 1;
            }
        }

        for key in &keys {
            if get_opt(self.store, key).await?.is_some() {
                debug!("{} still present", key);
                teardown.remaining += 1;
            }
        }
        Ok(teardown)
    }

    async fn delete_object(&self, key: &ObjectKey, current: &DynamicObject) -> Result<()> {
        self.notify(ReconcileState::PreDelete, &key.kind, None, Some(current))
            .await?;
        match self.store.delete(key).await {
            Ok(()) => info!("Deleted {}", key),
            Err(e) if e.is_not_found() => debug!("{} already gone", key),
            Err(e) => return Err(e),
        }
        #[cfg(feature = "metrics")]
        super::metrics::inc_owned_write("delete", &key.kind.kind);
        self.notify(ReconcileState::PostDelete, &key.kind, None, Some(current))
            .await
    }
}
