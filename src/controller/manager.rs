//! Per-kind plugin describing a managed resource to the reconciler

use std::fmt::Debug;

use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::owned::OwnedResource;
use super::store::{ResourceKind, Scoped};
use crate::crd::Status;
use crate::error::Result;

/// Bounds a managed resource type has to meet
pub trait ManagedResource:
    Resource<DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    fn managed_kind() -> ResourceKind;
}

impl<K> ManagedResource for K
where
    K: Resource<DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
    K::Scope: Scoped,
{
    fn managed_kind() -> ResourceKind {
        ResourceKind::of::<K>()
    }
}

/// Everything the reconciler needs to know about one managed kind
pub trait CrManager: Send + Sync + 'static {
    type Resource: ManagedResource;

    /// Whether the resource is still in its initial creation
    fn is_creating(&self, resource: &Self::Resource) -> Result<bool>;

    /// An empty instance, used as the target when loading from the store
    fn new_empty(&self) -> Self::Resource;

    /// The generic status block, if the resource carries one yet
    fn status<'a>(&self, resource: &'a Self::Resource) -> Option<&'a Status>;

    /// Mutable view of the generic status block, created on demand
    fn status_mut<'a>(&self, resource: &'a mut Self::Resource) -> &'a mut Status;

    /// Desired owned resources for the resource as it is now
    fn all_resources(&self, resource: &Self::Resource) -> Result<Vec<OwnedResource>>;

    /// Kinds that may hold resources owned by a managed resource, including
    /// ones no longer desired
    fn dependent_resource_kinds(&self) -> Vec<ResourceKind>;

    fn resource_kind(&self) -> ResourceKind {
        <Self::Resource as ManagedResource>::managed_kind()
    }
}
