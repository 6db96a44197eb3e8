//! Owned-resource kinds the convergence engine knows how to reconcile
//!
//! [`OwnedKind`] is implemented once per concrete Kubernetes type and states
//! which fields the operator manages and how readiness is read. The engine
//! never looks at concrete types: it works on [`OwnedResource`], a tagged
//! variant over every supported kind that dispatches to the trait.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use kube::core::{DynamicObject, TypeMeta};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::labels::set_controller_reference;
use super::store::{from_dynamic, to_dynamic, ObjectKey, ResourceKind};
use crate::error::{Error, Result};

/// Observed readiness of a readiness-bearing owned resource
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady(String),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

/// Per-kind capabilities used by the convergence engine
pub trait OwnedKind:
    Resource<DynamicType = ()>
    + Clone
    + fmt::Debug
    + PartialEq
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    fn resource_kind() -> ResourceKind;

    /// Overwrite the fields the operator manages on `live` with the values
    /// from `desired`. Server-assigned fields are left alone. `previous` is the
    /// description applied last time, if known.
    fn merge_managed(desired: &Self, previous: Option<&Self>, live: &mut Self) -> Result<()>;

    /// Whether `live` diverges from `desired` in any managed field
    fn differs(desired: &Self, live: &Self) -> Result<bool> {
        let mut merged = live.clone();
        Self::merge_managed(desired, None, &mut merged)?;
        Ok(merged != *live)
    }

    /// Readiness read from a live object; `None` for kinds without readiness
    fn readiness(_live: &Self) -> Option<Readiness> {
        None
    }
}

impl OwnedKind for Deployment {
    fn resource_kind() -> ResourceKind {
        ResourceKind::of::<Self>()
    }

    fn merge_managed(desired: &Self, previous: Option<&Self>, live: &mut Self) -> Result<()> {
        live.spec = overlay(&desired.spec, previous.map(|p| &p.spec), &live.spec)?;
        Ok(())
    }

    fn readiness(live: &Self) -> Option<Readiness> {
        let desired = live.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let status = live.status.clone().unwrap_or_default();
        let replicas = status.replicas.unwrap_or(0);
        let ready = status.ready_replicas.unwrap_or(0);

        if desired == replicas && ready == replicas {
            Some(Readiness::Ready)
        } else {
            Some(Readiness::NotReady(format!(
                "Deployment {} has {}/{} ready replicas",
                live.metadata.name.as_deref().unwrap_or_default(),
                ready,
                desired
            )))
        }
    }
}

impl OwnedKind for Service {
    fn resource_kind() -> ResourceKind {
        ResourceKind::of::<Self>()
    }

    // clusterIP, nodePort and the port defaults are filled in by the API server
    fn merge_managed(desired: &Self, previous: Option<&Self>, live: &mut Self) -> Result<()> {
        live.spec = overlay(&desired.spec, previous.map(|p| &p.spec), &live.spec)?;
        Ok(())
    }
}

impl OwnedKind for ServiceAccount {
    fn resource_kind() -> ResourceKind {
        ResourceKind::of::<Self>()
    }

    fn merge_managed(desired: &Self, _previous: Option<&Self>, live: &mut Self) -> Result<()> {
        if desired.automount_service_account_token.is_some() {
            live.automount_service_account_token = desired.automount_service_account_token;
        }
        if desired.image_pull_secrets.is_some() {
            live.image_pull_secrets = desired.image_pull_secrets.clone();
        }
        Ok(())
    }
}

impl OwnedKind for ConfigMap {
    fn resource_kind() -> ResourceKind {
        ResourceKind::of::<Self>()
    }

    fn merge_managed(desired: &Self, _previous: Option<&Self>, live: &mut Self) -> Result<()> {
        live.data = desired.data.clone();
        live.binary_data = desired.binary_data.clone();
        Ok(())
    }
}

impl OwnedKind for Secret {
    fn resource_kind() -> ResourceKind {
        ResourceKind::of::<Self>()
    }

    fn merge_managed(desired: &Self, _previous: Option<&Self>, live: &mut Self) -> Result<()> {
        // stringData is write-only; the server folds it into data
        let mut data = desired.data.clone().unwrap_or_default();
        for (k, v) in desired.string_data.iter().flatten() {
            data.insert(k.clone(), ByteString(v.clone().into_bytes()));
        }
        live.data = if data.is_empty() && desired.data.is_none() {
            None
        } else {
            Some(data)
        };
        live.string_data = None;
        if desired.type_.is_some() {
            live.type_ = desired.type_.clone();
        }
        Ok(())
    }
}

impl OwnedKind for Role {
    fn resource_kind() -> ResourceKind {
        ResourceKind::of::<Self>()
    }

    fn merge_managed(desired: &Self, _previous: Option<&Self>, live: &mut Self) -> Result<()> {
        live.rules = desired.rules.clone();
        Ok(())
    }
}

impl OwnedKind for ClusterRole {
    fn resource_kind() -> ResourceKind {
        ResourceKind::of::<Self>()
    }

    fn merge_managed(desired: &Self, _previous: Option<&Self>, live: &mut Self) -> Result<()> {
        live.aggregation_rule = desired.aggregation_rule.clone();
        // rules of an aggregated role are filled in by the aggregation controller
        if desired.aggregation_rule.is_none() {
            live.rules = desired.rules.clone();
        }
        Ok(())
    }
}

impl OwnedKind for RoleBinding {
    fn resource_kind() -> ResourceKind {
        ResourceKind::of::<Self>()
    }

    fn merge_managed(desired: &Self, _previous: Option<&Self>, live: &mut Self) -> Result<()> {
        live.role_ref = desired.role_ref.clone();
        live.subjects = desired.subjects.clone();
        Ok(())
    }
}

impl OwnedKind for ClusterRoleBinding {
    fn resource_kind() -> ResourceKind {
        ResourceKind::of::<Self>()
    }

    fn merge_managed(desired: &Self, _previous: Option<&Self>, live: &mut Self) -> Result<()> {
        live.role_ref = desired.role_ref.clone();
        live.subjects = desired.subjects.clone();
        Ok(())
    }
}

impl OwnedKind for CustomResourceDefinition {
    fn resource_kind() -> ResourceKind {
        ResourceKind::of::<Self>()
    }

    // spec.conversion is defaulted by the API server
    fn merge_managed(desired: &Self, previous: Option<&Self>, live: &mut Self) -> Result<()> {
        live.spec = overlay(&desired.spec, previous.map(|p| &p.spec), &live.spec)?;
        Ok(())
    }
}

/// Lay the fields `desired` sets over `live`
///
/// Fields only `live` has are kept, so values defaulted by the API server do
/// not count as drift. Fields set in `previous` that `desired` no longer sets
/// are removed.
pub fn overlay<T: Serialize + DeserializeOwned>(
    desired: &T,
    previous: Option<&T>,
    live: &T,
) -> Result<T> {
    let desired = serde_json::to_value(desired)?;
    let previous = previous.map(serde_json::to_value).transpose()?;
    let mut merged = serde_json::to_value(live)?;
    overlay_value(&desired, previous.as_ref(), &mut merged);
    Ok(serde_json::from_value(merged)?)
}

fn overlay_value(desired: &Value, previous: Option<&Value>, live: &mut Value) {
    match (desired, live) {
        (Value::Object(want), Value::Object(have)) => {
            if let Some(Value::Object(applied)) = previous {
                for key in applied.keys().filter(|k| !want.contains_key(*k)) {
                    have.remove(key);
                }
            }
            for (key, value) in want {
                let applied = previous.and_then(|p| p.get(key));
                match have.get_mut(key) {
                    Some(slot) => overlay_value(value, applied, slot),
                    None => {
                        have.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        // element by element while the list keeps its shape
        (Value::Array(want), Value::Array(have)) if want.len() == have.len() => {
            for (i, (value, slot)) in want.iter().zip(have.iter_mut()).enumerate() {
                overlay_value(value, previous.and_then(|p| p.get(i)), slot);
            }
        }
        (desired, live) => *live = desired.clone(),
    }
}

/// Merge labels and annotations: desired keys win, keys the operator applied
/// previously but no longer wants are dropped, everything else is kept
fn merge_metadata(desired: &ObjectMeta, previous: Option<&ObjectMeta>, live: &mut ObjectMeta) {
    merge_string_map(
        desired.labels.as_ref(),
        previous.and_then(|p| p.labels.as_ref()),
        &mut live.labels,
    );
    merge_string_map(
        desired.annotations.as_ref(),
        previous.and_then(|p| p.annotations.as_ref()),
        &mut live.annotations,
    );
}

fn merge_string_map(
    desired: Option<&BTreeMap<String, String>>,
    previous: Option<&BTreeMap<String, String>>,
    live: &mut Option<BTreeMap<String, String>>,
) {
    if let (Some(previous), Some(current)) = (previous, live.as_mut()) {
        for key in previous.keys() {
            if !desired.is_some_and(|d| d.contains_key(key)) {
                current.remove(key);
            }
        }
    }
    if let Some(desired) = desired.filter(|d| !d.is_empty()) {
        let current = live.get_or_insert_with(Default::default);
        for (k, v) in desired {
            current.insert(k.clone(), v.clone());
        }
    }
}

/// Typed merge of `desired` onto `live`; `Some` only when something changed
fn merge_typed<T: OwnedKind>(
    desired: &T,
    live: &DynamicObject,
    previous: Option<&DynamicObject>,
    owner: &OwnerReference,
) -> Result<Option<DynamicObject>> {
    let current: T = from_dynamic(live)?;
    // an unreadable record only loses the removal of dropped fields
    let applied: Option<T> = previous.and_then(|p| from_dynamic(p).ok());
    let mut merged = current.clone();
    merge_metadata(
        desired.meta(),
        previous.map(|p| &p.metadata),
        merged.meta_mut(),
    );
    set_controller_reference(merged.meta_mut(), owner.clone());
    T::merge_managed(desired, applied.as_ref(), &mut merged)?;

    if merged == current {
        return Ok(None);
    }
    let mut out = to_dynamic(&merged)?;
    // keep the optimistic-concurrency token of the object we read
    out.metadata.resource_version = live.metadata.resource_version.clone();
    Ok(Some(out))
}

fn readiness_typed<T: OwnedKind>(live: &DynamicObject) -> Result<Option<Readiness>> {
    let current: T = from_dynamic(live)?;
    Ok(T::readiness(&current))
}

/// A desired owned resource, tagged by kind
#[derive(Clone, Debug)]
pub enum OwnedResource {
    Deployment(Deployment),
    Service(Service),
    ServiceAccount(ServiceAccount),
    ConfigMap(ConfigMap),
    Secret(Secret),
    Role(Role),
    RoleBinding(RoleBinding),
    ClusterRole(ClusterRole),
    ClusterRoleBinding(ClusterRoleBinding),
    CustomResourceDefinition(CustomResourceDefinition),
    /// Any other kind; every top-level field but metadata and status is managed
    Dynamic {
        kind: ResourceKind,
        object: DynamicObject,
    },
}

macro_rules! dispatch {
    ($self:expr, $r:ident => $typed:expr, ($kind:ident, $object:ident) => $dynamic:expr) => {
        match $self {
            OwnedResource::Deployment($r) => $typed,
            OwnedResource::Service($r) => $typed,
            OwnedResource::ServiceAccount($r) => $typed,
            OwnedResource::ConfigMap($r) => $typed,
            OwnedResource::Secret($r) => $typed,
            OwnedResource::Role($r) => $typed,
            OwnedResource::RoleBinding($r) => $typed,
            OwnedResource::ClusterRole($r) => $typed,
            OwnedResource::ClusterRoleBinding($r) => $typed,
            OwnedResource::CustomResourceDefinition($r) => $typed,
            OwnedResource::Dynamic {
                kind: $kind,
                object: $object,
            } => $dynamic,
        }
    };
}

macro_rules! impl_from_owned {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for OwnedResource {
                fn from(r: $variant) -> Self {
                    OwnedResource::$variant(r)
                }
            }
        )*
    };
}

impl_from_owned!(
    Deployment,
    Service,
    ServiceAccount,
    ConfigMap,
    Secret,
    Role,
    RoleBinding,
    ClusterRole,
    ClusterRoleBinding,
    CustomResourceDefinition,
);

fn kind_of<T: OwnedKind>(_: &T) -> ResourceKind {
    T::resource_kind()
}

impl OwnedResource {
    /// Wrap an object of a kind outside the built-in set
    pub fn dynamic(kind: ResourceKind, object: DynamicObject) -> Self {
        OwnedResource::Dynamic { kind, object }
    }

    pub fn kind(&self) -> ResourceKind {
        dispatch!(self, r => kind_of(r), (kind, _object) => kind.clone())
    }

    pub fn meta(&self) -> &ObjectMeta {
        dispatch!(self, r => r.meta(), (_kind, object) => &object.metadata)
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        dispatch!(self, r => r.meta_mut(), (_kind, object) => &mut object.metadata)
    }

    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.kind(), self.meta().namespace.clone(), self.name())
    }

    /// Only Deployments report readiness
    pub fn is_readiness_bearing(&self) -> bool {
        matches!(self, OwnedResource::Deployment(_))
    }

    /// Untyped form with type metadata filled in
    pub fn to_dynamic(&self) -> Result<DynamicObject> {
        let mut obj = dispatch!(self, r => to_dynamic(r)?, (_kind, object) => object.clone());
        let kind = self.kind();
        obj.types = Some(TypeMeta {
            api_version: kind.api_version(),
            kind: kind.kind,
        });
        Ok(obj)
    }

    /// Merge this desired description onto `live`
    ///
    /// Returns the object to write back, or `None` when `live` already
    /// matches in every managed field. `previous` is the description last
    /// applied to `live`, used to drop fields, labels and annotations no
    /// longer wanted.
    pub fn merge_onto(
        &self,
        live: &DynamicObject,
        previous: Option<&DynamicObject>,
        owner: &OwnerReference,
    ) -> Result<Option<DynamicObject>> {
        dispatch!(
            self,
            r => merge_typed(r, live, previous, owner),
            (kind, object) => merge_dynamic(kind, object, live, previous, owner)
        )
    }

    /// Readiness of the live counterpart of this resource
    pub fn readiness(&self, live: &DynamicObject) -> Result<Option<Readiness>> {
        match self {
            OwnedResource::Deployment(_) => readiness_typed::<Deployment>(live),
            _ => Ok(None),
        }
    }
}

fn merge_dynamic(
    kind: &ResourceKind,
    desired: &DynamicObject,
    live: &DynamicObject,
    previous: Option<&DynamicObject>,
    owner: &OwnerReference,
) -> Result<Option<DynamicObject>> {
    if !kind.matches(live) {
        return Err(Error::MalformedResource(format!(
            "{} {} is not a {}",
            live.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("object"),
            live.metadata.name.as_deref().unwrap_or_default(),
            kind
        )));
    }

    let mut merged = live.clone();
    merge_metadata(
        &desired.metadata,
        previous.map(|p| &p.metadata),
        &mut merged.metadata,
    );
    set_controller_reference(&mut merged.metadata, owner.clone());

    if let (Some(fields), Some(target)) = (desired.data.as_object(), merged.data.as_object_mut()) {
        let applied = previous.map(|p| &p.data);
        for (k, v) in fields.iter().filter(|(k, _)| k.as_str() != "status") {
            let applied = applied.and_then(|a| a.get(k));
            match target.get_mut(k) {
                Some(slot) => overlay_value(v, applied, slot),
                None => {
                    target.insert(k.clone(), v.clone());
                }
            }
        }
    }

    if merged.metadata == live.metadata && merged.data == live.data {
        Ok(None)
    } else {
        Ok(Some(merged))
    }
}
