//! Version labels, last-applied annotation and ownership metadata
//!
//! The creation-version label is the only signal the orphan sweep uses, so it
//! is read and written exclusively through [`VersionLabels`].

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::core::DynamicObject;
use kube::{Resource, ResourceExt};

use super::store::ObjectKey;
use crate::error::{Error, Result};

pub const DEFAULT_CREATE_VERSION_LABEL: &str = "lifecycle.example.io/create-version";
pub const DEFAULT_UPDATE_VERSION_LABEL: &str = "lifecycle.example.io/update-version";
pub const DEFAULT_LAST_APPLIED_ANNOTATION: &str = "lifecycle.example.io/last-applied-configuration";
/// UID of the managed resource, set next to the controller reference so
/// owned objects can be listed by label
pub const OWNER_UID_LABEL: &str = "lifecycle.example.io/owner-uid";

/// Operator version an owned resource was created at
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreationVersion(pub String);

impl CreationVersion {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Keys of the metadata the reconciler stamps on owned resources
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionLabels {
    pub create_version: String,
    pub update_version: String,
    pub last_applied: String,
}

impl Default for VersionLabels {
    fn default() -> Self {
        Self {
            create_version: DEFAULT_CREATE_VERSION_LABEL.to_string(),
            update_version: DEFAULT_UPDATE_VERSION_LABEL.to_string(),
            last_applied: DEFAULT_LAST_APPLIED_ANNOTATION.to_string(),
        }
    }
}

impl VersionLabels {
    pub fn creation_version(&self, meta: &ObjectMeta) -> Option<CreationVersion> {
        meta.labels
            .as_ref()
            .and_then(|l| l.get(&self.create_version))
            .map(|v| CreationVersion(v.clone()))
    }

    /// Stamp a freshly created object with both version labels
    pub fn stamp_created(&self, meta: &mut ObjectMeta, version: &str) {
        let labels = meta.labels.get_or_insert_with(Default::default);
        labels.insert(self.create_version.clone(), version.to_string());
        labels.insert(self.update_version.clone(), version.to_string());
    }

    pub fn stamp_updated(&self, meta: &mut ObjectMeta, version: &str) {
        meta.labels
            .get_or_insert_with(Default::default)
            .insert(self.update_version.clone(), version.to_string());
    }

    pub fn last_applied<'a>(&self, meta: &'a ObjectMeta) -> Option<&'a str> {
        meta.annotations
            .as_ref()
            .and_then(|a| a.get(&self.last_applied))
            .map(String::as_str)
    }

    pub fn set_last_applied(&self, meta: &mut ObjectMeta, applied: String) {
        meta.annotations
            .get_or_insert_with(Default::default)
            .insert(self.last_applied.clone(), applied);
    }
}

/// Controller owner reference pointing at `owner`
///
/// The owner must have been read back from the store so that it carries a UID.
pub fn owner_reference<K: Resource<DynamicType = ()>>(owner: &K) -> Result<OwnerReference> {
    let uid = owner.meta().uid.clone().ok_or_else(|| {
        Error::MalformedResource(format!("{} {} has no uid", K::kind(&()), owner.name_any()))
    })?;
    Ok(OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: owner.name_any(),
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Point `meta` at `owner` as its managing controller, replacing any other
/// controller reference, and label it with the owner's UID
pub fn set_controller_reference(meta: &mut ObjectMeta, owner: OwnerReference) {
    meta.labels
        .get_or_insert_with(Default::default)
        .insert(OWNER_UID_LABEL.to_string(), owner.uid.clone());
    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    refs.retain(|r| r.controller != Some(true) && r.uid != owner.uid);
    refs.push(owner);
}

pub fn is_controlled_by(meta: &ObjectMeta, owner_uid: &str) -> bool {
    meta.owner_references
        .as_ref()
        .map(|refs| {
            refs.iter()
                .any(|r| r.controller == Some(true) && r.uid == owner_uid)
        })
        .unwrap_or(false)
}

/// A stored object owned by the managed resource, as seen by the orphan sweep
#[derive(Clone, Debug)]
pub struct OwnedRecord {
    pub key: ObjectKey,
    pub creation_version: Option<CreationVersion>,
    pub object: DynamicObject,
}

impl OwnedRecord {
    pub fn new(key: ObjectKey, object: DynamicObject, labels: &VersionLabels) -> Self {
        Self {
            creation_version: labels.creation_version(&object.metadata),
            key,
            object,
        }
    }

    /// Whether the record was created at a version other than `target`
    pub fn is_stale(&self, target: &str) -> bool {
        self.creation_version
            .as_ref()
            .map(|v| v.as_str() != target)
            .unwrap_or(true)
    }
}
