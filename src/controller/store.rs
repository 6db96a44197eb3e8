//! Backing object store abstraction
//!
//! The reconciler never talks to the cluster directly. Every read and write
//! goes through [`Store`], which works on untyped [`DynamicObject`]s addressed
//! by an [`ObjectKey`]. `NotFound` and `Conflict` come back as distinct
//! [`Error`] variants so callers can branch on them.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::core::{ApiResource, DynamicObject};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Maps a kube-rs resource scope to whether the kind lives in a namespace
pub trait Scoped {
    const NAMESPACED: bool;
}

impl Scoped for NamespaceResourceScope {
    const NAMESPACED: bool = true;
}

impl Scoped for ClusterResourceScope {
    const NAMESPACED: bool = false;
}

/// Group/version/kind of a resource type plus what is needed to address it
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKind {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
}

impl ResourceKind {
    /// Kind descriptor for a statically typed resource
    pub fn of<K>() -> Self
    where
        K: Resource<DynamicType = ()>,
        K::Scope: Scoped,
    {
        Self {
            group: K::group(&()).to_string(),
            version: K::version(&()).to_string(),
            kind: K::kind(&()).to_string(),
            plural: K::plural(&()).to_string(),
            namespaced: <K::Scope as Scoped>::NAMESPACED,
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: self.api_version(),
            kind: self.kind.clone(),
            plural: self.plural.clone(),
        }
    }

    /// Whether the object's type metadata names this kind
    pub fn matches(&self, obj: &DynamicObject) -> bool {
        obj.types
            .as_ref()
            .map(|t| t.kind == self.kind && t.api_version == self.api_version())
            .unwrap_or(false)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.api_version())
    }
}

/// Stable identity of a stored object
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: ResourceKind, namespace: Option<String>, name: impl Into<String>) -> Self {
        let namespace = if kind.namespaced { namespace } else { None };
        Self {
            kind,
            namespace,
            name: name.into(),
        }
    }

    /// Key of an object of the given kind, read from its metadata
    pub fn for_object(kind: &ResourceKind, obj: &DynamicObject) -> Self {
        Self::new(
            kind.clone(),
            obj.metadata.namespace.clone(),
            obj.metadata.name.clone().unwrap_or_default(),
        )
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind.kind, self.name),
        }
    }
}

/// Filter for [`Store::list`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListSelector {
    /// Restrict to one namespace; `None` lists across all namespaces
    pub namespace: Option<String>,
    /// Labels every returned object must carry with exactly these values
    pub match_labels: BTreeMap<String, String>,
}

impl ListSelector {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    /// Label selector string in `k=v,k2=v2` form
    pub fn label_selector(&self) -> Option<String> {
        if self.match_labels.is_empty() {
            return None;
        }
        Some(
            self.match_labels
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    pub fn matches(&self, meta: &ObjectMeta) -> bool {
        if let Some(ns) = &self.namespace {
            if meta.namespace.as_ref() != Some(ns) {
                return false;
            }
        }
        let labels = meta.labels.as_ref();
        self.match_labels
            .iter()
            .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
    }
}

/// Versioned resource backend
///
/// Every call is a single round trip. `update` and `update_status` honor the
/// `resourceVersion` carried by the object and fail with [`Error::Conflict`]
/// when the stored object has moved on.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch an object; [`Error::NotFound`] when absent
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject>;

    async fn create(&self, kind: &ResourceKind, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Replace metadata and spec; status changes are ignored
    async fn update(&self, kind: &ResourceKind, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Replace the status subresource only
    async fn update_status(&self, kind: &ResourceKind, obj: &DynamicObject)
        -> Result<DynamicObject>;

    /// Request deletion; [`Error::NotFound`] when absent. Objects holding
    /// finalizers linger with a deletion timestamp until those are cleared.
    async fn delete(&self, key: &ObjectKey) -> Result<()>;

    async fn list(&self, kind: &ResourceKind, selector: &ListSelector) -> Result<Vec<DynamicObject>>;
}

/// Fetch an object, mapping NotFound to `None`
pub async fn get_opt(store: &dyn Store, key: &ObjectKey) -> Result<Option<DynamicObject>> {
    match store.get(key).await {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Convert a typed object into its untyped store representation
pub fn to_dynamic<T: Serialize>(obj: &T) -> Result<DynamicObject> {
    let value = serde_json::to_value(obj)?;
    Ok(serde_json::from_value(value)?)
}

/// Convert a stored object into a typed one
///
/// Fails with [`Error::MalformedResource`] when the stored shape does not fit
/// `T`, including a kind or apiVersion mismatch.
pub fn from_dynamic<T: DeserializeOwned>(obj: &DynamicObject) -> Result<T> {
    let value = serde_json::to_value(obj)?;
    serde_json::from_value(value).map_err(|e| {
        Error::MalformedResource(format!(
            "{} {}: {}",
            obj.types
                .as_ref()
                .map(|t| t.kind.as_str())
                .unwrap_or("<unknown kind>"),
            obj.metadata.name.as_deref().unwrap_or("<unnamed>"),
            e
        ))
    })
}
