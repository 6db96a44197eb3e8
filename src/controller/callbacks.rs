//! Hooks invoked around every owned-resource mutation
//!
//! A [`CallbackDispatcher`] is handed to the reconciler when it is built and
//! lives as long as the reconciler does. Registration goes through the
//! dispatcher instance; there is no process-wide registry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use kube::core::DynamicObject;
use tracing::debug;

use super::store::{ResourceKind, Store};
use crate::error::Result;

/// Point in the mutation of an owned resource at which a callback runs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReconcileState {
    PreCreate,
    PostCreate,
    PreUpdate,
    PostUpdate,
    PreDelete,
    PostDelete,
}

impl fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReconcileState::PreCreate => "PreCreate",
            ReconcileState::PostCreate => "PostCreate",
            ReconcileState::PreUpdate => "PreUpdate",
            ReconcileState::PostUpdate => "PostUpdate",
            ReconcileState::PreDelete => "PreDelete",
            ReconcileState::PostDelete => "PostDelete",
        };
        write!(f, "{}", s)
    }
}

/// What a callback gets to see
///
/// `desired` is absent for deletions, `current` is absent before a create.
pub struct CallbackArgs<'a, K> {
    pub state: ReconcileState,
    pub kind: &'a ResourceKind,
    pub resource: &'a K,
    pub desired: Option<&'a DynamicObject>,
    pub current: Option<&'a DynamicObject>,
    pub store: &'a dyn Store,
}

/// A single hook; an error aborts the reconcile pass
#[async_trait]
pub trait ReconcileCallback<K: Send + Sync>: Send + Sync {
    async fn call(&self, args: &CallbackArgs<'_, K>) -> Result<()>;
}

#[async_trait]
impl<K, F> ReconcileCallback<K> for F
where
    K: Send + Sync,
    F: Fn(&CallbackArgs<'_, K>) -> Result<()> + Send + Sync,
{
    async fn call(&self, args: &CallbackArgs<'_, K>) -> Result<()> {
        self(args)
    }
}

/// Box a plain function or closure as a callback
pub fn callback_fn<K, F>(f: F) -> Arc<dyn ReconcileCallback<K>>
where
    K: Send + Sync + 'static,
    F: Fn(&CallbackArgs<'_, K>) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[async_trait]
pub trait CallbackDispatcher<K: Send + Sync>: Send + Sync {
    /// Add a callback for mutations of owned resources of `kind`
    fn register(&mut self, kind: ResourceKind, callback: Arc<dyn ReconcileCallback<K>>);

    /// Run the callbacks registered for `args.kind`, in registration order
    async fn invoke(&self, args: &CallbackArgs<'_, K>) -> Result<()>;
}

/// Callbacks keyed by owned-resource kind
pub struct CallbackRegistry<K> {
    callbacks: BTreeMap<ResourceKind, Vec<Arc<dyn ReconcileCallback<K>>>>,
}

impl<K> Default for CallbackRegistry<K> {
    fn default() -> Self {
        Self {
            callbacks: BTreeMap::new(),
        }
    }
}

impl<K> CallbackRegistry<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.callbacks.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl<K: Send + Sync> CallbackDispatcher<K> for CallbackRegistry<K> {
    fn register(&mut self, kind: ResourceKind, callback: Arc<dyn ReconcileCallback<K>>) {
        self.callbacks.entry(kind).or_default().push(callback);
    }

    async fn invoke(&self, args: &CallbackArgs<'_, K>) -> Result<()> {
        let Some(callbacks) = self.callbacks.get(args.kind) else {
            return Ok(());
        };
        for callback in callbacks {
            debug!("Running {} callback for {}", args.state, args.kind.kind);
            callback.call(args).await?;
        }
        Ok(())
    }
}
