//! Controller module for managed-resource reconciliation
//! This module contains the store abstraction, the convergence engine for
//! owned resources, the phase state machine and the kube-rs trigger layer.

mod callbacks;
pub mod component;
pub mod conditions;
mod converge;
mod finalizers;
pub mod kube_store;
pub mod labels;
mod manager;
pub mod memory_store;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod owned;
mod reconciler;
#[cfg(test)]
mod reconciler_test;
pub mod resources;
#[cfg(test)]
mod resources_test;
mod runtime;
pub mod store;
pub mod version;

pub use callbacks::{
    callback_fn, CallbackArgs, CallbackDispatcher, CallbackRegistry, ReconcileCallback,
    ReconcileState,
};
pub use component::ComponentConfigManager;
pub use converge::{ConvergeReport, Converger, Teardown};
pub use finalizers::{
    add_finalizer, has_finalizer, is_being_deleted, remove_finalizer, DEFAULT_FINALIZER,
};
pub use kube_store::KubeStore;
pub use labels::VersionLabels;
pub use manager::{CrManager, ManagedResource};
pub use memory_store::InMemoryStore;
pub use owned::{OwnedKind, OwnedResource, Readiness};
pub use reconciler::{ReconcileResult, Reconciler, ReconcilerConfig};
pub use resources::ResourceBuilder;
pub use runtime::{retry_delay, run_controller, ControllerState, DryRunStore};
pub use store::{ListSelector, ObjectKey, ResourceKind, Store};
pub use version::should_take_update_path;
