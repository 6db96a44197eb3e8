//! Finalizer handling for managed resources
//!
//! The reconciler adds its finalizer when it initializes a managed resource and
//! removes it only after every owned resource is confirmed gone, which holds
//! back the platform's deletion of the managed resource until then.
//!
//! These helpers only touch the in-memory copy; persisting it is up to the
//! caller.

use kube::{Resource, ResourceExt};

/// Finalizer used when the operator is not configured with another one
pub const DEFAULT_FINALIZER: &str = "lifecycle.example.io/finalizer";

pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

/// Add `finalizer`; returns whether anything changed
pub fn add_finalizer<K: Resource>(obj: &mut K, finalizer: &str) -> bool {
    if has_finalizer(obj, finalizer) {
        return false;
    }
    obj.finalizers_mut().push(finalizer.to_string());
    true
}

/// Remove `finalizer`; returns whether anything changed
pub fn remove_finalizer<K: Resource>(obj: &mut K, finalizer: &str) -> bool {
    let finalizers = obj.finalizers_mut();
    let before = finalizers.len();
    finalizers.retain(|f| f != finalizer);
    finalizers.len() != before
}

/// Deletion has been requested and the platform is waiting on finalizers
pub fn is_being_deleted<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}
