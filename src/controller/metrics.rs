//! Prometheus metrics for the lifecycle operator
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports:
//! - `lifecycle_reconcile_duration_seconds` (histogram): reconcile duration labeled by controller.
//! - `lifecycle_reconcile_errors_total` (counter): reconcile errors labeled by controller and kind.
//! - `lifecycle_owned_resource_writes_total` (counter): owned-resource writes labeled by operation and kind.
//! - `lifecycle_phase_transitions_total` (counter): phase changes labeled by controller and phase.

use std::sync::atomic::AtomicU64;

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Labels for operator reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Managed kind, e.g. "ComponentConfig"
    pub controller: String,
}

/// Labels for operator error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// Error category, e.g. "conflict", "kube", "downgrade"
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct WriteLabels {
    /// "create", "update" or "delete"
    pub operation: String,
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PhaseLabels {
    pub controller: String,
    pub phase: String,
}

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }
    Family::new_with_constructor(reconcile_histogram)
});

pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static OWNED_RESOURCE_WRITES_TOTAL: Lazy<Family<WriteLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static PHASE_TRANSITIONS_TOTAL: Lazy<Family<PhaseLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();
    registry.register(
        "lifecycle_reconcile_duration_seconds",
        "Duration of reconcile loops in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "lifecycle_reconcile_errors_total",
        "Total number of reconcile errors",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "lifecycle_owned_resource_writes_total",
        "Creates, updates and deletes of owned resources",
        OWNED_RESOURCE_WRITES_TOTAL.clone(),
    );
    registry.register(
        "lifecycle_phase_transitions_total",
        "Phase changes of managed resources",
        PHASE_TRANSITIONS_TOTAL.clone(),
    );
    registry
});

/// Observe a reconcile duration in seconds.
pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    let labels = ReconcileLabels {
        controller: controller.to_string(),
    };
    RECONCILE_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}

/// Increment the reconcile error counter.
pub fn inc_reconcile_error(controller: &str, kind: &str) {
    let labels = ErrorLabels {
        controller: controller.to_string(),
        kind: kind.to_string(),
    };
    RECONCILE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_owned_write(operation: &str, kind: &str) {
    let labels = WriteLabels {
        operation: operation.to_string(),
        kind: kind.to_string(),
    };
    OWNED_RESOURCE_WRITES_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_phase_transition(controller: &str, phase: &str) {
    let labels = PhaseLabels {
        controller: controller.to_string(),
        phase: phase.to_string(),
    };
    PHASE_TRANSITIONS_TOTAL.get_or_create(&labels).inc();
}

/// Text exposition of every registered metric
pub fn encode() -> Result<String, std::fmt::Error> {
    let mut buffer = String::new();
    prometheus_client::encoding::text::encode(&mut buffer, &REGISTRY)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_show_up_in_exposition() {
        inc_owned_write("create", "ConfigMap");
        inc_phase_transition("ComponentConfig", "Deployed");
        observe_reconcile_duration_seconds("ComponentConfig", 0.02);

        let text = encode().unwrap();
        assert!(text.contains("lifecycle_owned_resource_writes_total"));
        assert!(text.contains("operation=\"create\""));
        assert!(text.contains("lifecycle_phase_transitions_total"));
        assert!(text.contains("lifecycle_reconcile_duration_seconds"));
    }
}
