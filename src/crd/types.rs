//! Generic status block shared by every managed resource kind
//!
//! A managed kind embeds [`Status`] in its own status struct and exposes it to
//! the reconciler through a `CrManager`.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Coarse lifecycle state of a managed resource
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Initial deployment in progress
    Deploying,
    /// All owned resources exist and are ready at the observed version
    Deployed,
    /// Moving owned resources to a new target version
    Upgrading,
    /// Explicitly flagged as failed by the operator
    Error,
    /// Deletion requested; owned resources are being (or have been) removed
    Deleted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Deploying => "Deploying",
            Phase::Deployed => "Deployed",
            Phase::Upgrading => "Upgrading",
            Phase::Error => "Error",
            Phase::Deleted => "Deleted",
        };
        write!(f, "{}", s)
    }
}

/// Version and lifecycle bookkeeping persisted on the managed resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// Current lifecycle phase; `None` until the resource is initialized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,

    /// Available / Progressing / Degraded, recomputed every pass
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Operator version that last drove a deployment or upgrade
    #[serde(default)]
    pub operator_version: String,

    /// Version the owned resources are being moved to
    #[serde(default)]
    pub target_version: String,

    /// Version the owned resources were last confirmed ready at
    #[serde(default)]
    pub observed_version: String,
}

impl Status {
    /// True until `initialize` has run on the managed resource
    pub fn is_uninitialized(&self) -> bool {
        self.phase.is_none()
    }

    pub fn is_upgrading(&self) -> bool {
        self.phase == Some(Phase::Upgrading)
    }
}

/// Condition for status reporting (Kubernetes convention)
///
/// # Examples
///
/// ```rust,no_run
/// use controller_lifecycle::crd::Condition;
///
/// let condition = Condition::new("Available", "True", "DeployCompleted", "Deployment completed");
/// ```
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition: "Available", "Progressing" or "Degraded"
    #[serde(rename = "type")]
    pub type_: String,
    /// Status of the condition: "True", "False", or "Unknown"
    pub status: String,
    /// Last time the condition transitioned
    pub last_transition_time: String,
    /// Machine-readable reason for the condition
    pub reason: String,
    /// Human-readable message
    pub message: String,
}

impl Condition {
    pub fn new(type_: &str, status: &str, reason: &str, message: &str) -> Self {
        Self {
            type_: type_.to_string(),
            status: status.to_string(),
            last_transition_time: chrono::Utc::now().to_rfc3339(),
            reason: reason.to_string(),
            message: message.to_string(),
        }
    }
}
