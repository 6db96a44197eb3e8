//! Condition management helpers following Kubernetes API conventions
//!
//! Three condition types are maintained on every managed resource. Each
//! lifecycle situation maps to one fixed set of values, applied with
//! [`set_conditions`].

use chrono::Utc;

use crate::crd::Condition;

pub const CONDITION_TYPE_AVAILABLE: &str = "Available";
pub const CONDITION_TYPE_PROGRESSING: &str = "Progressing";
pub const CONDITION_TYPE_DEGRADED: &str = "Degraded";

pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";
pub const CONDITION_STATUS_UNKNOWN: &str = "Unknown";

pub const REASON_DEPLOY_COMPLETED: &str = "DeployCompleted";
pub const REASON_DEPLOY_STARTED: &str = "DeployStarted";
pub const REASON_UPGRADE_IN_PROGRESS: &str = "UpgradeInProgress";
pub const REASON_DEPLOYMENT_NOT_READY: &str = "DeploymentNotReady";

/// Values for Available, Progressing and Degraded plus a shared reason
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConditionSet {
    pub available: &'static str,
    pub progressing: &'static str,
    pub degraded: &'static str,
    pub reason: &'static str,
}

/// All owned resources are ready
pub const READY: ConditionSet = ConditionSet {
    available: CONDITION_STATUS_TRUE,
    progressing: CONDITION_STATUS_FALSE,
    degraded: CONDITION_STATUS_FALSE,
    reason: REASON_DEPLOY_COMPLETED,
};

/// Initial deployment still rolling out
pub const DEPLOYING: ConditionSet = ConditionSet {
    available: CONDITION_STATUS_FALSE,
    progressing: CONDITION_STATUS_TRUE,
    degraded: CONDITION_STATUS_FALSE,
    reason: REASON_DEPLOY_STARTED,
};

/// Upgrade rolling out; the previous version is still serving
pub const UPGRADING: ConditionSet = ConditionSet {
    available: CONDITION_STATUS_TRUE,
    progressing: CONDITION_STATUS_TRUE,
    degraded: CONDITION_STATUS_TRUE,
    reason: REASON_UPGRADE_IN_PROGRESS,
};

/// Was deployed, a workload has since lost readiness
pub const NOT_READY: ConditionSet = ConditionSet {
    available: CONDITION_STATUS_FALSE,
    progressing: CONDITION_STATUS_FALSE,
    degraded: CONDITION_STATUS_TRUE,
    reason: REASON_DEPLOYMENT_NOT_READY,
};

/// Update or add a condition to the conditions list
///
/// The transition time only moves when the status value changes.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: &str,
    reason: &str,
    message: &str,
) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        if existing.status != status {
            existing.last_transition_time = Utc::now().to_rfc3339();
        }
        existing.status = status.to_string();
        existing.reason = reason.to_string();
        existing.message = message.to_string();
    } else {
        conditions.push(Condition::new(type_, status, reason, message));
    }
}

/// Apply a whole [`ConditionSet`] with one message
pub fn set_conditions(conditions: &mut Vec<Condition>, set: ConditionSet, message: &str) {
    set_condition(
        conditions,
        CONDITION_TYPE_AVAILABLE,
        set.available,
        set.reason,
        message,
    );
    set_condition(
        conditions,
        CONDITION_TYPE_PROGRESSING,
        set.progressing,
        set.reason,
        message,
    );
    set_condition(
        conditions,
        CONDITION_TYPE_DEGRADED,
        set.degraded,
        set.reason,
        message,
    );
}

pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_)
        .map(|c| c.status == CONDITION_STATUS_TRUE)
        .unwrap_or(false)
}
