//! Error types for the lifecycle reconciler
//!
//! `NotFound` and `Conflict` are control signals the reconciler branches on;
//! everything else is surfaced to the trigger layer unchanged.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The object does not exist in the store
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// Optimistic concurrency collision: the object changed since it was read
    #[error("conflict writing {kind} {name}: object was modified")]
    Conflict { kind: String, name: String },

    /// Create of an object that is already present
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    /// The operator is older than the version already deployed
    #[error("operator downgraded from {current} to {target}, will not reconcile")]
    DowngradeRejected { current: String, target: String },

    /// Desired description does not fit the live object (kind mismatch, bad shape)
    #[error("Malformed resource: {0}")]
    MalformedResource(String),

    /// A registered reconcile callback failed
    #[error("Callback failed: {0}")]
    CallbackError(String),

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Backend failure not covered by the other variants
    #[error("Store error: {0}")]
    StoreError(String),

    /// Invalid operator configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Whether the trigger layer should retry the whole pass soon
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::Conflict { .. }
                | Error::AlreadyExists { .. }
                | Error::KubeError(_)
                | Error::StoreError(_)
                | Error::CallbackError(_)
        )
    }

    /// Short label used for metrics
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::Conflict { .. } => "conflict",
            Error::AlreadyExists { .. } => "already_exists",
            Error::DowngradeRejected { .. } => "downgrade",
            Error::MalformedResource(_) => "malformed",
            Error::CallbackError(_) => "callback",
            Error::KubeError(_) => "kube",
            Error::SerializationError(_) => "serialization",
            Error::StoreError(_) => "store",
            Error::ConfigError(_) => "config",
        }
    }
}
