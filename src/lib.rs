//! controller-lifecycle: reconciliation engine for Kubernetes operators
//!
//! This crate drives a managed custom resource through its lifecycle
//! (deploy, upgrade, delete) while keeping the resources it owns converged
//! to their desired state.

pub mod controller;
pub mod crd;
pub mod error;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::error::{Error, Result};
