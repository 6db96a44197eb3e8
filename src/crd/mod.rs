//! Custom Resource Definitions for controller-lifecycle
//!
//! The generic status block every managed kind embeds, and the sample
//! `ComponentConfig` kind managed by the bundled operator binary.

mod component_config;
pub mod types;


pub use component_config::{ComponentConfig, ComponentConfigSpec, ComponentConfigStatus};
pub use types::*;
