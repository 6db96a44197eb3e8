//! ComponentConfig Custom Resource Definition
//!
//! A cluster-scoped managed resource that deploys a single operator component
//! (service account, config map, deployment and service) into a target
//! namespace. It is the reference kind the bundled operator binary manages.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Status;

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "lifecycle.example.io",
    version = "v1alpha1",
    kind = "ComponentConfig",
    status = "ComponentConfigStatus",
    shortname = "ccfg",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Observed","type":"string","jsonPath":".status.observedVersion"}"#,
    printcolumn = r#"{"name":"Target","type":"string","jsonPath":".status.targetVersion"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ComponentConfigSpec {
    /// Namespace the owned resources are created in
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Container image for the component
    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Log verbosity passed to the component as `-v=<n>`
    #[serde(default = "default_verbosity")]
    pub verbosity: String,

    #[serde(default = "default_pull_policy")]
    pub pull_policy: String,

    /// Port exposed through the component's Service
    #[serde(default = "default_port")]
    pub port: i32,

    /// Extra settings rendered into the component's ConfigMap
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub settings: std::collections::BTreeMap<String, String>,
}

fn default_namespace() -> String {
    "lifecycle-system".to_string()
}

fn default_image() -> String {
    "quay.io/lifecycle/component:latest".to_string()
}

fn default_replicas() -> i32 {
    1
}

fn default_verbosity() -> String {
    "1".to_string()
}

fn default_pull_policy() -> String {
    "IfNotPresent".to_string()
}

fn default_port() -> i32 {
    8443
}

impl Default for ComponentConfigSpec {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            image: default_image(),
            replicas: default_replicas(),
            verbosity: default_verbosity(),
            pull_policy: default_pull_policy(),
            port: default_port(),
            settings: Default::default(),
        }
    }
}

/// Status subresource of a ComponentConfig
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentConfigStatus {
    #[serde(flatten)]
    pub status: Status,
}
