//! Builders for owned-resource descriptions
//!
//! [`ResourceBuilder`] carries two label sets: common labels for the resources
//! of a managed component and operator labels for the operator's own
//! resources. Labels passed in explicitly always win over the builder's.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSecurityContext, PodSpec, PodTemplateSpec, Service,
    ServiceAccount, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use super::owned::OwnedResource;
use crate::error::{Error, Result};

pub const TERMINATION_MESSAGE_PATH_DEFAULT: &str = "/dev/termination-log";
pub const TERMINATION_MESSAGE_READ_FILE: &str = "File";

type Labels = BTreeMap<String, String>;

/// Standard labels for the resources of a managed component
pub fn standard_labels(component: &str, instance: &str) -> Labels {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), component.to_string());
    labels.insert("app.kubernetes.io/instance".to_string(), instance.to_string());
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "lifecycle-operator".to_string(),
    );
    labels
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceBuilder {
    common_labels: Labels,
    operator_labels: Labels,
}

fn merge_missing(labels: Option<Labels>, defaults: &Labels) -> Labels {
    let mut labels = labels.unwrap_or_default();
    for (k, v) in defaults {
        labels.entry(k.clone()).or_insert_with(|| v.clone());
    }
    labels
}

fn match_map(key: &str, value: &str) -> Labels {
    [(key.to_string(), value.to_string())].into()
}

impl ResourceBuilder {
    pub fn new(common_labels: Labels, operator_labels: Labels) -> Self {
        Self {
            common_labels,
            operator_labels,
        }
    }

    /// `labels` plus every common label it does not already set
    pub fn with_common_labels(&self, labels: Option<Labels>) -> Labels {
        merge_missing(labels, &self.common_labels)
    }

    /// `labels` plus every operator label it does not already set
    pub fn with_operator_labels(&self, labels: Option<Labels>) -> Labels {
        merge_missing(labels, &self.operator_labels)
    }

    pub fn service_account(&self, name: &str) -> ServiceAccount {
        ServiceAccount {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(self.with_common_labels(None)),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn operator_service_account(&self, name: &str, namespace: &str) -> ServiceAccount {
        ServiceAccount {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(self.with_operator_labels(None)),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn operator_deployment_spec(
        &self,
        match_key: &str,
        match_value: &str,
        service_account: Option<&str>,
        replicas: i32,
    ) -> DeploymentSpec {
        let labels = self.with_operator_labels(Some(match_map(match_key, match_value)));
        DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(pod_spec(service_account)),
            },
            ..Default::default()
        }
    }

    pub fn operator_deployment(
        &self,
        name: &str,
        namespace: &str,
        match_key: &str,
        match_value: &str,
        service_account: Option<&str>,
        replicas: i32,
    ) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(self.operator_deployment_spec(
                match_key,
                match_value,
                service_account,
                replicas,
            )),
            status: None,
        }
    }

    pub fn deployment(
        &self,
        name: &str,
        match_key: &str,
        match_value: &str,
        service_account: Option<&str>,
        replicas: i32,
    ) -> Deployment {
        let labels = self.with_common_labels(Some(match_map(match_key, match_value)));
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                selector: LabelSelector {
                    match_labels: Some(match_map(match_key, match_value)),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(pod_spec(service_account)),
                },
                ..Default::default()
            }),
            status: None,
        }
    }

    pub fn ports_container(
        &self,
        name: &str,
        image: &str,
        verbosity: &str,
        pull_policy: &str,
        ports: Vec<ContainerPort>,
    ) -> Container {
        Container {
            ports: Some(ports),
            ..self.container(name, image, verbosity, pull_policy)
        }
    }

    /// Container with the termination-message fields the API server would
    /// otherwise default, so a re-read matches what was applied
    pub fn container(&self, name: &str, image: &str, verbosity: &str, pull_policy: &str) -> Container {
        Container {
            name: name.to_string(),
            image: Some(image.to_string()),
            image_pull_policy: Some(pull_policy.to_string()),
            args: Some(vec![format!("-v={}", verbosity)]),
            termination_message_policy: Some(TERMINATION_MESSAGE_READ_FILE.to_string()),
            termination_message_path: Some(TERMINATION_MESSAGE_PATH_DEFAULT.to_string()),
            ..Default::default()
        }
    }

    pub fn service(&self, name: &str, match_key: &str, match_value: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(self.with_common_labels(Some(match_map(match_key, match_value)))),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(match_map(match_key, match_value)),
                ..Default::default()
            }),
            status: None,
        }
    }
}

fn pod_spec(service_account: Option<&str>) -> PodSpec {
    PodSpec {
        security_context: Some(PodSecurityContext {
            run_as_non_root: Some(true),
            ..Default::default()
        }),
        service_account_name: service_account
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        ..Default::default()
    }
}

/// Check that every description names its kind and version and has a name
pub fn validate_kinds(resources: &[OwnedResource]) -> Result<()> {
    for resource in resources {
        let kind = resource.kind();
        if kind.kind.is_empty() || kind.version.is_empty() {
            return Err(Error::MalformedResource(format!(
                "uninitialized kind for {:?}",
                resource.meta().name
            )));
        }
        if let OwnedResource::Dynamic { object, .. } = resource {
            if !kind.matches(object) {
                return Err(Error::MalformedResource(format!(
                    "{} carries type metadata {:?}",
                    resource.key(),
                    object.types
                )));
            }
        }
        if resource.name().is_empty() {
            return Err(Error::MalformedResource(format!(
                "{} description has no name",
                kind.kind
            )));
        }
    }
    Ok(())
}
