//! [`CrManager`] for the `ComponentConfig` kind
//!
//! A ComponentConfig deploys one component into `spec.namespace`: a service
//! account, a config map rendered from `spec.settings`, a deployment running
//! `spec.image`, and a service in front of it.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, ContainerPort, Service, ServiceAccount, ServicePort};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use super::manager::CrManager;
use super::owned::OwnedResource;
use super::resources::{standard_labels, ResourceBuilder};
use super::store::ResourceKind;
use crate::crd::{ComponentConfig, ComponentConfigSpec, Status};
use crate::error::{Error, Result};

pub const COMPONENT_LABEL: &str = "lifecycle.example.io/component";
const COMPONENT_NAME: &str = "component";
const CONTAINER_NAME: &str = "component";

#[derive(Clone, Debug, Default)]
pub struct ComponentConfigManager;

impl ComponentConfigManager {
    pub fn new() -> Self {
        Self
    }

    fn builder(&self, cr: &ComponentConfig) -> ResourceBuilder {
        ResourceBuilder::new(standard_labels(COMPONENT_NAME, &cr.name_any()), BTreeMap::new())
    }
}

fn validate(name: &str, spec: &ComponentConfigSpec) -> Result<()> {
    if name.is_empty() {
        return Err(Error::MalformedResource(
            "ComponentConfig has no name".to_string(),
        ));
    }
    if spec.image.is_empty() {
        return Err(Error::MalformedResource(format!(
            "ComponentConfig {}: image must not be empty",
            name
        )));
    }
    if spec.replicas < 0 {
        return Err(Error::MalformedResource(format!(
            "ComponentConfig {}: replicas must not be negative",
            name
        )));
    }
    if !(1..=65535).contains(&spec.port) {
        return Err(Error::MalformedResource(format!(
            "ComponentConfig {}: port {} out of range",
            name, spec.port
        )));
    }
    Ok(())
}

fn in_namespace(meta: &mut ObjectMeta, namespace: &str) {
    meta.namespace = Some(namespace.to_string());
}

impl CrManager for ComponentConfigManager {
    type Resource = ComponentConfig;

    /// Nothing has been initialized on the resource yet
    fn is_creating(&self, cr: &ComponentConfig) -> Result<bool> {
        Ok(self.status(cr).map_or(true, |s| s.phase.is_none()))
    }

    fn new_empty(&self) -> ComponentConfig {
        ComponentConfig::new("", ComponentConfigSpec::default())
    }

    fn status<'a>(&self, cr: &'a ComponentConfig) -> Option<&'a Status> {
        cr.status.as_ref().map(|s| &s.status)
    }

    fn status_mut<'a>(&self, cr: &'a mut ComponentConfig) -> &'a mut Status {
        &mut cr.status.get_or_insert_with(Default::default).status
    }

    fn all_resources(&self, cr: &ComponentConfig) -> Result<Vec<OwnedResource>> {
        let name = cr.name_any();
        let spec = &cr.spec;
        validate(&name, spec)?;
        let builder = self.builder(cr);

        let mut service_account = builder.service_account(&name);
        in_namespace(&mut service_account.metadata, &spec.namespace);

        let mut settings = spec.settings.clone();
        settings.insert("verbosity".to_string(), spec.verbosity.clone());
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(format!("{}-settings", name)),
                namespace: Some(spec.namespace.clone()),
                labels: Some(builder.with_common_labels(None)),
                ..Default::default()
            },
            data: Some(settings),
            ..Default::default()
        };

        let mut deployment = builder.deployment(&name, COMPONENT_LABEL, &name, Some(&name), spec.replicas);
        in_namespace(&mut deployment.metadata, &spec.namespace);
        let container = builder.ports_container(
            CONTAINER_NAME,
            &spec.image,
            &spec.verbosity,
            &spec.pull_policy,
            vec![ContainerPort {
                name: Some("https".to_string()),
                container_port: spec.port,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }],
        );
        if let Some(pod) = deployment
            .spec
            .as_mut()
            .and_then(|s| s.template.spec.as_mut())
        {
            pod.containers = vec![container];
        }

        let mut service = builder.service(&name, COMPONENT_LABEL, &name);
        in_namespace(&mut service.metadata, &spec.namespace);
        if let Some(svc) = service.spec.as_mut() {
            svc.ports = Some(vec![ServicePort {
                name: Some("https".to_string()),
                port: spec.port,
                target_port: Some(IntOrString::String("https".to_string())),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]);
        }

        Ok(vec![
            service_account.into(),
            config_map.into(),
            deployment.into(),
            service.into(),
        ])
    }

    fn dependent_resource_kinds(&self) -> Vec<ResourceKind> {
        vec![
            ResourceKind::of::<ServiceAccount>(),
            ResourceKind::of::<ConfigMap>(),
            ResourceKind::of::<Deployment>(),
            ResourceKind::of::<Service>(),
        ]
    }
}
