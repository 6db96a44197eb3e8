//! Unit tests for owned-resource builders.
//!
//! Run with: `cargo test -p controller-lifecycle resources_test`

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::{ConfigMap, ContainerPort};
    use kube::core::DynamicObject;

    use crate::controller::owned::OwnedResource;
    use crate::controller::resources::{
        standard_labels, validate_kinds, ResourceBuilder, TERMINATION_MESSAGE_PATH_DEFAULT,
    };
    use crate::controller::store::ResourceKind;

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn builder() -> ResourceBuilder {
        ResourceBuilder::new(
            labels(&[("app", "component"), ("tier", "common")]),
            labels(&[("operator", "lifecycle"), ("tier", "operator")]),
        )
    }

    // -----------------------------------------------------------------------
    // Label merging
    // -----------------------------------------------------------------------

    #[test]
    fn test_explicit_labels_win_over_common_labels() {
        let merged = builder().with_common_labels(Some(labels(&[("tier", "custom")])));
        assert_eq!(merged["tier"], "custom");
        assert_eq!(merged["app"], "component");
    }

    #[test]
    fn test_operator_labels_from_nothing() {
        let merged = builder().with_operator_labels(None);
        assert_eq!(merged, labels(&[("operator", "lifecycle"), ("tier", "operator")]));
    }

    #[test]
    fn test_standard_labels() {
        let l = standard_labels("component", "config");
        assert_eq!(l["app.kubernetes.io/instance"], "config");
        assert_eq!(l["app.kubernetes.io/managed-by"], "lifecycle-operator");
    }

    // -----------------------------------------------------------------------
    // Builders
    // -----------------------------------------------------------------------

    #[test]
    fn test_operator_deployment() {
        let dep = builder().operator_deployment("op", "ns", "name", "op", Some("op-sa"), 2);
        let spec = dep.spec.unwrap();

        assert_eq!(dep.metadata.namespace.as_deref(), Some("ns"));
        assert_eq!(spec.replicas, Some(2));
        let selector = spec.selector.match_labels.unwrap();
        assert_eq!(selector["name"], "op");
        assert_eq!(selector["operator"], "lifecycle");

        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.service_account_name.as_deref(), Some("op-sa"));
        assert_eq!(pod.security_context.unwrap().run_as_non_root, Some(true));
    }

    #[test]
    fn test_deployment_selector_uses_only_match_label() {
        let dep = builder().deployment("web", "name", "web", None, 1);
        let spec = dep.spec.unwrap();

        assert_eq!(spec.selector.match_labels, Some(labels(&[("name", "web")])));
        assert_eq!(dep.metadata.labels.unwrap()["app"], "component");
        assert_eq!(spec.template.spec.unwrap().service_account_name, None);
    }

    #[test]
    fn test_container_carries_termination_defaults() {
        let container = builder().container("c", "img:1", "3", "Always");
        assert_eq!(container.args, Some(vec!["-v=3".to_string()]));
        assert_eq!(
            container.termination_message_path.as_deref(),
            Some(TERMINATION_MESSAGE_PATH_DEFAULT)
        );
        assert_eq!(container.termination_message_policy.as_deref(), Some("File"));
    }

    #[test]
    fn test_ports_container() {
        let port = ContainerPort {
            container_port: 8443,
            name: Some("https".to_string()),
            ..Default::default()
        };
        let container = builder().ports_container("c", "img:1", "1", "IfNotPresent", vec![port]);
        assert_eq!(container.ports.unwrap()[0].container_port, 8443);
        assert_eq!(container.image.as_deref(), Some("img:1"));
    }

    #[test]
    fn test_service_selects_match_label() {
        let svc = builder().service("web", "name", "web");
        assert_eq!(
            svc.spec.unwrap().selector,
            Some(labels(&[("name", "web")]))
        );
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    #[test]
    fn test_validate_accepts_built_resources() {
        let b = builder();
        let resources = vec![
            OwnedResource::from(b.service_account("sa")),
            OwnedResource::from(b.deployment("web", "name", "web", Some("sa"), 1)),
        ];
        assert!(validate_kinds(&resources).is_ok());
    }

    #[test]
    fn test_validate_rejects_unnamed_resource() {
        let resources = vec![OwnedResource::from(ConfigMap::default())];
        assert!(validate_kinds(&resources).is_err());
    }

    #[test]
    fn test_validate_rejects_dynamic_without_type_metadata() {
        let kind = ResourceKind::of::<ConfigMap>();
        let mut object = DynamicObject::new("cm", &kind.api_resource());
        object.types = None;
        let resources = vec![OwnedResource::dynamic(kind, object)];
        assert!(validate_kinds(&resources).is_err());
    }
}
