//! Scenario tests for the phase state machine
//!
//! Every scenario runs the reconciler against the in-memory store with the
//! `ComponentConfig` kind. `VersionedManager` wants a different set of owned
//! resources per target version so that upgrades have something to change
//! and something to orphan.

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
    use k8s_openapi::api::core::v1::{ConfigMap, Container, PodSpec, PodTemplateSpec};
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::ObjectMeta;
    use kube::core::DynamicObject;
    use kube::ResourceExt;
    use serde_json::json;

    use crate::controller::callbacks::{
        CallbackArgs, CallbackDispatcher, ReconcileCallback, ReconcileState,
    };
    use crate::controller::component::ComponentConfigManager;
    use crate::controller::conditions::{
        find_condition, CONDITION_STATUS_FALSE, CONDITION_STATUS_TRUE, CONDITION_TYPE_AVAILABLE,
        CONDITION_TYPE_PROGRESSING, REASON_DEPLOY_STARTED,
    };
    use crate::controller::finalizers::{has_finalizer, DEFAULT_FINALIZER};
    use crate::controller::labels::{
        owner_reference, set_controller_reference, VersionLabels, DEFAULT_CREATE_VERSION_LABEL,
        DEFAULT_UPDATE_VERSION_LABEL,
    };
    use crate::controller::manager::CrManager;
    use crate::controller::memory_store::InMemoryStore;
    use crate::controller::owned::OwnedResource;
    use crate::controller::reconciler::{ReconcileResult, Reconciler, ReconcilerConfig};
    use crate::controller::store::{from_dynamic, to_dynamic, ObjectKey, ResourceKind, Store};
    use crate::crd::{ComponentConfig, ComponentConfigSpec, Phase, Status};
    use crate::error::{Error, Result};

    const NAME: &str = "config";
    const NS: &str = "lifecycle-system";
    const APP: &str = "app";
    const V1: &str = "v1.0.0";
    const V2: &str = "v2.0.0";

    // -----------------------------------------------------------------------
    // Managers and dispatchers
    // -----------------------------------------------------------------------

    /// Desired set keyed on the target version: `settings-a` and one replica
    /// before v2, `settings-b` and two replicas from v2 on
    #[derive(Default)]
    struct VersionedManager;

    fn status_of(cr: &ComponentConfig) -> Option<&Status> {
        cr.status.as_ref().map(|s| &s.status)
    }

    impl CrManager for VersionedManager {
        type Resource = ComponentConfig;

        fn is_creating(&self, _cr: &ComponentConfig) -> Result<bool> {
            Ok(false)
        }

        fn new_empty(&self) -> ComponentConfig {
            ComponentConfig::new("", ComponentConfigSpec::default())
        }

        fn status<'a>(&self, cr: &'a ComponentConfig) -> Option<&'a Status> {
            status_of(cr)
        }

        fn status_mut<'a>(&self, cr: &'a mut ComponentConfig) -> &'a mut Status {
            &mut cr.status.get_or_insert_with(Default::default).status
        }

        fn all_resources(&self, cr: &ComponentConfig) -> Result<Vec<OwnedResource>> {
            let target = status_of(cr).map(|s| s.target_version.as_str()).unwrap_or("");
            let (settings, image, replicas) = if target == V2 {
                ("settings-b", "registry.local/app:2.0", 2)
            } else {
                ("settings-a", "registry.local/app:1.0", 1)
            };
            Ok(vec![
                config_map(settings).into(),
                deployment(image, replicas).into(),
            ])
        }

        fn dependent_resource_kinds(&self) -> Vec<ResourceKind> {
            vec![
                ResourceKind::of::<ConfigMap>(),
                ResourceKind::of::<Deployment>(),
                ResourceKind::of::<CustomResourceDefinition>(),
            ]
        }
    }

    type Events = Arc<Mutex<Vec<(ReconcileState, String, String)>>>;

    /// Records every mutation the convergence engine announces
    #[derive(Default)]
    struct Recorder {
        events: Events,
    }

    #[async_trait]
    impl CallbackDispatcher<ComponentConfig> for Recorder {
        fn register(&mut self, _kind: ResourceKind, _cb: Arc<dyn ReconcileCallback<ComponentConfig>>) {}

        async fn invoke(&self, args: &CallbackArgs<'_, ComponentConfig>) -> Result<()> {
            let name = args
                .desired
                .or(args.current)
                .and_then(|o| o.metadata.name.clone())
                .unwrap_or_default();
            self.events
                .lock()
                .unwrap()
                .push((args.state, args.kind.kind.clone(), name));
            Ok(())
        }
    }

    /// Touches the managed resource after a create, so the pass that made the
    /// create holds a stale copy
    struct TouchOwner;

    #[async_trait]
    impl ReconcileCallback<ComponentConfig> for TouchOwner {
        async fn call(&self, args: &CallbackArgs<'_, ComponentConfig>) -> Result<()> {
            if args.state != ReconcileState::PostCreate {
                return Ok(());
            }
            let mut owner = args.store.get(&cr_key()).await?;
            owner
                .metadata
                .labels
                .get_or_insert_with(Default::default)
                .insert("touched".to_string(), "true".to_string());
            args.store.update(&cr_kind(), &owner).await?;
            Ok(())
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn meta(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NS.to_string()),
            ..Default::default()
        }
    }

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: meta(name),
            data: Some([("mode".to_string(), name.to_string())].into()),
            ..Default::default()
        }
    }

    fn deployment(image: &str, replicas: i32) -> Deployment {
        Deployment {
            metadata: meta(APP),
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: APP.to_string(),
                            image: Some(image.to_string()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        }
    }

    fn cr_kind() -> ResourceKind {
        ResourceKind::of::<ComponentConfig>()
    }

    fn cr_key() -> ObjectKey {
        ObjectKey::new(cr_kind(), None, NAME)
    }

    fn cm_key(name: &str) -> ObjectKey {
        ObjectKey::new(ResourceKind::of::<ConfigMap>(), Some(NS.to_string()), name)
    }

    fn deploy_key(name: &str) -> ObjectKey {
        ObjectKey::new(ResourceKind::of::<Deployment>(), Some(NS.to_string()), name)
    }

    fn label(obj: &DynamicObject, key: &str) -> Option<String> {
        obj.metadata.labels.as_ref().and_then(|l| l.get(key).cloned())
    }

    async fn seeded_store() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        let cr = ComponentConfig::new(NAME, ComponentConfigSpec::default());
        store
            .create(&cr_kind(), &to_dynamic(&cr).unwrap())
            .await
            .unwrap();
        store
    }

    async fn harness() -> (Arc<InMemoryStore>, Reconciler<VersionedManager, Recorder>, Events) {
        let store = seeded_store().await;
        let recorder = Recorder::default();
        let events = recorder.events.clone();
        let reconciler = Reconciler::new(
            VersionedManager,
            store.clone(),
            recorder,
            ReconcilerConfig::default(),
        );
        (store, reconciler, events)
    }

    async fn load(store: &InMemoryStore) -> ComponentConfig {
        from_dynamic(&store.get(&cr_key()).await.unwrap()).unwrap()
    }

    async fn status(store: &InMemoryStore) -> Status {
        status_of(&load(store).await).cloned().unwrap_or_default()
    }

    /// Report the deployment as fully rolled out at `replicas`
    async fn mark_ready(store: &InMemoryStore, name: &str, replicas: i32) {
        let mut obj = store.get(&deploy_key(name)).await.unwrap();
        obj.data["status"] = json!({ "replicas": replicas, "readyReplicas": replicas });
        store
            .update_status(&ResourceKind::of::<Deployment>(), &obj)
            .await
            .unwrap();
    }

    async fn set_finalizers(store: &InMemoryStore, key: &ObjectKey, finalizers: &[&str]) {
        let mut obj = store.get(key).await.unwrap();
        obj.metadata.finalizers = Some(finalizers.iter().map(|f| f.to_string()).collect());
        store.update(&key.kind, &obj).await.unwrap();
    }

    /// Persist a status forced to `Deployed` at `version`
    async fn force_version<D>(store: &InMemoryStore, reconciler: &Reconciler<VersionedManager, D>, version: &str)
    where
        D: CallbackDispatcher<ComponentConfig>,
    {
        let before = load(store).await;
        let mut after = before.clone();
        reconciler.set_version(&mut after, version).unwrap();
        reconciler.save(&before, &after).await.unwrap();
    }

    async fn deploy<D>(store: &InMemoryStore, reconciler: &Reconciler<VersionedManager, D>, version: &str)
    where
        D: CallbackDispatcher<ComponentConfig>,
    {
        reconciler.reconcile(NAME, version).await.unwrap();
        let replicas = if version == V2 { 2 } else { 1 };
        mark_ready(store, APP, replicas).await;
        reconciler.reconcile(NAME, version).await.unwrap();
        assert_eq!(status(store).await.phase, Some(Phase::Deployed));
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_initialize_sets_deploying_and_finalizer() {
        let (_store, reconciler, _) = harness().await;
        let mut cr = ComponentConfig::new(NAME, ComponentConfigSpec::default());
        reconciler.initialize(&mut cr, V1).unwrap();

        let status = status_of(&cr).unwrap();
        assert_eq!(status.phase, Some(Phase::Deploying));
        assert_eq!(status.target_version, V1);
        assert_eq!(status.operator_version, V1);
        assert_eq!(status.observed_version, "");
        assert!(has_finalizer(&cr, DEFAULT_FINALIZER));
    }

    #[tokio::test]
    async fn test_set_error_keeps_versions() {
        let (_store, reconciler, _) = harness().await;
        let mut cr = ComponentConfig::new(NAME, ComponentConfigSpec::default());
        reconciler.set_version(&mut cr, V1).unwrap();
        reconciler.set_error(&mut cr).unwrap();

        let status = status_of(&cr).unwrap();
        assert_eq!(status.phase, Some(Phase::Error));
        assert_eq!(status.observed_version, V1);
        assert_eq!(status.target_version, V1);
    }

    #[tokio::test]
    async fn test_missing_resource_is_a_noop() {
        let store = Arc::new(InMemoryStore::new());
        let reconciler = Reconciler::with_registry(
            VersionedManager,
            store.clone(),
            ReconcilerConfig::default(),
        );

        let result = reconciler.reconcile("gone", V1).await.unwrap();
        assert_eq!(result, ReconcileResult::done());
        assert_eq!(store.writes().await, 0);
    }

    // -----------------------------------------------------------------------
    // Deploy
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_first_pass_initializes_and_creates_resources() {
        let (store, reconciler, _) = harness().await;

        let result = reconciler.reconcile(NAME, V1).await.unwrap();
        assert_eq!(result, ReconcileResult::done());

        let cr = load(&store).await;
        assert!(has_finalizer(&cr, DEFAULT_FINALIZER));
        let status = status_of(&cr).unwrap();
        assert_eq!(status.phase, Some(Phase::Deploying));
        assert_eq!(status.target_version, V1);
        assert_eq!(status.observed_version, "");

        let available = find_condition(&status.conditions, CONDITION_TYPE_AVAILABLE).unwrap();
        assert_eq!(available.status, CONDITION_STATUS_FALSE);
        let progressing = find_condition(&status.conditions, CONDITION_TYPE_PROGRESSING).unwrap();
        assert_eq!(progressing.status, CONDITION_STATUS_TRUE);
        assert_eq!(progressing.reason, REASON_DEPLOY_STARTED);

        let cm = store.get(&cm_key("settings-a")).await.unwrap();
        assert_eq!(label(&cm, DEFAULT_CREATE_VERSION_LABEL).as_deref(), Some(V1));
        assert!(store.get(&deploy_key(APP)).await.is_ok());
    }

    #[tokio::test]
    async fn test_deploy_completes_once_workload_is_ready() {
        let (store, reconciler, _) = harness().await;
        reconciler.reconcile(NAME, V1).await.unwrap();

        // still rolling out
        reconciler.reconcile(NAME, V1).await.unwrap();
        assert_eq!(status(&store).await.phase, Some(Phase::Deploying));

        mark_ready(&store, APP, 1).await;
        reconciler.reconcile(NAME, V1).await.unwrap();

        let status = status(&store).await;
        assert_eq!(status.phase, Some(Phase::Deployed));
        assert_eq!(status.observed_version, V1);
        assert_eq!(status.target_version, V1);
        assert_eq!(status.operator_version, V1);
        let available = find_condition(&status.conditions, CONDITION_TYPE_AVAILABLE).unwrap();
        assert_eq!(available.status, CONDITION_STATUS_TRUE);

        assert_eq!(store.count(&ResourceKind::of::<ConfigMap>()).await, 1);
        assert_eq!(store.count(&ResourceKind::of::<Deployment>()).await, 1);
    }

    #[tokio::test]
    async fn test_converged_pass_performs_no_writes() {
        let (store, reconciler, events) = harness().await;
        deploy(&store, &reconciler, V1).await;

        let writes = store.writes().await;
        let before = status(&store).await;
        let seen = events.lock().unwrap().len();

        let result = reconciler.reconcile(NAME, V1).await.unwrap();
        assert_eq!(result, ReconcileResult::done());
        assert_eq!(store.writes().await, writes);
        assert_eq!(status(&store).await, before);
        assert_eq!(events.lock().unwrap().len(), seen);
    }

    #[tokio::test]
    async fn test_component_config_deploys_every_resource() {
        let store = seeded_store().await;
        let reconciler = Reconciler::with_registry(
            ComponentConfigManager::new(),
            store.clone(),
            ReconcilerConfig::default(),
        );

        reconciler.reconcile(NAME, V1).await.unwrap();
        assert_eq!(store.count(&ResourceKind::of::<ConfigMap>()).await, 1);
        assert_eq!(
            store
                .count(&ResourceKind::of::<k8s_openapi::api::core::v1::Service>())
                .await,
            1
        );
        assert_eq!(
            store
                .count(&ResourceKind::of::<k8s_openapi::api::core::v1::ServiceAccount>())
                .await,
            1
        );

        mark_ready(&store, NAME, 1).await;
        reconciler.reconcile(NAME, V1).await.unwrap();
        assert_eq!(status(&store).await.phase, Some(Phase::Deployed));

        let writes = store.writes().await;
        reconciler.reconcile(NAME, V1).await.unwrap();
        assert_eq!(store.writes().await, writes);
    }

    #[tokio::test]
    async fn test_callbacks_see_every_mutation_in_order() {
        let (_store, reconciler, events) = harness().await;
        reconciler.reconcile(NAME, V1).await.unwrap();

        let expected = vec![
            (ReconcileState::PreCreate, "ConfigMap", "settings-a"),
            (ReconcileState::PostCreate, "ConfigMap", "settings-a"),
            (ReconcileState::PreCreate, "Deployment", APP),
            (ReconcileState::PostCreate, "Deployment", APP),
        ];
        let seen = events.lock().unwrap().clone();
        assert_eq!(seen.len(), expected.len());
        for ((state, kind, name), (want_state, want_kind, want_name)) in seen.iter().zip(expected) {
            assert_eq!(*state, want_state);
            assert_eq!(kind, want_kind);
            assert_eq!(name, want_name);
        }
    }

    // -----------------------------------------------------------------------
    // Upgrades
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_upgrade_decisions_from_deployed() {
        let upgrades = [
            ("v1.9.5", "v1.10.0"),
            ("1.9.5", "1.10.0"),
            ("devel", "v1.9.5"),
        ];
        for (observed, operator) in upgrades {
            let (store, reconciler, _) = harness().await;
            force_version(&store, &reconciler, observed).await;

            reconciler.reconcile(NAME, operator).await.unwrap();
            let status = status(&store).await;
            assert_eq!(status.phase, Some(Phase::Upgrading), "{observed} -> {operator}");
            assert_eq!(status.target_version, operator);
            assert_eq!(status.operator_version, operator);
            assert_eq!(status.observed_version, observed);
        }
    }

    #[tokio::test]
    async fn test_no_upgrade_from_deployed() {
        let same = [("v1.10.0", "v1.10.0"), ("devel", "devel"), ("1.2.3", "v1.2.3")];
        for (observed, operator) in same {
            let (store, reconciler, _) = harness().await;
            force_version(&store, &reconciler, observed).await;

            reconciler.reconcile(NAME, operator).await.unwrap();
            let status = status(&store).await;
            assert_eq!(status.phase, Some(Phase::Deployed), "{observed} -> {operator}");
            assert_eq!(status.target_version, observed);
        }
    }

    #[tokio::test]
    async fn test_downgrade_leaves_status_untouched() {
        let (store, reconciler, _) = harness().await;
        force_version(&store, &reconciler, "v1.10.0").await;
        let before = status(&store).await;
        let writes = store.writes().await;

        let err = reconciler.reconcile(NAME, "v1.9.5").await.unwrap_err();
        assert!(matches!(err, Error::DowngradeRejected { .. }));
        assert!(!err.is_retriable());
        assert_eq!(status(&store).await, before);
        assert_eq!(store.writes().await, writes);
    }

    #[tokio::test]
    async fn test_error_phase_is_left_alone_until_an_upgrade() {
        let (store, reconciler, _) = harness().await;
        deploy(&store, &reconciler, V1).await;

        let before = load(&store).await;
        let mut after = before.clone();
        reconciler.set_error(&mut after).unwrap();
        reconciler.save(&before, &after).await.unwrap();

        let writes = store.writes().await;
        reconciler.reconcile(NAME, V1).await.unwrap();
        assert_eq!(status(&store).await.phase, Some(Phase::Error));
        assert_eq!(store.writes().await, writes);

        reconciler.reconcile(NAME, V2).await.unwrap();
        assert_eq!(status(&store).await.phase, Some(Phase::Upgrading));
    }

    #[tokio::test]
    async fn test_upgrade_restores_drift_and_removes_orphans() {
        let (store, reconciler, _) = harness().await;
        deploy(&store, &reconciler, V1).await;
        let cr = load(&store).await;

        // an owned CRD from the old version and a resource created at the new one
        let crd_kind = ResourceKind::of::<CustomResourceDefinition>();
        let mut crd = to_dynamic(&CustomResourceDefinition {
            metadata: ObjectMeta {
                name: Some("widgets.example.io".to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();
        VersionLabels::default().stamp_created(&mut crd.metadata, V1);
        set_controller_reference(&mut crd.metadata, owner_reference(&cr).unwrap());
        store.create(&crd_kind, &crd).await.unwrap();

        let mut fresh = to_dynamic(&config_map("fresh")).unwrap();
        VersionLabels::default().stamp_created(&mut fresh.metadata, V2);
        set_controller_reference(&mut fresh.metadata, owner_reference(&cr).unwrap());
        store
            .create(&ResourceKind::of::<ConfigMap>(), &fresh)
            .await
            .unwrap();

        // external edit of a managed field
        let mut live = store.get(&deploy_key(APP)).await.unwrap();
        live.data["spec"]["replicas"] = json!(5);
        store
            .update(&ResourceKind::of::<Deployment>(), &live)
            .await
            .unwrap();

        reconciler.reconcile(NAME, V2).await.unwrap();
        let status_mid = status(&store).await;
        assert_eq!(status_mid.phase, Some(Phase::Upgrading));
        assert_eq!(status_mid.observed_version, V1);
        // no sweep before the upgrade completes
        assert!(store.get(&cm_key("settings-a")).await.is_ok());

        mark_ready(&store, APP, 2).await;
        reconciler.reconcile(NAME, V2).await.unwrap();

        let status = status(&store).await;
        assert_eq!(status.phase, Some(Phase::Deployed));
        assert_eq!(status.observed_version, V2);

        let dep: Deployment = from_dynamic(&store.get(&deploy_key(APP)).await.unwrap()).unwrap();
        let spec = dep.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));
        assert_eq!(
            spec.template.spec.unwrap().containers[0].image.as_deref(),
            Some("registry.local/app:2.0")
        );
        let labels = dep.metadata.labels.unwrap();
        assert_eq!(labels[DEFAULT_CREATE_VERSION_LABEL], V1);
        assert_eq!(labels[DEFAULT_UPDATE_VERSION_LABEL], V2);

        assert!(store.get(&cm_key("settings-a")).await.unwrap_err().is_not_found());
        assert_eq!(store.count(&crd_kind).await, 0);
        assert!(store.get(&cm_key("settings-b")).await.is_ok());
        assert!(store.get(&cm_key("fresh")).await.is_ok());
    }

    // -----------------------------------------------------------------------
    // Deletion
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_delete_removes_owned_resources_then_the_resource() {
        let (store, reconciler, _) = harness().await;
        deploy(&store, &reconciler, V1).await;

        store.delete(&cr_key()).await.unwrap();
        let result = reconciler.reconcile(NAME, V1).await.unwrap();

        assert_eq!(result, ReconcileResult::done());
        assert!(store.get(&cr_key()).await.unwrap_err().is_not_found());
        assert_eq!(store.count(&ResourceKind::of::<ConfigMap>()).await, 0);
        assert_eq!(store.count(&ResourceKind::of::<Deployment>()).await, 0);
    }

    #[tokio::test]
    async fn test_delete_during_upgrade_freezes_observed_version() {
        let (store, reconciler, _) = harness().await;
        deploy(&store, &reconciler, V1).await;
        reconciler.reconcile(NAME, V2).await.unwrap();
        assert_eq!(status(&store).await.phase, Some(Phase::Upgrading));

        set_finalizers(&store, &cr_key(), &[DEFAULT_FINALIZER, "example.io/hold"]).await;
        set_finalizers(&store, &deploy_key(APP), &["example.io/drain"]).await;
        store.delete(&cr_key()).await.unwrap();

        // the deployment lingers behind its own finalizer
        let result = reconciler.reconcile(NAME, V2).await.unwrap();
        assert_eq!(
            result,
            ReconcileResult::requeue_after(Duration::from_secs(10))
        );
        let cr = load(&store).await;
        assert!(has_finalizer(&cr, DEFAULT_FINALIZER));
        let status = status_of(&cr).unwrap();
        assert_eq!(status.phase, Some(Phase::Deleted));
        assert_eq!(status.observed_version, V1);
        assert_eq!(store.count(&ResourceKind::of::<ConfigMap>()).await, 0);

        set_finalizers(&store, &deploy_key(APP), &[]).await;
        let result = reconciler.reconcile(NAME, V2).await.unwrap();
        assert_eq!(result, ReconcileResult::done());

        let cr = load(&store).await;
        assert_eq!(cr.metadata.finalizers, Some(vec!["example.io/hold".to_string()]));
        let status = status_of(&cr).unwrap();
        assert_eq!(status.phase, Some(Phase::Deleted));
        assert_eq!(status.observed_version, V1);
        assert_eq!(store.count(&ResourceKind::of::<Deployment>()).await, 0);

        // nothing left for us to do
        let writes = store.writes().await;
        reconciler.reconcile(NAME, V2).await.unwrap();
        assert_eq!(store.writes().await, writes);

        set_finalizers(&store, &cr_key(), &[]).await;
        assert!(store.get(&cr_key()).await.unwrap_err().is_not_found());
    }

    // -----------------------------------------------------------------------
    // Concurrency
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_concurrent_edit_surfaces_a_retriable_conflict() {
        let store = seeded_store().await;
        let mut reconciler = Reconciler::with_registry(
            VersionedManager,
            store.clone(),
            ReconcilerConfig::default(),
        );
        reconciler.add_callback(ResourceKind::of::<Deployment>(), Arc::new(TouchOwner));

        let err = reconciler.reconcile(NAME, V1).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(err.is_retriable());

        // a fresh pass starts from the current copy and gets through
        reconciler.reconcile(NAME, V1).await.unwrap();
        let cr = load(&store).await;
        assert_eq!(cr.labels()["touched"], "true");
        assert_eq!(status_of(&cr).unwrap().phase, Some(Phase::Deploying));
    }
}
