use std::error::Error;
use std::io::Write;
use std::process::{Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use controller_lifecycle::crd::ComponentConfig;
use kube::CustomResourceExt;

const OPERATOR_NAMESPACE: &str = "lifecycle-operator";
const COMPONENT_NAMESPACE: &str = "lifecycle-system";
const OPERATOR_NAME: &str = "lifecycle-operator";
const CONFIG_NAME: &str = "e2e-component";

// ---------------------------------------------------------------------------
// Full lifecycle on a real Kind cluster: deploy, upgrade, delete.
//
// Run with: cargo test --test e2e_kind -- --ignored
// ---------------------------------------------------------------------------

/// 1. Start (or reuse) a Kind cluster and install the ComponentConfig CRD.
/// 2. Run the operator at v1.0.0 and apply a ComponentConfig.
/// 3. Wait for the owned resources and `status.phase == Deployed`.
/// 4. Move the operator to v1.1.0 and wait for `observedVersion` to follow.
/// 5. Delete the ComponentConfig and verify the owned resources are gone.
#[test]
#[ignore]
fn e2e_component_config_lifecycle() -> Result<(), Box<dyn Error>> {
    for tool in &["kind", "kubectl", "docker"] {
        if !tool_available(tool) {
            eprintln!("Skipping e2e test: `{tool}` not found in PATH.");
            return Ok(());
        }
    }

    let cluster_name =
        std::env::var("KIND_CLUSTER_NAME").unwrap_or_else(|_| "lifecycle-e2e".into());
    ensure_kind_cluster(&cluster_name)?;

    kubectl_apply(&serde_yaml::to_string(&ComponentConfig::crd())?)?;

    let image =
        std::env::var("E2E_OPERATOR_IMAGE").unwrap_or_else(|_| "lifecycle-operator:e2e".into());
    if env_true("E2E_BUILD_IMAGE", true) {
        run_cmd("docker", &["build", "-t", &image, "."])?;
    }
    if env_true("E2E_LOAD_IMAGE", true) {
        run_cmd(
            "kind",
            &["load", "docker-image", &image, "--name", &cluster_name],
        )?;
    }

    let operator_yaml = operator_manifest(&image, "v1.0.0");
    let _cleanup = Cleanup {
        operator_manifest: operator_yaml.clone(),
    };
    kubectl_apply(&namespace_manifest(OPERATOR_NAMESPACE))?;
    kubectl_apply(&namespace_manifest(COMPONENT_NAMESPACE))?;
    kubectl_apply(&operator_yaml)?;
    run_cmd(
        "kubectl",
        &[
            "rollout",
            "status",
            &format!("deployment/{}", OPERATOR_NAME),
            "-n",
            OPERATOR_NAMESPACE,
            "--timeout=180s",
        ],
    )?;

    kubectl_apply(&component_manifest())?;

    for (kind, name) in [
        ("serviceaccount", CONFIG_NAME.to_string()),
        ("configmap", format!("{}-settings", CONFIG_NAME)),
        ("deployment", CONFIG_NAME.to_string()),
        ("service", CONFIG_NAME.to_string()),
    ] {
        wait_for(&format!("{kind} created"), Duration::from_secs(90), || {
            Ok(run_cmd("kubectl", &["get", kind, &name, "-n", COMPONENT_NAMESPACE]).is_ok())
        })?;
    }

    wait_for("phase == Deployed", Duration::from_secs(180), || {
        Ok(config_field("{.status.phase}") == "Deployed")
    })?;
    assert_eq!(config_field("{.status.observedVersion}"), "v1.0.0");

    // upgrade by restarting the operator at a newer version
    run_cmd(
        "kubectl",
        &[
            "set",
            "env",
            &format!("deployment/{}", OPERATOR_NAME),
            "-n",
            OPERATOR_NAMESPACE,
            "OPERATOR_VERSION=v1.1.0",
        ],
    )?;
    wait_for("observedVersion == v1.1.0", Duration::from_secs(180), || {
        Ok(config_field("{.status.observedVersion}") == "v1.1.0"
            && config_field("{.status.phase}") == "Deployed")
    })?;
    let create_label = run_cmd(
        "kubectl",
        &[
            "get",
            "deployment",
            CONFIG_NAME,
            "-n",
            COMPONENT_NAMESPACE,
            "-o",
            r#"jsonpath={.metadata.labels.lifecycle\.example\.io/create-version}"#,
        ],
    )?;
    assert_eq!(create_label, "v1.0.0");

    run_cmd(
        "kubectl",
        &[
            "delete",
            "componentconfig",
            CONFIG_NAME,
            "--timeout=180s",
            "--wait=true",
        ],
    )?;
    wait_for("owned resources removed", Duration::from_secs(90), || {
        let deployment = run_cmd(
            "kubectl",
            &["get", "deployment", CONFIG_NAME, "-n", COMPONENT_NAMESPACE],
        );
        let service = run_cmd(
            "kubectl",
            &["get", "service", CONFIG_NAME, "-n", COMPONENT_NAMESPACE],
        );
        Ok(deployment.is_err() && service.is_err())
    })?;

    Ok(())
}

fn config_field(jsonpath: &str) -> String {
    run_cmd(
        "kubectl",
        &[
            "get",
            "componentconfig",
            CONFIG_NAME,
            "-o",
            &format!("jsonpath={}", jsonpath),
        ],
    )
    .unwrap_or_default()
}

fn component_manifest() -> String {
    format!(
        r#"apiVersion: lifecycle.example.io/v1alpha1
kind: ComponentConfig
metadata:
  name: {name}
spec:
  namespace: {namespace}
  image: registry.k8s.io/pause:3.9
  replicas: 1
  port: 8443
  settings:
    mode: e2e
"#,
        name = CONFIG_NAME,
        namespace = COMPONENT_NAMESPACE,
    )
}

fn namespace_manifest(name: &str) -> String {
    format!("apiVersion: v1\nkind: Namespace\nmetadata:\n  name: {name}\n")
}

fn operator_manifest(image: &str, version: &str) -> String {
    format!(
        r#"---
apiVersion: v1
kind: ServiceAccount
metadata:
  name: {operator_name}
  namespace: {operator_namespace}
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: {operator_name}
rules:
  - apiGroups: ["lifecycle.example.io"]
    resources: ["componentconfigs", "componentconfigs/status", "componentconfigs/finalizers"]
    verbs: ["get", "list", "watch", "update", "patch"]
  - apiGroups: [""]
    resources: ["serviceaccounts", "configmaps", "services"]
    verbs: ["get", "list", "watch", "create", "update", "patch", "delete"]
  - apiGroups: ["apps"]
    resources: ["deployments"]
    verbs: ["get", "list", "watch", "create", "update", "patch", "delete"]
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: {operator_name}
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: {operator_name}
subjects:
  - kind: ServiceAccount
    name: {operator_name}
    namespace: {operator_namespace}
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: {operator_name}
  namespace: {operator_namespace}
spec:
  replicas: 1
  selector:
    matchLabels:
      app: {operator_name}
  template:
    metadata:
      labels:
        app: {operator_name}
    spec:
      serviceAccountName: {operator_name}
      containers:
        - name: operator
          image: {image}
          imagePullPolicy: IfNotPresent
          args: ["run"]
          env:
            - name: OPERATOR_VERSION
              value: {version}
"#,
        operator_name = OPERATOR_NAME,
        operator_namespace = OPERATOR_NAMESPACE,
        image = image,
        version = version,
    )
}

/// Removes everything the test created, pass or fail
struct Cleanup {
    operator_manifest: String,
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        let _ = run_cmd(
            "kubectl",
            &[
                "delete",
                "componentconfig",
                CONFIG_NAME,
                "--ignore-not-found=true",
                "--timeout=60s",
            ],
        );
        let _ = run_cmd_with_stdin("kubectl", &["delete", "-f", "-"], &self.operator_manifest);
        for ns in [COMPONENT_NAMESPACE, OPERATOR_NAMESPACE] {
            let _ = run_cmd(
                "kubectl",
                &["delete", "namespace", ns, "--ignore-not-found=true"],
            );
        }
    }
}

/// Returns true if the given binary is accessible in PATH.
fn tool_available(binary: &str) -> bool {
    Command::new(binary)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

fn ensure_kind_cluster(name: &str) -> Result<(), Box<dyn Error>> {
    let clusters = run_cmd("kind", &["get", "clusters"])?;
    if clusters.lines().any(|line| line.trim() == name) {
        return Ok(());
    }
    run_cmd("kind", &["create", "cluster", "--name", name])?;
    Ok(())
}

fn kubectl_apply(manifest: &str) -> Result<(), Box<dyn Error>> {
    run_cmd_with_stdin("kubectl", &["apply", "-f", "-"], manifest)?;
    Ok(())
}

fn command(program: &str, args: &[&str]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Ok(kubeconfig) = std::env::var("KUBECONFIG") {
        cmd.env("KUBECONFIG", kubeconfig);
    }
    cmd
}

fn check(program: &str, args: &[&str], output: &std::process::Output) -> Result<(), Box<dyn Error>> {
    if output.status.success() {
        return Ok(());
    }
    Err(format!(
        "command failed: {} {:?}\nstdout:\n{}\nstderr:\n{}",
        program,
        args,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
    .into())
}

fn run_cmd(program: &str, args: &[&str]) -> Result<String, Box<dyn Error>> {
    let output = command(program, args).output()?;
    check(program, args, &output)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn run_cmd_with_stdin(program: &str, args: &[&str], input: &str) -> Result<(), Box<dyn Error>> {
    let mut child = command(program, args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input.as_bytes())?;
    }
    let output = child.wait_with_output()?;
    check(program, args, &output)
}

fn wait_for<F>(label: &str, timeout: Duration, mut condition: F) -> Result<(), Box<dyn Error>>
where
    F: FnMut() -> Result<bool, Box<dyn Error>>,
{
    let start = Instant::now();
    let mut attempts: u32 = 0;
    loop {
        if condition()? {
            return Ok(());
        }
        attempts += 1;
        if start.elapsed() > timeout {
            return Err(format!(
                "timeout while waiting for {} after {:?} (attempts={})",
                label, timeout, attempts
            )
            .into());
        }
        sleep(Duration::from_secs(3));
    }
}

fn env_true(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(
            value.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}
