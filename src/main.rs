use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use controller_lifecycle::controller::{
    self, labels, ComponentConfigManager, CrManager, DryRunStore, InMemoryStore, KubeStore,
    Reconciler, ReconcilerConfig, Store, VersionLabels,
};
use controller_lifecycle::{crd::ComponentConfig, Error};
use kube::ResourceExt;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version and build information
    Version,
    /// Show the managed ComponentConfigs on the cluster
    Info,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Plain,
    Json,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Version the managed resources are deployed and upgraded to
    #[arg(long, env = "OPERATOR_VERSION", default_value = env!("CARGO_PKG_VERSION"))]
    operator_version: String,

    /// Finalizer placed on managed resources
    #[arg(long, env = "FINALIZER", default_value = controller::DEFAULT_FINALIZER)]
    finalizer: String,

    /// Label recording the operator version an owned resource was created at
    #[arg(long, default_value = labels::DEFAULT_CREATE_VERSION_LABEL)]
    create_version_label: String,

    /// Label recording the operator version an owned resource was last updated at
    #[arg(long, default_value = labels::DEFAULT_UPDATE_VERSION_LABEL)]
    update_version_label: String,

    /// Annotation holding the last applied owned-resource description
    #[arg(long, default_value = labels::DEFAULT_LAST_APPLIED_ANNOTATION)]
    last_applied_annotation: String,

    /// Seconds to wait before checking again on owned resources still being deleted
    #[arg(long, env = "REQUEUE_AFTER_SECS", default_value_t = 10)]
    requeue_after_secs: u64,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Plain)]
    log_format: LogFormat,

    /// Port of the REST API serving /health and /metrics
    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    metrics_port: u16,

    /// Run in dry-run mode (owned resources are kept in memory, not applied)
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,
}

impl RunArgs {
    fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            finalizer: self.finalizer.clone(),
            labels: VersionLabels {
                create_version: self.create_version_label.clone(),
                update_version: self.update_version_label.clone(),
                last_applied: self.last_applied_annotation.clone(),
            },
            requeue_after: Duration::from_secs(self.requeue_after_secs),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("controller-lifecycle v{}", env!("CARGO_PKG_VERSION"));
            println!("Build Date: {}", env!("BUILD_DATE"));
            println!("Git SHA: {}", env!("GIT_SHA"));
            println!("Rust Version: {}", env!("RUST_VERSION"));
            Ok(())
        }
        Commands::Info => run_info().await,
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

async fn run_info() -> Result<(), Error> {
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    let api: kube::Api<ComponentConfig> = kube::Api::all(client);
    let configs = api
        .list(&Default::default())
        .await
        .map_err(Error::KubeError)?;

    let manager = ComponentConfigManager::new();
    println!("Managed ComponentConfigs: {}", configs.items.len());
    for config in &configs.items {
        let status = manager.status(config).cloned().unwrap_or_default();
        println!(
            "  {} phase={} observed={} target={}",
            config.name_any(),
            status
                .phase
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            status.observed_version,
            status.target_version,
        );
    }
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).init(),
        LogFormat::Plain => registry.with(fmt::layer().with_target(true)).init(),
    }
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    init_tracing(args.log_format);

    info!(
        "Starting controller-lifecycle operator v{} (target version {})",
        env!("CARGO_PKG_VERSION"),
        args.operator_version
    );

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;
    info!("Connected to Kubernetes cluster");

    let manager = ComponentConfigManager::new();
    let cluster: Arc<dyn Store> = Arc::new(KubeStore::new(client.clone()));
    let store: Arc<dyn Store> = if args.dry_run {
        warn!("Dry-run mode: owned resources are kept in memory and never applied");
        Arc::new(DryRunStore::new(
            manager.resource_kind(),
            cluster,
            Arc::new(InMemoryStore::new()),
        ))
    } else {
        cluster
    };

    let reconciler = Reconciler::with_registry(manager, store.clone(), args.reconciler_config());
    let state = Arc::new(controller::ControllerState {
        client,
        reconciler: Arc::new(reconciler),
        operator_version: args.operator_version.clone(),
    });

    #[cfg(feature = "rest-api")]
    {
        let api_state = Arc::new(controller_lifecycle::rest_api::ApiState::new(store));
        let port = args.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = controller_lifecycle::rest_api::run_server(api_state, port).await {
                tracing::error!("REST API server error: {:?}", e);
            }
        });
    }
    #[cfg(not(feature = "rest-api"))]
    info!(
        "REST API disabled, port {} left unused",
        args.metrics_port
    );

    controller::run_controller(state).await
}
