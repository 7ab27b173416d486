//! liqo-shortcut - command line entry point
//!
//! Manages ForeignClusterConnection declarations between Liqo foreign
//! clusters and deploys the connector with its fleet-wide access policy.

use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use kube::{Client, ResourceExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::{fmt, EnvFilter};

use liqo_shortcut::apply::{DeclarativeApplier, KubeApplier, KubectlApplier};
use liqo_shortcut::config::{self, ApplierKind, Settings, ShortcutRequest};
use liqo_shortcut::crd::{
    GatewayClientConfig, GatewayServerConfig, NetworkingConfig, ServiceType, DEFAULT_GW_CLIENT_TEMPLATE,
    DEFAULT_GW_CLIENT_TYPE, DEFAULT_GW_SERVER_PORT, DEFAULT_GW_SERVER_TEMPLATE, DEFAULT_GW_SERVER_TYPE,
    DEFAULT_MTU, DEFAULT_TEMPLATE_NAMESPACE, DEFAULT_TIMEOUT_SECONDS,
};
use liqo_shortcut::{
    AccessPolicyDistributor, ClusterRegistry, Convergence, CredentialBroker, Fleet, FleetReport,
    KubeConnections, KubeForeignClusters, KubeSecrets, ManifestLifecycle, ShortcutError,
    ShortcutRegistry,
};

/// Shortcut connections between Liqo foreign clusters
#[derive(Parser, Debug)]
#[command(name = "liqo-shortcut", version, about)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Kubeconfig of the primary cluster
    #[arg(long, global = true, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Prefix of the tenant namespace holding each cluster's credential
    #[arg(long, global = true, default_value = config::DEFAULT_TENANT_PREFIX)]
    tenant_prefix: String,

    /// Prefix of the credential secret name
    #[arg(long, global = true, default_value = config::DEFAULT_CREDENTIAL_PREFIX)]
    credential_prefix: String,

    /// Key of the kubeconfig inside the credential secret
    #[arg(long, global = true, default_value = config::DEFAULT_CREDENTIAL_KEY)]
    credential_key: String,

    /// Directory for decoded credentials (defaults to the OS temp dir)
    #[arg(long, global = true, env = "LIQO_SHORTCUT_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Kustomization of the connector control plane
    #[arg(long, global = true, default_value = config::DEFAULT_MANIFEST_REF)]
    manifest_ref: String,

    /// How manifests are submitted
    #[arg(long, global = true, value_enum, default_value_t = ApplierArg::Kubectl)]
    applier: ApplierArg,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ApplierArg {
    Kubectl,
    Native,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered foreign clusters
    Foreignclusters,

    /// Check whether a foreign cluster with the given cluster ID exists
    ForeignclusterExists {
        /// ClusterID to look up
        #[arg(long)]
        id: String,
    },

    /// Manage shortcut connections
    Shortcuts {
        #[command(subcommand)]
        action: ShortcutAction,
    },

    /// Deploy the connector control plane on the primary cluster
    Setup,

    /// Remove the connector control plane from the primary cluster
    Undeploy,

    /// Deploy or remove the connector together with its fleet access policy
    Manager {
        #[command(subcommand)]
        action: ManagerAction,
    },
}

#[derive(Subcommand, Debug)]
enum ShortcutAction {
    /// List all declared shortcuts
    List,

    /// Show the state of the shortcut between two clusters
    Check {
        #[command(flatten)]
        pair: PairArgs,

        /// Wait for the shortcut to become connected
        #[arg(long)]
        wait: bool,

        /// Wait budget in seconds
        #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECONDS)]
        timeout: u32,
    },

    /// Declare a shortcut between two clusters
    Create(CreateArgs),

    /// Delete the shortcut between two clusters
    Delete {
        #[command(flatten)]
        pair: PairArgs,
    },
}

#[derive(Subcommand, Debug)]
enum ManagerAction {
    /// Deploy the control plane and grant fleet access
    Deploy,
    /// Remove the control plane and revoke fleet access
    Remove,
}

#[derive(Args, Debug)]
struct PairArgs {
    /// First foreign cluster
    #[arg(short = 'a', long = "node-a")]
    node_a: String,

    /// Second foreign cluster
    #[arg(short = 'b', long = "node-b")]
    node_b: String,
}

#[derive(Args, Debug)]
struct CreateArgs {
    #[command(flatten)]
    pair: PairArgs,

    /// Namespace of the declaration
    #[arg(long, default_value = config::DEFAULT_NAMESPACE)]
    namespace: String,

    #[arg(long, default_value_t = DEFAULT_MTU)]
    mtu: i32,

    /// Wait budget in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECONDS)]
    timeout: u32,

    /// Wait for the shortcut to become connected
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    wait: bool,

    /// Disable key sharing between the gateways
    #[arg(long)]
    disable_sharing: bool,

    #[arg(long, default_value = DEFAULT_GW_SERVER_TYPE)]
    server_gateway_type: String,

    #[arg(long, default_value = DEFAULT_GW_SERVER_TEMPLATE)]
    server_template_name: String,

    #[arg(long, default_value = DEFAULT_TEMPLATE_NAMESPACE)]
    server_template_namespace: String,

    #[arg(long, default_value_t = DEFAULT_GW_SERVER_PORT)]
    gw_server_service_port: i32,

    /// ClusterIP, NodePort or LoadBalancer
    #[arg(long, default_value_t = ServiceType::LoadBalancer)]
    gw_server_service_type: ServiceType,

    #[arg(long, default_value = DEFAULT_GW_CLIENT_TYPE)]
    client_gateway_type: String,

    #[arg(long, default_value = DEFAULT_GW_CLIENT_TEMPLATE)]
    client_template_name: String,

    #[arg(long, default_value = DEFAULT_TEMPLATE_NAMESPACE)]
    client_template_namespace: String,
}

impl GlobalArgs {
    fn settings(&self) -> Settings {
        let defaults = Settings::default();
        Settings {
            kubeconfig: self.kubeconfig.clone(),
            tenant_prefix: self.tenant_prefix.clone(),
            credential_prefix: self.credential_prefix.clone(),
            credential_key: self.credential_key.clone(),
            scratch_dir: self.scratch_dir.clone().unwrap_or(defaults.scratch_dir),
            manifest_ref: self.manifest_ref.clone(),
            applier: match self.applier {
                ApplierArg::Kubectl => ApplierKind::Kubectl,
                ApplierArg::Native => ApplierKind::Native,
            },
        }
    }
}

impl CreateArgs {
    fn request(&self) -> ShortcutRequest {
        ShortcutRequest::new(&self.pair.node_a, &self.pair.node_b)
            .namespace(&self.namespace)
            .networking(NetworkingConfig {
                mtu: self.mtu,
                disable_sharing: self.disable_sharing,
                server: GatewayServerConfig {
                    gateway_type: self.server_gateway_type.clone(),
                    template_name: self.server_template_name.clone(),
                    template_namespace: self.server_template_namespace.clone(),
                    service_type: self.gw_server_service_type,
                    service_port: self.gw_server_service_port,
                },
                client: GatewayClientConfig {
                    gateway_type: self.client_gateway_type.clone(),
                    template_name: self.client_template_name.clone(),
                    template_namespace: self.client_template_namespace.clone(),
                },
                timeout_seconds: self.timeout,
                wait: self.wait,
            })
    }
}

fn init_logging(args: &GlobalArgs) {
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false);

    match args.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.global);

    let (notify, interrupts) = mpsc::channel(1);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if notify.send(()).await.is_err() {
                break;
            }
        }
    });

    let cancel = CancellationToken::new();
    let graceful = cli.command.waits_for_convergence();
    match supervise(run(cli, cancel.clone()), interrupts, &cancel, graceful).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Drive `work` to completion unless interrupted.
///
/// When `graceful`, the first interrupt only cancels `cancel` so a wait in
/// progress can report it; any other interrupt abandons `work`.
async fn supervise(
    work: impl Future<Output = Result<()>>,
    mut interrupts: mpsc::Receiver<()>,
    cancel: &CancellationToken,
    graceful: bool,
) -> Result<()> {
    tokio::pin!(work);
    loop {
        tokio::select! {
            result = &mut work => return result,
            Some(()) = interrupts.recv() => {
                if graceful && !cancel.is_cancelled() {
                    debug!("Interrupt received, cancelling wait");
                    cancel.cancel();
                } else {
                    anyhow::bail!("Interrupted");
                }
            }
        }
    }
}

impl Command {
    /// Whether the command may block on a convergence wait.
    fn waits_for_convergence(&self) -> bool {
        match self {
            Command::Shortcuts {
                action: ShortcutAction::Create(args),
            } => args.wait,
            Command::Shortcuts {
                action: ShortcutAction::Check { wait, .. },
            } => *wait,
            _ => false,
        }
    }
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<()> {
    let settings = cli.global.settings();
    let client = config::primary_client(&settings)
        .await
        .context("Failed to connect to the primary cluster")?;

    match cli.command {
        Command::Foreignclusters => list_foreign_clusters(client).await,
        Command::ForeignclusterExists { id } => foreign_cluster_exists(client, &id).await,
        Command::Shortcuts { action } => run_shortcuts(client, action, &cancel).await,
        Command::Setup => {
            println!("🔧 Deploying controller...");
            manifest_lifecycle(&settings, &client).apply().await?;
            println!("✅ Controller deployed successfully.");
            Ok(())
        }
        Command::Undeploy => {
            println!("🧹 Removing controller...");
            manifest_lifecycle(&settings, &client).remove().await?;
            println!("✅ Controller resources deleted.");
            Ok(())
        }
        Command::Manager { action } => run_manager(&settings, client, action).await,
    }
}

fn applier(settings: &Settings, client: &Client) -> Arc<dyn DeclarativeApplier> {
    match settings.applier {
        ApplierKind::Kubectl => Arc::new(KubectlApplier::new(settings.kubeconfig.clone())),
        ApplierKind::Native => Arc::new(KubeApplier::new(client.clone())),
    }
}

fn manifest_lifecycle(settings: &Settings, client: &Client) -> ManifestLifecycle {
    ManifestLifecycle::new(applier(settings, client), settings)
}

async fn list_foreign_clusters(client: Client) -> Result<()> {
    let registry = ClusterRegistry::new(KubeForeignClusters::new(client));
    let clusters = registry.discover_all().await?;

    if clusters.is_empty() {
        println!("No ForeignClusters found.");
        return Ok(());
    }
    for cluster in clusters {
        println!(
            "- Name: {}\n  ClusterID: {}\n  Namespace: {}",
            cluster.name,
            cluster.cluster_id,
            cluster.namespace.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

async fn foreign_cluster_exists(client: Client, cluster_id: &str) -> Result<()> {
    let registry = ClusterRegistry::new(KubeForeignClusters::new(client));
    match registry.exists_by_id(cluster_id).await? {
        Some(name) => println!("✅ ForeignCluster with ClusterID '{}' exists (Name: {}).", cluster_id, name),
        None => println!("❌ ForeignCluster with ClusterID '{}' does NOT exist.", cluster_id),
    }
    Ok(())
}

async fn run_shortcuts(client: Client, action: ShortcutAction, cancel: &CancellationToken) -> Result<()> {
    let shortcuts = ShortcutRegistry::new(
        ClusterRegistry::new(KubeForeignClusters::new(client.clone())),
        KubeConnections::new(client),
    );

    match action {
        ShortcutAction::List => {
            let connections = shortcuts.list().await?;
            if connections.is_empty() {
                println!("No Shortcuts found.");
            }
            for conn in connections {
                println!(
                    "- {}/{}\n  ForeignClusterA: {}\n  ForeignClusterB: {}\n  IsConnected: {} (Phase: {})",
                    conn.namespace().unwrap_or_default(),
                    conn.name_any(),
                    conn.spec.foreign_cluster_a,
                    conn.spec.foreign_cluster_b,
                    conn.is_connected(),
                    conn.phase()
                );
            }
        }
        ShortcutAction::Check { pair, wait, timeout } => {
            let conn = shortcuts
                .find(&pair.node_a, &pair.node_b)
                .await?
                .ok_or_else(|| ShortcutError::DeclarationNotFound {
                    endpoint_a: pair.node_a.clone(),
                    endpoint_b: pair.node_b.clone(),
                })?;
            println!(
                "{}/{}: IsConnected: {} (Phase: {})",
                conn.namespace().unwrap_or_default(),
                conn.name_any(),
                conn.is_connected(),
                conn.phase()
            );
            if wait && !conn.is_connected() {
                println!("⏳ Waiting for connection...");
                report_convergence(shortcuts.wait(&conn, timeout, cancel).await?);
            }
        }
        ShortcutAction::Create(args) => {
            let request = args.request();
            let report = shortcuts.create(&request, cancel).await?;
            let (namespace, name) = (
                report.connection.namespace().unwrap_or_default(),
                report.connection.name_any(),
            );

            if report.created {
                println!("✅ Created: {}/{}", namespace, name);
            } else {
                println!(
                    "ℹ️  Connection between {} and {} already exists: {}/{} (Phase: {})",
                    request.endpoint_a,
                    request.endpoint_b,
                    namespace,
                    name,
                    report.connection.phase()
                );
            }
            if let Some(outcome) = report.convergence {
                report_convergence(outcome);
            }
        }
        ShortcutAction::Delete { pair } => {
            let deleted = shortcuts.delete(&pair.node_a, &pair.node_b).await?;
            println!(
                "🧹 Deleted: {}/{}",
                deleted.namespace().unwrap_or_default(),
                deleted.name_any()
            );
        }
    }
    Ok(())
}

fn report_convergence(outcome: Convergence) {
    match outcome {
        Convergence::Connected => println!("✅ Connected!"),
        Convergence::TimedOut { attempts } => {
            warn!(attempts, "Convergence budget exhausted");
            println!("⚠️  Timeout expired, connection not established yet.");
        }
        Convergence::Cancelled => println!("⚠️  Wait interrupted, the declaration is left in place."),
    }
}

async fn run_manager(settings: &Settings, client: Client, action: ManagerAction) -> Result<()> {
    let subject = config::operator_identity(settings.kubeconfig.as_deref())
        .context("Failed to resolve the current Kubernetes user")?;
    println!("ℹ️  Current Kubernetes user: {}\n", subject);

    let manifest = manifest_lifecycle(settings, &client);
    let clusters = ClusterRegistry::new(KubeForeignClusters::new(client.clone()));
    let access = AccessPolicyDistributor::new(
        CredentialBroker::new(KubeSecrets::new(client.clone()), settings),
        applier(settings, &client),
    );
    let fleet = Fleet {
        manifest: &manifest,
        clusters: &clusters,
        access: &access,
    };

    let report = match action {
        ManagerAction::Deploy => {
            println!("🔧 Deploying controller and access policy...");
            fleet.deploy(&subject).await?
        }
        ManagerAction::Remove => {
            println!("🧹 Removing controller and access policy...");
            fleet.teardown(&subject).await?
        }
    };
    print_fleet_report(&report);
    Ok(())
}

fn print_fleet_report(report: &FleetReport) {
    if report.discovered.is_empty() {
        println!("⚠️  No foreign clusters detected; access policy untouched.");
    }
    for cluster in &report.processed {
        println!("🌍 Access policy updated on '{}'", cluster);
    }
    println!("✅ Done ({} foreign clusters).", report.processed.len());
}
