use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bosun")]
#[command(version)]
#[command(about = "Install and manage Kubernetes clusters from a declarative plan", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the installation plan file
    #[arg(
        short = 'f',
        long = "plan-file",
        global = true,
        default_value = "bosun-cluster.yaml"
    )]
    pub plan_file: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Plan, validate, and apply a cluster installation
    #[command(subcommand)]
    Install(InstallCommand),

    /// Upgrade an existing cluster
    #[command(subcommand)]
    Upgrade(UpgradeCommand),

    /// Manage persistent storage volumes
    #[command(subcommand)]
    Volume(VolumeCommand),

    /// Collect diagnostics from the nodes in the cluster
    Diagnose(DiagnoseArgs),

    /// Display info about the nodes in the cluster
    Info(InfoArgs),

    /// Display the version
    Version,

    /// Seed a container image registry with the images the cluster needs
    SeedRegistry(SeedRegistryArgs),

    /// Open or display the cluster dashboard URL
    Dashboard(DashboardArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Run the node check server (used by the preflight playbook)
    #[command(hide = true)]
    PreflightServer(PreflightServerArgs),

    /// Run checks against a node check server (used by the preflight playbook)
    #[command(hide = true)]
    PreflightClient(PreflightClientArgs),
}

// ============================================================================
// Install
// ============================================================================

#[derive(Subcommand)]
pub enum InstallCommand {
    /// Generate a plan file template for the operator to fill in
    Plan(PlanArgs),

    /// Validate the plan file and run preflight checks against the nodes
    Validate(ValidateArgs),

    /// Apply the plan: install the cluster
    Apply(ApplyArgs),

    /// Add a node to an existing cluster
    AddNode(AddNodeArgs),

    /// Run a single installation step against the cluster
    Step(StepArgs),
}

#[derive(Args)]
pub struct PlanArgs {
    /// Name of the cluster
    #[arg(long, default_value = "kubernetes")]
    pub name: String,

    /// Number of etcd nodes
    #[arg(long, default_value_t = 3)]
    pub etcd: usize,

    /// Number of master nodes
    #[arg(long, default_value_t = 2)]
    pub master: usize,

    /// Number of worker nodes
    #[arg(long, default_value_t = 3)]
    pub worker: usize,

    /// Number of ingress nodes
    #[arg(long, default_value_t = 2)]
    pub ingress: usize,

    /// Number of storage nodes
    #[arg(long, default_value_t = 0)]
    pub storage: usize,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Skip the preflight checks against the nodes
    #[arg(long)]
    pub skip_preflight: bool,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Skip the preflight checks before installing
    #[arg(long)]
    pub skip_preflight: bool,

    /// Restart cluster services during the installation
    #[arg(long)]
    pub restart_services: bool,

    /// Skip the smoke test after the installation
    #[arg(long)]
    pub skip_smoke_test: bool,

    /// Collect diagnostics from the nodes when the installation fails
    #[arg(long)]
    pub diagnose_on_failure: bool,

    /// Location for generated assets (certificates, kubeconfigs)
    #[arg(long, default_value = "generated")]
    pub generated_assets_dir: PathBuf,
}

#[derive(Args)]
pub struct AddNodeArgs {
    /// Hostname of the new node
    pub host: String,

    /// Publicly accessible IP of the new node
    pub ip: String,

    /// Internal IP of the new node, when different from the public one
    #[arg(long)]
    pub internal_ip: Option<String>,

    /// Roles for the new node (worker, ingress, storage)
    #[arg(long, value_delimiter = ',', default_value = "worker")]
    pub roles: Vec<String>,

    /// Labels to apply to the new node, as key=value pairs
    #[arg(long, value_delimiter = ',')]
    pub labels: Vec<String>,

    /// Restart cluster services after adding the node
    #[arg(long)]
    pub restart_services: bool,
}

#[derive(Args)]
pub struct StepArgs {
    /// The playbook to run, e.g. kubernetes.yaml
    pub play: String,

    /// Restart cluster services during the step
    #[arg(long)]
    pub restart_services: bool,
}

// ============================================================================
// Upgrade
// ============================================================================

#[derive(Subcommand)]
pub enum UpgradeCommand {
    /// Upgrade while keeping workloads running (nodes drained one at a time)
    Online(UpgradeArgs),

    /// Upgrade without draining workloads
    Offline(UpgradeArgs),
}

#[derive(Args)]
pub struct UpgradeArgs {
    /// Skip the upgrade preflight checks
    #[arg(long)]
    pub skip_preflight: bool,

    /// Location for generated assets (certificates, kubeconfigs)
    #[arg(long, default_value = "generated")]
    pub generated_assets_dir: PathBuf,
}

// ============================================================================
// Volume
// ============================================================================

#[derive(Subcommand)]
pub enum VolumeCommand {
    /// Add a persistent storage volume to the cluster
    Add(VolumeAddArgs),

    /// Delete a persistent storage volume from the cluster
    Delete(VolumeDeleteArgs),
}

#[derive(Args)]
pub struct VolumeAddArgs {
    /// Size of the volume in gigabytes
    pub size_gb: u64,

    /// Name of the volume
    pub volume_name: String,

    /// Number of replicas for each file
    #[arg(short = 'r', long = "replica-count", default_value_t = 2)]
    pub replica_count: usize,

    /// Number of distributed bricks the volume is spread over
    #[arg(short = 'c', long = "distribution-count", default_value_t = 1)]
    pub distribution_count: usize,

    /// Storage class for grouping volumes
    #[arg(long, default_value = "bosun")]
    pub storage_class: String,

    /// Addresses allowed to access the volume (wildcard octets permitted)
    #[arg(short = 'a', long = "allow-address")]
    pub allow_addresses: Vec<String>,

    /// Reclaim policy: Retain, Recycle, or Delete
    #[arg(long, default_value = "Retain")]
    pub reclaim_policy: String,

    /// Access modes: ReadWriteOnce, ReadOnlyMany, ReadWriteMany
    #[arg(short = 'm', long = "access-mode", default_value = "ReadWriteMany")]
    pub access_modes: Vec<String>,
}

#[derive(Args)]
pub struct VolumeDeleteArgs {
    /// Name of the volume to delete
    pub volume_name: String,

    /// Do not ask for confirmation
    #[arg(long)]
    pub force: bool,
}

// ============================================================================
// Other commands
// ============================================================================

#[derive(Args)]
pub struct DiagnoseArgs {}

#[derive(Args)]
pub struct InfoArgs {
    /// Output format (simple or json)
    #[arg(short, long, default_value = "simple")]
    pub output: String,
}

#[derive(Args)]
pub struct SeedRegistryArgs {
    /// Only list the images without pushing them to the registry
    #[arg(long)]
    pub list_only: bool,

    /// Registry server, without the protocol (e.g. localhost:5000).
    /// Takes precedence over the one in the plan file.
    #[arg(long)]
    pub server: Option<String>,

    /// Path to the container images manifest file
    #[arg(long)]
    pub images_manifest_file: Option<PathBuf>,
}

#[derive(Args)]
pub struct DashboardArgs {
    /// Display the dashboard URL instead of opening it
    #[arg(long)]
    pub url: bool,
}

#[derive(Args)]
pub struct PreflightServerArgs {
    /// Port to listen on
    #[arg(long, default_value_t = 8888)]
    pub port: u16,
}

#[derive(Args)]
pub struct PreflightClientArgs {
    /// ip:port of the node check server
    #[arg(long)]
    pub target: String,

    /// Binaries that must exist on the node
    #[arg(long = "binary")]
    pub binary_dependencies: Vec<String>,

    /// Packages that must be installed, as name or name=version
    #[arg(long = "package")]
    pub package_dependencies: Vec<String>,

    /// TCP ports that must be bindable and reachable
    #[arg(long = "tcp-port")]
    pub tcp_ports: Vec<u16>,
}
